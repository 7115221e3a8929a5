use phf::phf_map;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Symbol and standard atomic mass (amu) for elements 1 through 86, indexed by
/// `atomic_number - 1`.
const ELEMENT_TABLE: [(&str, f64); 86] = [
    ("H", 1.007947),
    ("He", 4.003),
    ("Li", 6.9412),
    ("Be", 9.0121823),
    ("B", 10.8117),
    ("C", 12.01078),
    ("N", 14.00672),
    ("O", 15.99943),
    ("F", 18.99840325),
    ("Ne", 20.17976),
    ("Na", 22.989769282),
    ("Mg", 24.30506),
    ("Al", 26.98153868),
    ("Si", 28.08553),
    ("P", 30.9737622),
    ("S", 32.0655),
    ("Cl", 35.4532),
    ("Ar", 39.9481),
    ("K", 39.09831),
    ("Ca", 40.0784),
    ("Sc", 44.9559126),
    ("Ti", 47.8671),
    ("V", 50.94151),
    ("Cr", 51.99616),
    ("Mn", 54.9380455),
    ("Fe", 55.8452),
    ("Co", 58.9331955),
    ("Ni", 58.69342),
    ("Cu", 63.5463),
    ("Zn", 65.4094),
    ("Ga", 69.7231),
    ("Ge", 72.641),
    ("As", 74.921602),
    ("Se", 78.963),
    ("Br", 79.9041),
    ("Kr", 83.7982),
    ("Rb", 85.46783),
    ("Sr", 87.621),
    ("Y", 88.905852),
    ("Zr", 91.2242),
    ("Nb", 92.906382),
    ("Mo", 95.942),
    ("Tc", 98.0),
    ("Ru", 101.072),
    ("Rh", 102.905502),
    ("Pd", 106.421),
    ("Ag", 107.86822),
    ("Cd", 112.4118),
    ("In", 114.8183),
    ("Sn", 118.7107),
    ("Sb", 121.7601),
    ("Te", 127.603),
    ("I", 126.904473),
    ("Xe", 131.2936),
    ("Cs", 132.90545192),
    ("Ba", 137.3277),
    ("La", 138.905477),
    ("Ce", 140.1161),
    ("Pr", 140.907652),
    ("Nd", 144.2423),
    ("Pm", 145.0),
    ("Sm", 150.362),
    ("Eu", 151.9641),
    ("Gd", 157.253),
    ("Tb", 158.925352),
    ("Dy", 162.5001),
    ("Ho", 164.930322),
    ("Er", 167.2593),
    ("Tm", 168.934212),
    ("Yb", 173.043),
    ("Lu", 174.9671),
    ("Hf", 178.492),
    ("Ta", 180.947882),
    ("W", 183.841),
    ("Re", 186.2071),
    ("Os", 190.233),
    ("Ir", 192.2173),
    ("Pt", 195.0849),
    ("Au", 196.9665694),
    ("Hg", 200.592),
    ("Tl", 204.38332),
    ("Pb", 207.21),
    ("Bi", 208.980401),
    ("Po", 209.0),
    ("At", 210.0),
    ("Rn", 222.0),
];

static SYMBOL_MAP: phf::Map<&'static str, u8> = phf_map! {
    "H" => 1, "He" => 2, "Li" => 3, "Be" => 4, "B" => 5, "C" => 6, "N" => 7, "O" => 8,
    "F" => 9, "Ne" => 10, "Na" => 11, "Mg" => 12, "Al" => 13, "Si" => 14, "P" => 15,
    "S" => 16, "Cl" => 17, "Ar" => 18, "K" => 19, "Ca" => 20, "Sc" => 21, "Ti" => 22,
    "V" => 23, "Cr" => 24, "Mn" => 25, "Fe" => 26, "Co" => 27, "Ni" => 28, "Cu" => 29,
    "Zn" => 30, "Ga" => 31, "Ge" => 32, "As" => 33, "Se" => 34, "Br" => 35, "Kr" => 36,
    "Rb" => 37, "Sr" => 38, "Y" => 39, "Zr" => 40, "Nb" => 41, "Mo" => 42, "Tc" => 43,
    "Ru" => 44, "Rh" => 45, "Pd" => 46, "Ag" => 47, "Cd" => 48, "In" => 49, "Sn" => 50,
    "Sb" => 51, "Te" => 52, "I" => 53, "Xe" => 54, "Cs" => 55, "Ba" => 56, "La" => 57,
    "Ce" => 58, "Pr" => 59, "Nd" => 60, "Pm" => 61, "Sm" => 62, "Eu" => 63, "Gd" => 64,
    "Tb" => 65, "Dy" => 66, "Ho" => 67, "Er" => 68, "Tm" => 69, "Yb" => 70, "Lu" => 71,
    "Hf" => 72, "Ta" => 73, "W" => 74, "Re" => 75, "Os" => 76, "Ir" => 77, "Pt" => 78,
    "Au" => 79, "Hg" => 80, "Tl" => 81, "Pb" => 82, "Bi" => 83, "Po" => 84, "At" => 85,
    "Rn" => 86,
};

/// A chemical element, identified by its atomic number.
///
/// Ordering follows the atomic number, which is also the order used when
/// elements are listed in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Element(u8);

impl Element {
    pub const HYDROGEN: Element = Element(1);
    pub const CARBON: Element = Element(6);
    pub const NITROGEN: Element = Element(7);
    pub const OXYGEN: Element = Element(8);
    pub const SULFUR: Element = Element(16);

    /// Looks up an element by atomic number.
    ///
    /// # Return
    ///
    /// Returns `None` if the number is outside the supported range.
    pub fn from_atomic_number(number: u8) -> Option<Self> {
        (1..=ELEMENT_TABLE.len() as u8)
            .contains(&number)
            .then_some(Element(number))
    }

    /// Looks up an element by symbol.
    ///
    /// The lookup tolerates surrounding whitespace and any capitalization,
    /// so `"CL"`, `"cl"` and `"Cl"` all resolve to chlorine.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let trimmed = symbol.trim();
        if let Some(&n) = SYMBOL_MAP.get(trimmed) {
            return Some(Element(n));
        }
        let mut chars = trimmed.chars();
        let first = chars.next()?;
        let normalized: String = first
            .to_uppercase()
            .chain(chars.flat_map(|c| c.to_lowercase()))
            .collect();
        SYMBOL_MAP.get(normalized.as_str()).map(|&n| Element(n))
    }

    pub fn atomic_number(self) -> u8 {
        self.0
    }

    pub fn symbol(self) -> &'static str {
        ELEMENT_TABLE[(self.0 - 1) as usize].0
    }

    /// Standard atomic mass in amu.
    pub fn mass(self) -> f64 {
        ELEMENT_TABLE[(self.0 - 1) as usize].1
    }

    pub fn is_hydrogen(self) -> bool {
        self == Self::HYDROGEN
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown element symbol '{0}'")]
pub struct UnknownElementError(pub String);

impl FromStr for Element {
    type Err = UnknownElementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Element::from_symbol(s).ok_or_else(|| UnknownElementError(s.to_string()))
    }
}
