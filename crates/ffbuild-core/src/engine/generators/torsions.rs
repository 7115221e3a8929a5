use super::{ForceGenerator, matches_either_direction, read_selectors};
use crate::core::error::LoadError;
use crate::core::forcefield::selector::TypeSelector;
use crate::core::io::xml::XmlNode;
use crate::core::models::element::Element;
use crate::engine::config::CreateSystemOptions;
use crate::engine::context::AssemblyData;
use crate::engine::error::AssemblyError;
use crate::engine::model::{Force, ForceModel, PeriodicTorsion};
use std::str::FromStr;
use tracing::debug;

pub const TAG: &str = "PeriodicTorsionForce";

/// How the four atoms of a matched improper are ordered in the emitted term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImproperOrdering {
    #[default]
    Default,
    Amber,
    Charmm,
    /// Emits all three cyclic arrangements of the outer atoms.
    Smirnoff,
}

impl FromStr for ImproperOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "amber" => Ok(Self::Amber),
            "charmm" => Ok(Self::Charmm),
            "smirnoff" => Ok(Self::Smirnoff),
            other => Err(format!("unknown improper ordering '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TorsionTerm {
    pub periodicity: u32,
    pub phase: f64,
    pub k: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TorsionParameters {
    /// For impropers, `types[0]` selects the central atom.
    pub types: [TypeSelector; 4],
    pub terms: Vec<TorsionTerm>,
    pub ordering: ImproperOrdering,
}

impl TorsionParameters {
    fn parse(node: &XmlNode, ordering: ImproperOrdering) -> Result<Self, LoadError> {
        let mut terms = Vec::new();
        for n in 1.. {
            let key = format!("periodicity{n}");
            let Some(periodicity) = node.attr_usize(&key)? else {
                break;
            };
            let periodicity = u32::try_from(periodicity).map_err(|_| {
                LoadError::invalid_value(&node.name, &key, &periodicity.to_string(), "periodicity is too large")
            })?;
            terms.push(TorsionTerm {
                periodicity,
                phase: node.required_f64(&format!("phase{n}"))?,
                k: node.required_f64(&format!("k{n}"))?,
            });
        }
        if terms.is_empty() {
            return Err(LoadError::MissingAttribute {
                element: node.name.clone(),
                attribute: "periodicity1".to_string(),
            });
        }
        Ok(Self {
            types: read_selectors::<4>(node)?,
            terms,
            ordering,
        })
    }

    pub fn has_wildcard(&self) -> bool {
        self.types.iter().any(TypeSelector::is_wildcard)
    }
}

/// Proper and improper periodic torsions.
///
/// A torsion takes the first exact definition that matches it, or failing
/// that the first wildcard definition, so each torsion is counted once.
#[derive(Debug, Clone, Default)]
pub struct PeriodicTorsionGenerator {
    pub propers: Vec<TorsionParameters>,
    pub impropers: Vec<TorsionParameters>,
}

/// First exact candidate, else first wildcard candidate.
fn prefer_exact<'p, T>(candidates: impl Iterator<Item = (&'p TorsionParameters, T)>) -> Option<(&'p TorsionParameters, T)> {
    let mut fallback = None;
    for (params, extra) in candidates {
        if !params.has_wildcard() {
            return Some((params, extra));
        }
        if fallback.is_none() {
            fallback = Some((params, extra));
        }
    }
    fallback
}

const PERMUTATIONS: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

impl PeriodicTorsionGenerator {
    fn match_improper(&self, data: &AssemblyData<'_>, improper: [usize; 4]) -> Option<(&TorsionParameters, [usize; 3])> {
        let [center, outer @ ..] = improper;
        let center_type = data.atom_type(center);
        let candidates = self.impropers.iter().filter_map(|params| {
            if !params.types[0].matches(center_type) {
                return None;
            }
            PERMUTATIONS.iter().find_map(|p| {
                let atoms = [outer[p[0]], outer[p[1]], outer[p[2]]];
                atoms
                    .iter()
                    .zip(&params.types[1..])
                    .all(|(&a, s)| s.matches(data.atom_type(a)))
                    .then_some((params, atoms))
            })
        });
        prefer_exact(candidates)
    }

    /// Orders a matched improper `(center; a2, a3, a4)` into emitted atom tuples.
    fn order_improper(
        &self,
        data: &AssemblyData<'_>,
        params: &TorsionParameters,
        center: usize,
        [a2, a3, a4]: [usize; 3],
    ) -> Vec<[usize; 4]> {
        let wildcard = params.has_wildcard();
        match params.ordering {
            ImproperOrdering::Charmm if !wildcard => vec![[center, a2, a3, a4]],
            ImproperOrdering::Default | ImproperOrdering::Charmm => {
                let (mut b1, mut b2) = (a2, a3);
                let (e1, e2) = (data.element(b1), data.element(b2));
                let mass = |e: Option<Element>| e.map_or(0.0, Element::mass);
                let carbon = Some(Element::CARBON);
                if e1 == e2 {
                    if b1 > b2 {
                        std::mem::swap(&mut b1, &mut b2);
                    }
                } else if e1 != carbon && (e2 == carbon || mass(e1) < mass(e2)) {
                    std::mem::swap(&mut b1, &mut b2);
                }
                vec![[b1, b2, center, a4]]
            }
            ImproperOrdering::Amber => {
                let key = |a: usize| (data.topology.atoms()[a].residue, data.template_atom_index(a));
                let same = |x: usize, y: usize| {
                    if wildcard {
                        data.element(x) == data.element(y)
                    } else {
                        data.atom_type(x).name == data.atom_type(y).name
                    }
                };
                let (mut b2, mut b3, mut b4) = (a2, a3, a4);
                if same(b2, b4) && key(b2) > key(b4) {
                    std::mem::swap(&mut b2, &mut b4);
                }
                if same(b3, b4) && key(b3) > key(b4) {
                    std::mem::swap(&mut b3, &mut b4);
                }
                if (wildcard || same(b2, b3)) && key(b2) > key(b3) {
                    std::mem::swap(&mut b2, &mut b3);
                }
                vec![[b2, b3, center, b4]]
            }
            ImproperOrdering::Smirnoff => vec![
                [center, a2, a3, a4],
                [center, a3, a4, a2],
                [center, a4, a2, a3],
            ],
        }
    }
}

fn push_terms(out: &mut Vec<PeriodicTorsion>, atoms: [usize; 4], params: &TorsionParameters) {
    for term in params.terms.iter().filter(|t| t.k != 0.0) {
        out.push(PeriodicTorsion {
            atoms,
            periodicity: term.periodicity,
            phase: term.phase,
            k: term.k,
        });
    }
}

impl ForceGenerator for PeriodicTorsionGenerator {
    fn tag(&self) -> &str {
        TAG
    }

    fn merge(&mut self, node: &XmlNode) -> Result<(), LoadError> {
        let ordering = match node.attr("ordering") {
            Some(value) => value
                .parse()
                .map_err(|reason: String| LoadError::invalid_value(&node.name, "ordering", value, reason))?,
            None => ImproperOrdering::Default,
        };
        for proper in node.children_named("Proper") {
            self.propers.push(TorsionParameters::parse(proper, ordering)?);
        }
        for improper in node.children_named("Improper") {
            self.impropers.push(TorsionParameters::parse(improper, ordering)?);
        }
        Ok(())
    }

    fn create_force(
        &self,
        data: &AssemblyData<'_>,
        _options: &CreateSystemOptions,
        model: &mut ForceModel,
    ) -> Result<(), AssemblyError> {
        let mut terms = Vec::new();

        for &proper in &data.propers {
            let types = proper.map(|a| data.atom_type(a));
            let candidates = self
                .propers
                .iter()
                .filter(|p| matches_either_direction(&p.types, &types))
                .map(|p| (p, ()));
            match prefer_exact(candidates) {
                Some((params, ())) => push_terms(&mut terms, proper, params),
                None => debug!(atoms = ?proper, "No proper torsion parameters; skipping."),
            }
        }

        for &improper in &data.impropers {
            let Some((params, outer)) = self.match_improper(data, improper) else {
                continue;
            };
            for atoms in self.order_improper(data, params, improper[0], outer) {
                push_terms(&mut terms, atoms, params);
            }
        }

        model.add_force(Force::PeriodicTorsion(terms));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Molecule, chain, molecule, section};
    use super::*;

    fn generator(xml: &str) -> PeriodicTorsionGenerator {
        let mut g = PeriodicTorsionGenerator::default();
        g.merge(&section(xml)).unwrap();
        g
    }

    fn torsions(g: &PeriodicTorsionGenerator, mol: &Molecule) -> Vec<PeriodicTorsion> {
        let options = CreateSystemOptions::default();
        let data = mol.data(&options);
        let mut model = ForceModel::default();
        g.create_force(&data, &options, &mut model).unwrap();
        model.periodic_torsions().cloned().collect()
    }

    /// Formaldehyde: C bonded to O, H1 and H2.
    fn formaldehyde() -> Molecule {
        molecule(
            "FOR",
            &[
                ("C", "C", Some("C"), 0.5),
                ("O", "O", Some("O"), -0.5),
                ("H1", "HA", Some("H"), 0.0),
                ("H2", "HA", Some("H"), 0.0),
            ],
            &[(0, 1), (0, 2), (0, 3)],
            &[],
        )
    }

    #[test]
    fn wildcard_definitions_are_parsed() {
        let g = generator(
            r#"<PeriodicTorsionForce>
                 <Proper type1="" type2="C" type3="C" type4="" periodicity1="2" phase1="3.141593" k1="15.167"/>
                 <Improper type1="C" type2="" type3="" type4="O" periodicity1="2" phase1="3.141593" k1="43.932"/>
               </PeriodicTorsionForce>"#,
        );
        assert_eq!(g.propers.len(), 1);
        assert_eq!(g.impropers.len(), 1);
        assert!(g.propers[0].has_wildcard());
        assert_eq!(g.impropers[0].terms[0].periodicity, 2);
    }

    #[test]
    fn exact_propers_win_over_wildcards() {
        let g = generator(
            r#"<PeriodicTorsionForce>
                 <Proper type1="" type2="CT" type3="CT" type4="" periodicity1="3" phase1="0" k1="1.0"/>
                 <Proper type1="CT" type2="CT" type3="CT" type4="CT" periodicity1="3" phase1="0" k1="2.0" periodicity2="1" phase2="0" k2="0"/>
               </PeriodicTorsionForce>"#,
        );
        let terms = torsions(&g, &chain());
        assert_eq!(terms.len(), 3);
        let k_of = |atoms: [usize; 4]| terms.iter().find(|t| t.atoms == atoms).unwrap().k;
        assert_eq!(k_of([0, 1, 2, 3]), 2.0);
        assert_eq!(k_of([4, 0, 1, 2]), 1.0);
        assert_eq!(k_of([1, 2, 3, 5]), 1.0);
    }

    #[test]
    fn default_ordering_places_center_third() {
        let g = generator(
            r#"<PeriodicTorsionForce>
                 <Improper type1="C" type2="" type3="" type4="O" periodicity1="2" phase1="3.14159" k1="43.9"/>
               </PeriodicTorsionForce>"#,
        );
        let terms = torsions(&g, &formaldehyde());
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].atoms, [2, 3, 0, 1]);
    }

    #[test]
    fn charmm_ordering_without_wildcards_keeps_center_first() {
        let g = generator(
            r#"<PeriodicTorsionForce ordering="charmm">
                 <Improper type1="C" type2="O" type3="HA" type4="HA" periodicity1="0" phase1="0" k1="10.0"/>
               </PeriodicTorsionForce>"#,
        );
        let terms = torsions(&g, &formaldehyde());
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].atoms, [0, 1, 2, 3]);
    }

    #[test]
    fn amber_ordering_places_center_third() {
        let g = generator(
            r#"<PeriodicTorsionForce ordering="amber">
                 <Improper type1="C" type2="O" type3="HA" type4="HA" periodicity1="2" phase1="3.14159" k1="4.6"/>
               </PeriodicTorsionForce>"#,
        );
        let terms = torsions(&g, &formaldehyde());
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].atoms, [1, 2, 0, 3]);
    }

    #[test]
    fn smirnoff_ordering_emits_the_trefoil() {
        let g = generator(
            r#"<PeriodicTorsionForce ordering="smirnoff">
                 <Improper class1="C" class2="" class3="" class4="" periodicity1="2" phase1="3.14159" k1="1.5"/>
               </PeriodicTorsionForce>"#,
        );
        let terms = torsions(&g, &formaldehyde());
        let atoms: Vec<[usize; 4]> = terms.iter().map(|t| t.atoms).collect();
        assert_eq!(atoms, vec![[0, 1, 2, 3], [0, 2, 3, 1], [0, 3, 1, 2]]);
    }

    #[test]
    fn unknown_ordering_is_rejected() {
        let mut g = PeriodicTorsionGenerator::default();
        let err = g
            .merge(&section(r#"<PeriodicTorsionForce ordering="sideways"/>"#))
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidValue { .. }));
    }
}
