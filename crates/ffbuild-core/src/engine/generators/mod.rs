//! Force generators: one per force section tag of a definition source.
//!
//! A generator accumulates parameter entries from every section carrying its
//! tag ([`ForceGenerator::merge`]), then turns them into force terms for a
//! matched topology ([`ForceGenerator::create_force`]).

pub mod angles;
pub mod bonds;
pub mod cmap;
pub mod custom_nonbonded;
pub mod drude;
pub mod gbsa;
pub mod lennard_jones;
pub mod nonbonded;
pub mod torsions;

use super::config::{CreateSystemOptions, OptionKey};
use super::context::AssemblyData;
use super::error::AssemblyError;
use super::model::ForceModel;
use crate::core::error::LoadError;
use crate::core::forcefield::atom_type::AtomType;
use crate::core::forcefield::selector::TypeSelector;
use crate::core::io::xml::XmlNode;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Builds one kind of force from the parameter sections sharing its tag.
pub trait ForceGenerator: fmt::Debug + Send + Sync {
    /// The section tag this generator handles, e.g. `HarmonicBondForce`.
    fn tag(&self) -> &str;

    /// Adds the parameters of another section with this generator's tag.
    fn merge(&mut self, node: &XmlNode) -> Result<(), LoadError>;

    /// Whether `node` may merge into this instance. When it may not, a new
    /// generator instance is created for it.
    fn accepts_merge(&self, _node: &XmlNode) -> bool {
        true
    }

    /// Options this generator reads beyond those the assembler handles.
    fn consumed_options(&self) -> &'static [OptionKey] {
        &[]
    }

    /// Records equilibrium bond lengths needed to turn angle constraints into
    /// distance constraints. Runs for every generator before any force is
    /// created.
    fn assign_bond_lengths(&self, _data: &mut AssemblyData<'_>) {}

    fn create_force(
        &self,
        data: &AssemblyData<'_>,
        options: &CreateSystemOptions,
        model: &mut ForceModel,
    ) -> Result<(), AssemblyError>;

    /// Runs after every generator has created its force.
    fn post_process(
        &self,
        _data: &AssemblyData<'_>,
        _options: &CreateSystemOptions,
        _model: &mut ForceModel,
    ) -> Result<(), AssemblyError> {
        Ok(())
    }
}

pub type GeneratorConstructor = Box<dyn Fn() -> Box<dyn ForceGenerator> + Send + Sync>;

/// Maps section tags to generator constructors.
pub struct GeneratorRegistry {
    constructors: HashMap<String, GeneratorConstructor>,
}

impl fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("GeneratorRegistry").field("tags", &tags).finish()
    }
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl GeneratorRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry with every built-in generator.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(bonds::TAG, || Box::new(bonds::HarmonicBondGenerator::default()));
        registry.register(angles::TAG, || Box::new(angles::HarmonicAngleGenerator::default()));
        registry.register(torsions::TAG, || {
            Box::new(torsions::PeriodicTorsionGenerator::default())
        });
        registry.register(nonbonded::TAG, || Box::new(nonbonded::NonbondedGenerator::default()));
        registry.register(lennard_jones::TAG, || {
            Box::new(lennard_jones::LennardJonesGenerator::default())
        });
        registry.register(custom_nonbonded::TAG, || {
            Box::new(custom_nonbonded::CustomNonbondedGenerator::default())
        });
        registry.register(gbsa::TAG, || Box::new(gbsa::GbsaObcGenerator::default()));
        registry.register(cmap::TAG, || Box::new(cmap::CmapTorsionGenerator::default()));
        registry.register(drude::TAG, || Box::new(drude::DrudeGenerator::default()));
        registry
    }

    /// Registers (or replaces) the constructor for `tag`.
    pub fn register<F>(&mut self, tag: &str, constructor: F)
    where
        F: Fn() -> Box<dyn ForceGenerator> + Send + Sync + 'static,
    {
        self.constructors.insert(tag.to_string(), Box::new(constructor));
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    pub fn create(&self, tag: &str) -> Option<Box<dyn ForceGenerator>> {
        self.constructors.get(tag).map(|c| c())
    }
}

/// Enforces that repeated sections agree on a scale factor within a
/// relative tolerance of 1e-5.
pub(crate) fn merge_scale(
    kind: &'static str,
    attribute: &str,
    current: &mut Option<f64>,
    incoming: f64,
) -> Result<(), LoadError> {
    match *current {
        None => {
            *current = Some(incoming);
            Ok(())
        }
        Some(existing) => {
            let tolerance = 1e-5 * existing.abs().max(incoming.abs());
            if (existing - incoming).abs() > tolerance {
                Err(LoadError::conflict(
                    kind,
                    attribute,
                    format!("sections specify {existing} and {incoming}"),
                ))
            } else {
                Ok(())
            }
        }
    }
}

/// Repeated sections must agree on a boolean flag.
pub(crate) fn merge_flag(
    kind: &'static str,
    attribute: &str,
    current: &mut Option<bool>,
    incoming: Option<bool>,
) -> Result<(), LoadError> {
    match (*current, incoming) {
        (_, None) => Ok(()),
        (None, Some(v)) => {
            *current = Some(v);
            Ok(())
        }
        (Some(a), Some(b)) if a == b => Ok(()),
        (Some(a), Some(b)) => Err(LoadError::conflict(
            kind,
            attribute,
            format!("sections specify {a} and {b}"),
        )),
    }
}

/// Resolves `useDispersionCorrection` between the caller and the force field.
///
/// The caller's value wins; disagreeing with the force field is reported as a
/// warning on the model.
pub(crate) fn resolve_dispersion_correction(
    force: &str,
    requested: Option<bool>,
    declared: Option<bool>,
    default: bool,
    model: &mut ForceModel,
) -> bool {
    match (requested, declared) {
        (Some(r), Some(d)) if r != d => {
            model.warn(format!(
                "useDispersionCorrection={r} was passed to createSystem() but {force} specifies {d}; \
                 the argument takes precedence over the conflicting force field value"
            ));
            r
        }
        (Some(r), _) => r,
        (None, Some(d)) => d,
        (None, None) => default,
    }
}

/// Whether the atom types of a term match `selectors` in order or in
/// reverse order.
pub(crate) fn matches_either_direction(selectors: &[TypeSelector], types: &[&AtomType]) -> bool {
    let forward = selectors.iter().zip(types).all(|(s, t)| s.matches(t));
    forward || selectors.iter().zip(types.iter().rev()).all(|(s, t)| s.matches(t))
}

/// Reads `type1..typeN` (or `class1..classN`) selectors from a parameter entry.
pub(crate) fn read_selectors<const N: usize>(node: &XmlNode) -> Result<[TypeSelector; N], LoadError> {
    let mut selectors = Vec::with_capacity(N);
    for i in 1..=N {
        selectors.push(TypeSelector::from_node(node, &i.to_string())?);
    }
    selectors.try_into().map_err(|_| LoadError::Malformed {
        origin: node.name.clone(),
        reason: format!("expected {N} atom type selectors"),
    })
}

/// Per-type parameters from `<Atom type|class="..." key="value" .../>`
/// entries, with optional per-atom values taken from residue templates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtomParameters {
    entries: Vec<(TypeSelector, BTreeMap<String, f64>)>,
    from_residue: Vec<String>,
}

impl AtomParameters {
    /// Reads every `Atom` and `UseAttributeFromResidue` child of `section`.
    ///
    /// Each of `required` must be present on every `Atom` entry unless it is
    /// taken from residue templates.
    pub(crate) fn merge(&mut self, section: &XmlNode, required: &[&str]) -> Result<(), LoadError> {
        for node in section.children_named("UseAttributeFromResidue") {
            let name = node.required_attr("name")?.to_string();
            if !self.from_residue.contains(&name) {
                self.from_residue.push(name);
            }
        }
        for node in section.children_named("Atom") {
            let selector = TypeSelector::from_node(node, "")?;
            let mut values = BTreeMap::new();
            for (key, _) in node.attributes() {
                if key == "type" || key == "class" {
                    continue;
                }
                if let Some(v) = node.attr_f64(key)? {
                    values.insert(key.to_string(), v);
                }
            }
            for &key in required {
                if !values.contains_key(key) && !self.from_residue.iter().any(|r| r == key) {
                    return Err(LoadError::MissingAttribute {
                        element: node.name.clone(),
                        attribute: key.to_string(),
                    });
                }
            }
            self.entries.push((selector, values));
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The first entry whose selector matches `atom_type`.
    pub fn lookup(&self, atom_type: &AtomType) -> Option<&BTreeMap<String, f64>> {
        self.entries
            .iter()
            .find(|(selector, _)| selector.matches(atom_type))
            .map(|(_, values)| values)
    }

    pub fn uses_residue_attribute(&self, name: &str) -> bool {
        self.from_residue.iter().any(|r| r == name)
    }

    /// The values of `keys` for one atom, each from the residue template if
    /// so configured, otherwise from the matching entry.
    pub(crate) fn values_for(
        &self,
        term: &'static str,
        data: &AssemblyData<'_>,
        atom: usize,
        keys: &[&str],
    ) -> Result<Vec<f64>, AssemblyError> {
        let entry = self.lookup(data.atom_type(atom));
        keys.iter()
            .map(|&key| {
                let value = if self.uses_residue_attribute(key) {
                    data.template_attribute(atom, key)
                } else {
                    entry.and_then(|values| values.get(key).copied())
                };
                value.ok_or_else(|| missing_parameter(term, data, atom))
            })
            .collect()
    }
}

pub(crate) fn missing_parameter(term: &'static str, data: &AssemblyData<'_>, atom: usize) -> AssemblyError {
    let topology_atom = &data.topology.atoms()[atom];
    AssemblyError::MissingParameter {
        term,
        atom,
        atom_name: topology_atom.name.clone(),
        atom_type: data.atom_type(atom).name.clone(),
        residue_name: data.topology.residues()[topology_atom.residue].name.clone(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Small matched systems shared by generator tests.

    use crate::core::forcefield::atom_type::AtomType;
    use crate::core::forcefield::library::TemplateLibrary;
    use crate::core::forcefield::template::{Template, TemplateAtom};
    use crate::core::io::xml::XmlNode;
    use crate::core::models::element::Element;
    use crate::core::models::topology::Topology;
    use crate::engine::config::CreateSystemOptions;
    use crate::engine::context::AssemblyData;
    use crate::engine::matcher::TemplateMatch;
    use std::borrow::Cow;

    pub struct Molecule {
        pub topology: Topology,
        pub library: TemplateLibrary,
        pub template: Template,
    }

    /// A single-residue molecule. Each atom is `(name, type, element, charge)`;
    /// every type is registered with its element's mass and class equal to
    /// the type name unless listed in `classes`.
    pub fn molecule(
        residue: &str,
        atoms: &[(&str, &str, Option<&str>, f64)],
        bonds: &[(usize, usize)],
        classes: &[(&str, &str)],
    ) -> Molecule {
        let mut library = TemplateLibrary::new();
        let mut template = Template::new(residue);
        let mut topology = Topology::new();
        let chain = topology.add_chain("A");
        let res = topology.add_residue(residue, chain, None).unwrap();
        for &(name, ty, symbol, charge) in atoms {
            let element = symbol.and_then(Element::from_symbol);
            let class = classes
                .iter()
                .find(|(t, _)| *t == ty)
                .map_or(ty, |(_, c)| *c);
            let mass = element.map_or(0.0, |e| e.mass());
            library
                .register_atom_type(AtomType::new(ty, class, element, mass))
                .unwrap();
            template.add_atom(TemplateAtom::new(name, ty).with_attribute("charge", charge));
            topology.add_atom(name, element, res).unwrap();
        }
        for &(a, b) in bonds {
            template.add_bond(a, b);
            topology.add_bond(a, b).unwrap();
        }
        library.resolve_elements(&mut template).unwrap();
        Molecule {
            topology,
            library,
            template,
        }
    }

    impl Molecule {
        pub fn data(&self, options: &CreateSystemOptions) -> AssemblyData<'_> {
            let n = self.template.atoms.len();
            let matched = TemplateMatch {
                residue: 0,
                template: Cow::Borrowed(&self.template),
                atom_map: (0..n).map(Some).collect(),
            };
            AssemblyData::new(&self.topology, &self.library, vec![matched], options).unwrap()
        }
    }

    pub fn section(xml: &str) -> XmlNode {
        XmlNode::parse_str("test", xml).unwrap()
    }

    /// Butane-like chain C1-C2-C3-C4 with one hydrogen on each end carbon.
    pub fn chain() -> Molecule {
        molecule(
            "BUT",
            &[
                ("C1", "CT", Some("C"), -0.1),
                ("C2", "CT", Some("C"), 0.0),
                ("C3", "CT", Some("C"), 0.0),
                ("C4", "CT", Some("C"), -0.1),
                ("H1", "HC", Some("H"), 0.1),
                ("H4", "HC", Some("H"), 0.1),
            ],
            &[(0, 1), (1, 2), (2, 3), (0, 4), (3, 5)],
            &[],
        )
    }
}
