use super::assemble::{Definitions, SystemAssembler, match_residues};
use crate::core::error::LoadError;
use crate::core::forcefield::atom_type::AtomType;
use crate::core::forcefield::library::TemplateLibrary;
use crate::core::forcefield::patch::Patch;
use crate::core::forcefield::template::Template;
use crate::core::io::definitions::{parse_atom_type, parse_families, parse_patch, parse_template};
use crate::core::io::source::{DefinitionSource, LoadedSource, SourceLoader};
use crate::core::io::xml::XmlNode;
use crate::core::models::topology::Topology;
use crate::engine::callbacks::{Initializer, ScriptNamespace, TemplateGenerator, TemplateMatcher};
use crate::engine::config::CreateSystemOptions;
use crate::engine::error::AssemblyError;
use crate::engine::generators::{ForceGenerator, GeneratorRegistry};
use crate::engine::matcher::{MatchSettings, Resolution, ResidueGraph, ResidueMatcher, match_residue};
use crate::engine::model::ForceModel;
use crate::engine::progress::ProgressReporter;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Top-level elements of a definition source that are not force sections.
const STRUCTURAL_TAGS: [&str; 6] = [
    "AtomTypes",
    "Residues",
    "Patches",
    "Include",
    "Info",
    "InitializationScript",
];

/// A force field: the definitions loaded from XML sources plus the
/// caller-registered hooks, and the entry points that match topologies
/// against them and assemble force models.
///
/// Loading and registration take `&mut self`; matching and assembly take
/// `&self`, so one loaded force field can serve many threads at once.
pub struct ForceField {
    library: TemplateLibrary,
    generators: Vec<Box<dyn ForceGenerator>>,
    registry: GeneratorRegistry,
    template_matchers: Vec<Box<dyn TemplateMatcher>>,
    template_generators: Vec<Box<dyn TemplateGenerator>>,
    initializers: HashMap<String, Box<dyn Initializer>>,
    namespace: ScriptNamespace,
    search_paths: Vec<PathBuf>,
    families: BTreeMap<String, String>,
}

impl Default for ForceField {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ForceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForceField")
            .field("templates", &self.library.templates().len())
            .field("patches", &self.library.patches().len())
            .field("generators", &self.generators.iter().map(|g| g.tag()).collect::<Vec<_>>())
            .field("template_matchers", &self.template_matchers.len())
            .field("template_generators", &self.template_generators.len())
            .field("families", &self.families)
            .finish()
    }
}

impl ForceField {
    /// An empty force field knowing every built-in force section.
    pub fn new() -> Self {
        Self {
            library: TemplateLibrary::new(),
            generators: Vec::new(),
            registry: GeneratorRegistry::with_builtins(),
            template_matchers: Vec::new(),
            template_generators: Vec::new(),
            initializers: HashMap::new(),
            namespace: ScriptNamespace::new(),
            search_paths: Vec::new(),
            families: BTreeMap::new(),
        }
    }

    pub fn from_sources(sources: &[DefinitionSource]) -> Result<Self, LoadError> {
        let mut forcefield = Self::new();
        forcefield.load_sources(sources)?;
        Ok(forcefield)
    }

    /// Adds a directory searched for definition files and includes that are
    /// not found relative to their including file.
    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.push(path.into());
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        self.load_sources(&[DefinitionSource::file(path.as_ref())])
    }

    pub fn load_str(&mut self, name: &str, content: &str) -> Result<(), LoadError> {
        self.load_sources(&[DefinitionSource::text(name, content)])
    }

    /// Loads several definition sources, with their includes, as one unit.
    ///
    /// Atom types from every source are registered first, then residues,
    /// then patches, then force sections, then initialization scripts, so a
    /// source may use types declared by a later one.
    #[instrument(skip_all, name = "load_sources")]
    pub fn load_sources(&mut self, sources: &[DefinitionSource]) -> Result<(), LoadError> {
        let loaded = SourceLoader::new(&self.search_paths).load_all(sources)?;
        info!(documents = loaded.len(), "Loading force field definitions.");

        self.check_families(&loaded)?;

        for source in &loaded {
            for section in source.root.children_named("AtomTypes") {
                for node in section.children_named("Type") {
                    self.library.register_atom_type(parse_atom_type(node)?)?;
                }
            }
        }
        for source in &loaded {
            for section in source.root.children_named("Residues") {
                for node in section.children_named("Residue") {
                    self.library.register_residue_template(parse_template(node)?)?;
                }
            }
        }
        for source in &loaded {
            for section in source.root.children_named("Patches") {
                for node in section.children_named("Patch") {
                    if let Some(patch) = parse_patch(node)? {
                        self.library.register_patch(patch)?;
                    }
                }
            }
        }
        for source in &loaded {
            for node in &source.root.children {
                if STRUCTURAL_TAGS.contains(&node.name.as_str()) {
                    continue;
                }
                if self.registry.contains(&node.name) {
                    self.add_section(node)?;
                } else {
                    debug!(
                        tag = %node.name,
                        origin = %source.origin,
                        "Ignoring section with no registered generator."
                    );
                }
            }
        }
        for source in &loaded {
            for node in source.root.children_named("InitializationScript") {
                self.run_initializer(node)?;
            }
        }

        info!(
            templates = self.library.templates().len(),
            generators = self.generators.len(),
            "Force field definitions loaded."
        );
        Ok(())
    }

    fn check_families(&mut self, loaded: &[LoadedSource]) -> Result<(), LoadError> {
        let mut families = self.families.clone();
        for source in loaded {
            for info in source.root.children_named("Info") {
                for (family, version) in parse_families(info)? {
                    match families.get(&family) {
                        Some(existing) if *existing != version => {
                            return Err(LoadError::UnsupportedCombination(format!(
                                "'{}' uses {family} version {version}, but version {existing} is already loaded",
                                source.origin
                            )));
                        }
                        Some(_) => {}
                        None => {
                            families.insert(family, version);
                        }
                    }
                }
            }
        }
        self.families = families;
        Ok(())
    }

    /// Merges a force section into the first generator with its tag that
    /// accepts it, or starts a new generator.
    fn add_section(&mut self, node: &XmlNode) -> Result<(), LoadError> {
        let tag = node.name.as_str();
        if let Some(existing) = self
            .generators
            .iter_mut()
            .find(|g| g.tag() == tag && g.accepts_merge(node))
        {
            return existing.merge(node);
        }
        let Some(mut generator) = self.registry.create(tag) else {
            return Ok(());
        };
        generator.merge(node)?;
        debug!(tag, "Created force generator.");
        self.generators.push(generator);
        Ok(())
    }

    fn run_initializer(&mut self, node: &XmlNode) -> Result<(), LoadError> {
        let name = node.required_attr("name")?;
        let hook = self
            .initializers
            .get(name)
            .ok_or_else(|| LoadError::UnknownInitializer {
                name: name.to_string(),
            })?;
        hook.run(&mut self.namespace, &node.text)
            .map_err(|reason| LoadError::Initializer {
                name: name.to_string(),
                reason,
            })
    }

    pub fn register_atom_type(&mut self, atom_type: AtomType) -> Result<(), LoadError> {
        self.library.register_atom_type(atom_type)
    }

    pub fn register_residue_template(&mut self, template: Template) -> Result<(), LoadError> {
        self.library.register_residue_template(template)
    }

    pub fn register_patch(&mut self, patch: Patch) -> Result<(), LoadError> {
        self.library.register_patch(patch)
    }

    /// Appends an already configured force generator.
    pub fn register_generator(&mut self, generator: Box<dyn ForceGenerator>) {
        self.generators.push(generator);
    }

    /// Teaches the loader a new force section tag.
    pub fn register_generator_tag<F>(&mut self, tag: &str, constructor: F)
    where
        F: Fn() -> Box<dyn ForceGenerator> + Send + Sync + 'static,
    {
        self.registry.register(tag, constructor);
    }

    /// Matchers are consulted in registration order before signature matching.
    pub fn register_template_matcher(&mut self, matcher: impl TemplateMatcher + 'static) {
        self.template_matchers.push(Box::new(matcher));
    }

    /// Generators are consulted in registration order for residues nothing
    /// else matches.
    pub fn register_template_generator(&mut self, generator: impl TemplateGenerator + 'static) {
        self.template_generators.push(Box::new(generator));
    }

    pub fn register_initializer(&mut self, name: &str, hook: impl Initializer + 'static) {
        self.initializers.insert(name.to_string(), Box::new(hook));
    }

    pub fn library(&self) -> &TemplateLibrary {
        &self.library
    }

    pub fn generators(&self) -> &[Box<dyn ForceGenerator>] {
        &self.generators
    }

    pub fn namespace(&self) -> &ScriptNamespace {
        &self.namespace
    }

    fn definitions(&self) -> Definitions<'_> {
        Definitions {
            library: &self.library,
            generators: &self.generators,
            template_matchers: &self.template_matchers,
            template_generators: &self.template_generators,
        }
    }

    /// Residues no registered template, matcher or patch can match.
    /// Template generators are not consulted.
    pub fn unmatched_residues(&self, topology: &Topology, options: &CreateSystemOptions) -> Vec<usize> {
        let matcher = ResidueMatcher::new(topology, &self.library, &self.template_matchers, options);
        (0..topology.residues().len())
            .filter(|&residue| {
                matches!(
                    matcher.resolve(residue),
                    Resolution::Unmatched | Resolution::Failed(AssemblyError::NoTemplate { .. })
                )
            })
            .collect()
    }

    /// Untyped templates for the unmatched residues, one per distinct
    /// residue graph, together with the residue each was built from.
    ///
    /// Atom types are left empty for the caller to fill in before
    /// registering the templates.
    pub fn generate_templates_for_unmatched_residues(
        &self,
        topology: &Topology,
        options: &CreateSystemOptions,
    ) -> (Vec<Template>, Vec<usize>) {
        let settings = MatchSettings::from_options(options);
        let mut templates: Vec<Template> = Vec::new();
        let mut residues = Vec::new();
        for residue in self.unmatched_residues(topology, options) {
            let Some(graph) = ResidueGraph::new(topology, residue) else {
                continue;
            };
            if !match_residue(&graph, templates.iter(), settings).is_empty() {
                continue;
            }
            if let Some(template) = Template::from_residue(topology, residue) {
                templates.push(template);
                residues.push(residue);
            }
        }
        (templates, residues)
    }

    /// The template each residue matches, in residue order, including
    /// templates produced by template generators.
    pub fn matching_templates(
        &self,
        topology: &Topology,
        options: &CreateSystemOptions,
    ) -> Result<Vec<Template>, AssemblyError> {
        let matches = match_residues(&self.definitions(), topology, options, &ProgressReporter::new())?;
        Ok(matches.into_iter().map(|m| m.template.into_owned()).collect())
    }

    pub fn create_system(
        &self,
        topology: &Topology,
        options: &CreateSystemOptions,
    ) -> Result<ForceModel, AssemblyError> {
        self.create_system_with_progress(topology, options, &ProgressReporter::new())
    }

    /// Matches every residue and assembles the force model.
    ///
    /// Either every residue is matched and every generator succeeds, or an
    /// error is returned and no model is produced.
    pub fn create_system_with_progress(
        &self,
        topology: &Topology,
        options: &CreateSystemOptions,
        reporter: &ProgressReporter,
    ) -> Result<ForceModel, AssemblyError> {
        SystemAssembler::new(self.definitions(), topology, options, reporter).run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::element::Element;
    use crate::engine::config::{Constraints, OptionKey};
    use crate::engine::context::AssemblyData;
    use crate::engine::progress::Progress;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const BASE: &str = r#"
<ForceField>
  <Info><Family name="example" version="1"/></Info>
  <AtomTypes>
    <Type name="tip3p-O" class="OW" element="O" mass="15.99943"/>
    <Type name="tip3p-H" class="HW" element="H" mass="1.007947"/>
    <Type name="CT" class="CT" element="C" mass="12.01"/>
    <Type name="HC" class="HC" element="H" mass="1.008"/>
  </AtomTypes>
  <Residues>
    <Residue name="HOH">
      <Atom name="O" type="tip3p-O" charge="-0.834"/>
      <Atom name="H1" type="tip3p-H" charge="0.417"/>
      <Atom name="H2" type="tip3p-H" charge="0.417"/>
      <Bond atomName1="O" atomName2="H1"/>
      <Bond atomName1="O" atomName2="H2"/>
    </Residue>
    <Residue name="ETH">
      <Atom name="C1" type="CT" charge="-0.06"/>
      <Atom name="C2" type="CT" charge="-0.06"/>
      <Atom name="H11" type="HC" charge="0.02"/>
      <Atom name="H12" type="HC" charge="0.02"/>
      <Atom name="H13" type="HC" charge="0.02"/>
      <Atom name="H21" type="HC" charge="0.02"/>
      <Atom name="H22" type="HC" charge="0.02"/>
      <Atom name="H23" type="HC" charge="0.02"/>
      <Bond atomName1="C1" atomName2="C2"/>
      <Bond atomName1="C1" atomName2="H11"/>
      <Bond atomName1="C1" atomName2="H12"/>
      <Bond atomName1="C1" atomName2="H13"/>
      <Bond atomName1="C2" atomName2="H21"/>
      <Bond atomName1="C2" atomName2="H22"/>
      <Bond atomName1="C2" atomName2="H23"/>
    </Residue>
  </Residues>
  <HarmonicBondForce>
    <Bond class1="OW" class2="HW" length="0.09572" k="462750.4"/>
    <Bond class1="CT" class2="CT" length="0.1526" k="259408.0"/>
    <Bond class1="CT" class2="HC" length="0.109" k="284512.0"/>
  </HarmonicBondForce>
  <HarmonicAngleForce>
    <Angle class1="HW" class2="OW" class3="HW" angle="1.82421813418" k="836.8"/>
    <Angle class1="HC" class2="CT" class3="HC" angle="1.881" k="276.144"/>
    <Angle class1="CT" class2="CT" class3="HC" angle="1.911" k="418.4"/>
  </HarmonicAngleForce>
  <PeriodicTorsionForce>
    <Proper class1="" class2="CT" class3="CT" class4="" periodicity1="3" phase1="0.0" k1="0.6276"/>
  </PeriodicTorsionForce>
  <NonbondedForce coulomb14scale="0.833333" lj14scale="0.5">
    <UseAttributeFromResidue name="charge"/>
    <Atom type="tip3p-O" sigma="0.315" epsilon="0.635"/>
    <Atom type="tip3p-H" sigma="1" epsilon="0"/>
    <Atom type="CT" sigma="0.34" epsilon="0.457"/>
    <Atom type="HC" sigma="0.265" epsilon="0.0657"/>
  </NonbondedForce>
</ForceField>"#;

    fn forcefield() -> ForceField {
        ForceField::from_sources(&[DefinitionSource::text("base", BASE)]).unwrap()
    }

    fn add_water(top: &mut Topology, chain: usize) -> usize {
        let res = top.add_residue("HOH", chain, None).unwrap();
        let o = top.add_atom("O", Some(Element::OXYGEN), res).unwrap();
        for name in ["H1", "H2"] {
            let h = top.add_atom(name, Some(Element::HYDROGEN), res).unwrap();
            top.add_bond(o, h).unwrap();
        }
        res
    }

    fn add_ethane(top: &mut Topology, chain: usize) -> usize {
        let res = top.add_residue("ETH", chain, None).unwrap();
        let c1 = top.add_atom("C1", Some(Element::CARBON), res).unwrap();
        let c2 = top.add_atom("C2", Some(Element::CARBON), res).unwrap();
        top.add_bond(c1, c2).unwrap();
        for (carbon, names) in [(c1, ["H11", "H12", "H13"]), (c2, ["H21", "H22", "H23"])] {
            for name in names {
                let h = top.add_atom(name, Some(Element::HYDROGEN), res).unwrap();
                top.add_bond(carbon, h).unwrap();
            }
        }
        res
    }

    fn add_methane(top: &mut Topology, chain: usize, name: &str) -> usize {
        let res = top.add_residue(name, chain, None).unwrap();
        let c = top.add_atom("C", Some(Element::CARBON), res).unwrap();
        for h in ["H1", "H2", "H3", "H4"] {
            let atom = top.add_atom(h, Some(Element::HYDROGEN), res).unwrap();
            top.add_bond(c, atom).unwrap();
        }
        res
    }

    /// Ethane (atoms 0..8) followed by one water (atoms 8..11).
    fn ethane_and_water() -> Topology {
        let mut top = Topology::new();
        let chain = top.add_chain("A");
        add_ethane(&mut top, chain);
        let chain = top.add_chain("W");
        add_water(&mut top, chain);
        top
    }

    #[test]
    fn forcefield_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ForceField>();
    }

    #[test]
    fn sections_with_the_same_tag_share_one_generator() {
        let mut ff = forcefield();
        assert_eq!(ff.generators().len(), 4);
        ff.load_str(
            "extra",
            r#"<ForceField>
                 <HarmonicBondForce><Bond class1="HW" class2="HW" length="0.15" k="1000"/></HarmonicBondForce>
                 <CustomNonbondedForce energy="a1*a2/r"><PerParticleParameter name="a"/></CustomNonbondedForce>
                 <CustomNonbondedForce energy="b1*b2/r^2"><PerParticleParameter name="b"/></CustomNonbondedForce>
                 <AmoebaVdwForce/>
               </ForceField>"#,
        )
        .unwrap();
        let tags: Vec<&str> = ff.generators().iter().map(|g| g.tag()).collect();
        assert_eq!(
            tags,
            vec![
                "HarmonicBondForce",
                "HarmonicAngleForce",
                "PeriodicTorsionForce",
                "NonbondedForce",
                "CustomNonbondedForce",
                "CustomNonbondedForce",
            ]
        );
    }

    #[test]
    fn default_options_keep_water_rigid() {
        let ff = forcefield();
        let model = ff
            .create_system(&ethane_and_water(), &CreateSystemOptions::default())
            .unwrap();
        assert_eq!(model.num_particles(), 11);
        assert_eq!(model.num_constraints(), 3);
        assert_eq!(model.harmonic_bonds().count(), 7);
        assert_eq!(model.harmonic_angles().count(), 12);
        assert_eq!(model.periodic_torsions().count(), 9);
        assert!(model.periodic_torsions().all(|t| t.periodicity == 3));
        let nb = model.nonbonded().unwrap();
        assert_eq!(nb.particles[8].charge, -0.834);
        assert!(model.remove_cm_motion());
        assert!(model.warnings().is_empty());
    }

    #[test]
    fn constraint_policies_replace_harmonic_terms() {
        let ff = forcefield();
        let top = ethane_and_water();

        let hbonds = ff
            .create_system(&top, &CreateSystemOptions::default().constraints(Constraints::HBonds))
            .unwrap();
        assert_eq!(hbonds.num_constraints(), 9);
        assert_eq!(hbonds.harmonic_bonds().count(), 1);

        let hangles = ff
            .create_system(&top, &CreateSystemOptions::default().constraints(Constraints::HAngles))
            .unwrap();
        assert_eq!(hangles.num_constraints(), 16);
        assert_eq!(hangles.harmonic_bonds().count(), 0);
        assert_eq!(hangles.harmonic_angles().count(), 6);

        let flexible_water = ff
            .create_system(&top, &CreateSystemOptions::default().rigid_water(false))
            .unwrap();
        assert_eq!(flexible_water.num_constraints(), 0);
        assert_eq!(flexible_water.harmonic_bonds().count(), 9);
        assert_eq!(flexible_water.harmonic_angles().count(), 13);
    }

    #[test]
    fn flexible_constraints_keep_harmonic_terms() {
        let ff = forcefield();
        let options = CreateSystemOptions::default()
            .constraints(Constraints::HBonds)
            .flexible_constraints(true);
        let model = ff.create_system(&ethane_and_water(), &options).unwrap();
        assert_eq!(model.num_constraints(), 9);
        assert_eq!(model.harmonic_bonds().count(), 9);
        assert_eq!(model.harmonic_angles().count(), 13);
    }

    #[test]
    fn constraint_table_covers_every_policy_combination() {
        let ff = forcefield();
        let top = ethane_and_water();
        // Ethane has 7 bonds (6 C-H) and 12 angles (6 H-C-H); water has 2 bonds and 1 angle.
        let policies = [
            (Constraints::None, 0, 0),
            (Constraints::HBonds, 6, 0),
            (Constraints::AllBonds, 7, 0),
            (Constraints::HAngles, 7, 6),
        ];
        for (constraints, solute_bonds, solute_angles) in policies {
            for rigid in [true, false] {
                let (water_bonds, water_angles) = if rigid { (2, 1) } else { (0, 0) };
                let bond_constraints = solute_bonds + water_bonds;
                let angle_constraints = solute_angles + water_angles;
                for flexible in [false, true] {
                    let options = CreateSystemOptions::default()
                        .constraints(constraints)
                        .rigid_water(rigid)
                        .flexible_constraints(flexible);
                    let model = ff.create_system(&top, &options).unwrap();
                    let case = format!("{constraints:?} rigid={rigid} flexible={flexible}");

                    assert_eq!(model.num_constraints(), bond_constraints + angle_constraints, "{case}");
                    let (bonds, angles) = if flexible {
                        (9, 13)
                    } else {
                        (9 - bond_constraints, 13 - angle_constraints)
                    };
                    assert_eq!(model.harmonic_bonds().count(), bonds, "{case}");
                    assert_eq!(model.harmonic_angles().count(), angles, "{case}");
                    if !rigid {
                        assert!((8..11).all(|w| (0..11).all(|a| !model.is_constrained(w, a))), "{case}");
                    }
                }
            }
        }
    }

    #[test]
    fn flexible_hangles_keep_every_harmonic_term() {
        let ff = forcefield();
        let top = ethane_and_water();
        let hangles = CreateSystemOptions::default().constraints(Constraints::HAngles);
        let rigid = ff.create_system(&top, &hangles).unwrap();
        let flexible = ff
            .create_system(&top, &hangles.clone().flexible_constraints(true))
            .unwrap();
        let unconstrained = ff
            .create_system(
                &top,
                &CreateSystemOptions::default()
                    .constraints(Constraints::None)
                    .rigid_water(false),
            )
            .unwrap();

        assert_eq!(flexible.num_constraints(), rigid.num_constraints());
        assert!(flexible.harmonic_bonds().count() > rigid.harmonic_bonds().count());
        assert_eq!(flexible.harmonic_bonds().count(), unconstrained.harmonic_bonds().count());
        assert_eq!(flexible.harmonic_angles().count(), unconstrained.harmonic_angles().count());
    }

    #[test]
    fn hydrogen_mass_repartitioning_conserves_total_mass() {
        let ff = forcefield();
        let top = ethane_and_water();
        let plain = ff.create_system(&top, &CreateSystemOptions::default()).unwrap();
        let heavy = ff
            .create_system(&top, &CreateSystemOptions::default().hydrogen_mass(4.0))
            .unwrap();
        assert!((plain.total_mass() - heavy.total_mass()).abs() < 1e-9);
        assert_eq!(heavy.particle_mass(2), Some(4.0));
        assert!((heavy.particle_mass(0).unwrap() - (12.01 - 3.0 * (4.0 - 1.008))).abs() < 1e-9);
        assert_eq!(heavy.particle_mass(9), Some(1.007947));
    }

    #[test]
    fn identical_redefinitions_are_accepted_and_conflicts_rejected() {
        let mut ff = forcefield();
        ff.load_str(
            "same",
            r#"<ForceField><AtomTypes><Type name="CT" class="CT" element="C" mass="12.01"/></AtomTypes></ForceField>"#,
        )
        .unwrap();
        let err = ff
            .load_str(
                "different",
                r#"<ForceField><AtomTypes><Type name="CT" class="CT" element="C" mass="13.0"/></AtomTypes></ForceField>"#,
            )
            .unwrap_err();
        assert!(matches!(err, LoadError::Conflict { .. }));
    }

    #[test]
    fn override_replaces_a_template() {
        let water = |attrs: &str, charge: f64| {
            format!(
                r#"<ForceField><Residues><Residue name="HOH"{attrs}>
                     <Atom name="O" type="tip3p-O" charge="{}"/>
                     <Atom name="H1" type="tip3p-H" charge="{charge}"/>
                     <Atom name="H2" type="tip3p-H" charge="{charge}"/>
                     <Bond atomName1="O" atomName2="H1"/>
                     <Bond atomName1="O" atomName2="H2"/>
                   </Residue></Residues></ForceField>"#,
                -2.0 * charge
            )
        };
        let mut ff = forcefield();
        let err = ff.load_str("plain", &water("", 0.4)).unwrap_err();
        assert!(matches!(err, LoadError::Conflict { .. }));

        ff.load_str("override", &water(r#" override="1""#, 0.4)).unwrap();
        let model = ff
            .create_system(&ethane_and_water(), &CreateSystemOptions::default())
            .unwrap();
        assert_eq!(model.nonbonded().unwrap().particles[8].charge, -0.8);
    }

    #[test]
    fn includes_resolve_relative_to_the_including_file() {
        let dir = tempfile::tempdir().unwrap();
        let types = r#"<ForceField>
            <Include file="main.xml"/>
            <AtomTypes><Type name="Ne" element="Ne" mass="20.18"/></AtomTypes>
          </ForceField>"#;
        let main = r#"<ForceField>
            <Include file="types.xml"/>
            <Residues><Residue name="NE"><Atom name="NE" type="Ne"/></Residue></Residues>
            <NonbondedForce coulomb14scale="1" lj14scale="1"><Atom type="Ne" charge="0" sigma="0.28" epsilon="0.3"/></NonbondedForce>
          </ForceField>"#;
        fs::write(dir.path().join("types.xml"), types).unwrap();
        fs::write(dir.path().join("main.xml"), main).unwrap();

        let mut ff = ForceField::new();
        ff.add_search_path(dir.path());
        ff.load_file("main.xml").unwrap();
        assert!(ff.library().template("NE").is_some());

        let mut top = Topology::new();
        let chain = top.add_chain("A");
        let res = top.add_residue("NE", chain, None).unwrap();
        top.add_atom("NE", Element::from_symbol("Ne"), res).unwrap();
        let model = ff.create_system(&top, &CreateSystemOptions::default()).unwrap();
        assert_eq!(model.particle_mass(0), Some(20.18));
    }

    #[test]
    fn mixing_family_versions_is_unsupported() {
        let mut ff = forcefield();
        ff.load_str("same", r#"<ForceField><Info><Family name="example" version="1"/></Info></ForceField>"#)
            .unwrap();
        let err = ff
            .load_str("newer", r#"<ForceField><Info><Family name="example" version="2"/></Info></ForceField>"#)
            .unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedCombination(_)));
    }

    #[test]
    fn initialization_scripts_run_registered_hooks() {
        let mut ff = ForceField::new();
        ff.register_initializer("define", |ns: &mut ScriptNamespace, body: &str| -> Result<(), String> {
            let (key, value) = body.trim().split_once('=').ok_or("expected key=value")?;
            ns.set(key.trim(), value.trim());
            Ok(())
        });
        ff.load_str(
            "script",
            r#"<ForceField><InitializationScript name="define">solvent = tip3p</InitializationScript></ForceField>"#,
        )
        .unwrap();
        assert_eq!(ff.namespace().get("solvent"), Some("tip3p"));

        let err = ff
            .load_str(
                "unknown",
                r#"<ForceField><InitializationScript name="python">x = 1</InitializationScript></ForceField>"#,
            )
            .unwrap_err();
        assert!(matches!(err, LoadError::UnknownInitializer { .. }));
    }

    #[test]
    fn missing_hydrogen_is_diagnosed() {
        let ff = forcefield();
        let mut top = Topology::new();
        let chain = top.add_chain("W");
        let res = top.add_residue("HOH", chain, None).unwrap();
        let o = top.add_atom("O", Some(Element::OXYGEN), res).unwrap();
        let h = top.add_atom("H1", Some(Element::HYDROGEN), res).unwrap();
        top.add_bond(o, h).unwrap();

        let err = ff.create_system(&top, &CreateSystemOptions::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "No template found for residue 1 (HOH).  The set of heavy atoms matches HOH, but the residue \
             is missing 1 H atom. You may be able to add it with addHydrogens()."
        );
    }

    #[test]
    fn unsupported_elements_are_diagnosed() {
        let ff = forcefield();
        let mut top = Topology::new();
        let chain = top.add_chain("A");
        let res = top.add_residue("XX", chain, None).unwrap();
        let he = top.add_atom("HE", Element::from_symbol("He"), res).unwrap();
        let b = top.add_atom("B", Element::from_symbol("B"), res).unwrap();
        top.add_bond(he, b).unwrap();
        let err = ff.create_system(&top, &CreateSystemOptions::default()).unwrap_err();
        assert!(err.to_string().contains(
            "The residue contains He atoms and B atoms, which are not supported by any template in the force field."
        ));
    }

    #[test]
    fn failures_are_aggregated_unless_fail_fast() {
        let ff = forcefield();
        let mut top = Topology::new();
        let chain = top.add_chain("A");
        add_methane(&mut top, chain, "MET");
        add_water(&mut top, chain);
        add_methane(&mut top, chain, "MET");

        let err = ff.create_system(&top, &CreateSystemOptions::default()).unwrap_err();
        let residues: Vec<String> = err.residue_failures().iter().map(|e| e.to_string()).collect();
        assert_eq!(residues.len(), 2);
        assert!(residues[0].starts_with("No template found for residue 1 (MET)."));
        assert!(residues[1].starts_with("No template found for residue 3 (MET)."));

        let err = ff
            .create_system(&top, &CreateSystemOptions::default().fail_fast(true))
            .unwrap_err();
        assert!(matches!(err, AssemblyError::NoTemplate { residue: 0, .. }));
    }

    #[test]
    fn residue_templates_force_a_choice() {
        let ff = forcefield();
        let top = ethane_and_water();
        let model = ff
            .create_system(&top, &CreateSystemOptions::default().residue_template(1, "HOH"))
            .unwrap();
        assert_eq!(model.num_particles(), 11);

        let err = ff
            .create_system(&top, &CreateSystemOptions::default().residue_template(0, "HOH"))
            .unwrap_err();
        assert!(err.to_string().contains("The template HOH requested in residueTemplates does not match the residue."));

        let err = ff
            .create_system(&top, &CreateSystemOptions::default().residue_template(0, "PROPANE"))
            .unwrap_err();
        assert!(err.to_string().contains("is not defined"));
    }

    #[test]
    fn template_matchers_break_ties() {
        let mut ff = forcefield();
        ff.load_str(
            "alternate",
            r#"<ForceField><Residues><Residue name="HOH-ALT">
                 <Atom name="O" type="tip3p-O" charge="-0.8"/>
                 <Atom name="H1" type="tip3p-H" charge="0.4"/>
                 <Atom name="H2" type="tip3p-H" charge="0.4"/>
                 <Bond atomName1="O" atomName2="H1"/>
                 <Bond atomName1="O" atomName2="H2"/>
               </Residue></Residues></ForceField>"#,
        )
        .unwrap();
        let top = ethane_and_water();
        let err = ff.create_system(&top, &CreateSystemOptions::default()).unwrap_err();
        assert!(matches!(err, AssemblyError::AmbiguousTemplate { ref candidates, .. } if candidates.len() == 2));

        ff.register_template_matcher(|_: &TemplateLibrary, residue: &ResidueGraph<'_>, _: MatchSettings| {
            (residue.name() == "HOH").then(|| "HOH-ALT".to_string())
        });
        let model = ff.create_system(&top, &CreateSystemOptions::default()).unwrap();
        assert_eq!(model.nonbonded().unwrap().particles[8].charge, -0.8);
    }

    fn methane_generator(calls: Arc<AtomicUsize>) -> impl TemplateGenerator + 'static {
        move |_: &TemplateLibrary, residue: &ResidueGraph<'_>| -> Option<Template> {
            calls.fetch_add(1, Ordering::SeqCst);
            let mut template = Template::from_residue(residue.topology, residue.residue)?;
            template.name = "GEN-MET".to_string();
            for atom in &mut template.atoms {
                let (atom_type, charge) = if atom.element == Some(Element::CARBON) {
                    ("CT", -0.4)
                } else {
                    ("HC", 0.1)
                };
                atom.atom_type = atom_type.to_string();
                atom.attributes.insert("charge".to_string(), charge);
            }
            Some(template)
        }
    }

    #[test]
    fn template_generators_cover_unmatched_residues_once_per_call() {
        let mut ff = forcefield();
        let mut top = Topology::new();
        let chain = top.add_chain("A");
        add_methane(&mut top, chain, "MET");
        add_methane(&mut top, chain, "MET");
        let options = CreateSystemOptions::default();
        assert_eq!(ff.unmatched_residues(&top, &options), vec![0, 1]);

        let calls = Arc::new(AtomicUsize::new(0));
        ff.register_template_generator(methane_generator(calls.clone()));
        let model = ff.create_system(&top, &options).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.nonbonded().unwrap().particles[5].charge, -0.4);
        assert_eq!(model.harmonic_angles().count(), 12);
        assert!(ff.library().template("GEN-MET").is_none());

        let names: Vec<String> = ff
            .matching_templates(&top, &options)
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["GEN-MET".to_string(), "GEN-MET".to_string()]);
    }

    #[test]
    fn template_generator_errors_are_aggregated_unless_fail_fast() {
        let mut ff = forcefield();
        ff.register_template_generator(|_: &TemplateLibrary, residue: &ResidueGraph<'_>| -> Option<Template> {
            let mut template = Template::from_residue(residue.topology, residue.residue)?;
            for atom in &mut template.atoms {
                atom.atom_type = "UNKNOWN".to_string();
            }
            Some(template)
        });
        let mut top = Topology::new();
        let chain = top.add_chain("A");
        add_methane(&mut top, chain, "MET");
        add_water(&mut top, chain);
        add_methane(&mut top, chain, "MET");

        let err = ff.create_system(&top, &CreateSystemOptions::default()).unwrap_err();
        let failures = match err {
            AssemblyError::Unmatched(failures) => failures,
            other => panic!("expected aggregated failures, got {other:?}"),
        };
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|e| matches!(e, AssemblyError::GeneratedTemplate { .. })));

        let err = ff
            .create_system(&top, &CreateSystemOptions::default().fail_fast(true))
            .unwrap_err();
        assert!(matches!(err, AssemblyError::GeneratedTemplate { .. }));
    }

    #[test]
    fn unmatched_residues_yield_one_untyped_template_per_graph() {
        let ff = forcefield();
        let mut top = Topology::new();
        let chain = top.add_chain("A");
        add_methane(&mut top, chain, "MET");
        add_water(&mut top, chain);
        add_methane(&mut top, chain, "MET");
        let (templates, residues) =
            ff.generate_templates_for_unmatched_residues(&top, &CreateSystemOptions::default());
        assert_eq!(residues, vec![0]);
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].atoms.len(), 5);
        assert!(templates[0].atoms.iter().all(|a| a.atom_type.is_empty()));
    }

    #[test]
    fn options_nothing_consumes_are_rejected() {
        let ff = forcefield();
        let top = ethane_and_water();
        ff.create_system(&top, &CreateSystemOptions::default().drude_mass(0.4))
            .unwrap();

        let err = ff
            .create_system(&top, &CreateSystemOptions::default().drude_mass(0.5))
            .unwrap_err();
        assert!(matches!(err, AssemblyError::UnrecognizedOption { ref name } if name == "drudeMass"));

        let mut options = CreateSystemOptions::default();
        options.set("nonbondedCutof", 0.9).unwrap();
        let err = ff.create_system(&top, &options).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The argument 'nonbondedCutof' was specified to createSystem() but was never used."
        );
    }

    #[derive(Debug, Default)]
    struct InducedDipoles;

    impl ForceGenerator for InducedDipoles {
        fn tag(&self) -> &str {
            "AmoebaMultipoleForce"
        }

        fn merge(&mut self, _node: &XmlNode) -> Result<(), LoadError> {
            Ok(())
        }

        fn consumed_options(&self) -> &'static [OptionKey] {
            &[OptionKey::Polarization, OptionKey::MutualInducedTargetEpsilon]
        }

        fn create_force(
            &self,
            _data: &AssemblyData<'_>,
            _options: &CreateSystemOptions,
            _model: &mut ForceModel,
        ) -> Result<(), AssemblyError> {
            Ok(())
        }
    }

    #[test]
    fn polarization_options_need_a_generator_that_reads_them() {
        let mut ff = forcefield();
        let top = ethane_and_water();
        let mut options = CreateSystemOptions::default();
        options.set("polarization", "direct").unwrap();
        options.set("mutualInducedTargetEpsilon", 1e-6).unwrap();

        let err = ff.create_system(&top, &options).unwrap_err();
        assert!(matches!(err, AssemblyError::UnrecognizedOption { ref name } if name == "polarization"));

        ff.register_generator_tag("AmoebaMultipoleForce", || -> Box<dyn ForceGenerator> {
            Box::new(InducedDipoles)
        });
        ff.load_str("amoeba", "<ForceField><AmoebaMultipoleForce/></ForceField>")
            .unwrap();
        ff.create_system(&top, &options).unwrap();
    }

    #[test]
    fn dispersion_conflicts_warn_and_the_caller_wins() {
        let mut ff = forcefield();
        ff.load_str(
            "dispersion",
            r#"<ForceField><NonbondedForce coulomb14scale="0.833333" lj14scale="0.5" useDispersionCorrection="false"/></ForceField>"#,
        )
        .unwrap();
        let messages = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|e| {
            if let Progress::Message(text) = e {
                messages.lock().unwrap().push(text);
            }
        }));
        let model = ff
            .create_system_with_progress(
                &ethane_and_water(),
                &CreateSystemOptions::default().use_dispersion_correction(true),
                &reporter,
            )
            .unwrap();
        drop(reporter);
        assert!(model.nonbonded().unwrap().use_dispersion_correction);
        assert_eq!(model.warnings().len(), 1);
        assert!(model.warnings()[0].contains("conflict"));
        assert_eq!(messages.into_inner().unwrap(), model.warnings());
    }

    #[test]
    fn progress_is_reported_per_phase() {
        let ff = forcefield();
        let events = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|e| {
            if let Progress::PhaseStart { name } = e {
                events.lock().unwrap().push(name);
            }
        }));
        ff.create_system_with_progress(&ethane_and_water(), &CreateSystemOptions::default(), &reporter)
            .unwrap();
        drop(reporter);
        assert_eq!(events.into_inner().unwrap(), vec!["Matching", "Generating", "Finalizing"]);
    }
}
