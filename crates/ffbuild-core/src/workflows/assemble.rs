use crate::core::forcefield::library::TemplateLibrary;
use crate::core::forcefield::template::Template;
use crate::core::models::element::Element;
use crate::core::models::topology::Topology;
use crate::engine::callbacks::{TemplateGenerator, TemplateMatcher};
use crate::engine::config::{ConfigError, CreateSystemOptions, NonbondedMethod, OptionKey};
use crate::engine::context::AssemblyData;
use crate::engine::error::AssemblyError;
use crate::engine::generators::ForceGenerator;
use crate::engine::matcher::{Resolution, ResidueMatcher, TemplateMatch};
use crate::engine::model::{ForceModel, VirtualSite};
use crate::engine::progress::{Progress, ProgressReporter};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, instrument};

/// Options read by the assembler itself rather than by a force generator.
const ASSEMBLER_OPTIONS: [OptionKey; 11] = [
    OptionKey::NonbondedMethod,
    OptionKey::NonbondedCutoff,
    OptionKey::Constraints,
    OptionKey::RigidWater,
    OptionKey::FlexibleConstraints,
    OptionKey::RemoveCMMotion,
    OptionKey::HydrogenMass,
    OptionKey::ResidueTemplates,
    OptionKey::IgnoreExternalBonds,
    OptionKey::IgnoreExtraParticles,
    OptionKey::FailFast,
];

/// Stages of one `create_system` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    Idle,
    Matching,
    Generating,
    Finalizing,
    Done,
    Failed,
}

impl AssemblyState {
    pub fn name(self) -> &'static str {
        match self {
            AssemblyState::Idle => "Idle",
            AssemblyState::Matching => "Matching",
            AssemblyState::Generating => "Generating",
            AssemblyState::Finalizing => "Finalizing",
            AssemblyState::Done => "Done",
            AssemblyState::Failed => "Failed",
        }
    }
}

impl fmt::Display for AssemblyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a call borrows from the force field.
pub(crate) struct Definitions<'a> {
    pub library: &'a TemplateLibrary,
    pub generators: &'a [Box<dyn ForceGenerator>],
    pub template_matchers: &'a [Box<dyn TemplateMatcher>],
    pub template_generators: &'a [Box<dyn TemplateGenerator>],
}

/// Matches every residue to a template.
///
/// Residues are resolved in parallel; template generators then run in
/// residue order for whatever is left, sharing the templates they produce.
/// Failures are collected in residue order unless `fail_fast` is set.
pub(crate) fn match_residues<'a>(
    defs: &Definitions<'a>,
    topology: &'a Topology,
    options: &'a CreateSystemOptions,
    reporter: &ProgressReporter,
) -> Result<Vec<TemplateMatch<'a>>, AssemblyError> {
    let matcher = ResidueMatcher::new(topology, defs.library, defs.template_matchers, options);
    let resolutions = matcher.resolve_all(reporter);

    let mut generated: Vec<Template> = Vec::new();
    let mut matches = Vec::with_capacity(resolutions.len());
    let mut failures = Vec::new();
    for (residue, resolution) in resolutions.into_iter().enumerate() {
        let failure = match resolution {
            Resolution::Matched(m) => {
                matches.push(m);
                continue;
            }
            Resolution::Failed(error) => error,
            Resolution::Unmatched => match matcher.generate(residue, defs.template_generators, &mut generated) {
                Ok(Some(m)) => {
                    matches.push(m);
                    continue;
                }
                Ok(None) => matcher.failure(residue),
                Err(error) => error,
            },
        };
        if options.fail_fast {
            return Err(failure);
        }
        failures.push(failure);
    }

    match failures.len() {
        0 => Ok(matches),
        1 => Err(failures.remove(0)),
        _ => Err(AssemblyError::Unmatched(failures)),
    }
}

/// Drives one `create_system` call through its states.
pub(crate) struct SystemAssembler<'a> {
    defs: Definitions<'a>,
    topology: &'a Topology,
    options: &'a CreateSystemOptions,
    reporter: &'a ProgressReporter<'a>,
    state: AssemblyState,
}

impl<'a> SystemAssembler<'a> {
    pub(crate) fn new(
        defs: Definitions<'a>,
        topology: &'a Topology,
        options: &'a CreateSystemOptions,
        reporter: &'a ProgressReporter<'a>,
    ) -> Self {
        Self {
            defs,
            topology,
            options,
            reporter,
            state: AssemblyState::Idle,
        }
    }

    fn transition(&mut self, next: AssemblyState) {
        info!(from = %self.state, to = %next, "Assembly state change.");
        self.state = next;
    }

    #[instrument(skip_all, name = "create_system")]
    pub(crate) fn run(mut self) -> Result<ForceModel, AssemblyError> {
        match self.execute() {
            Ok(model) => {
                self.transition(AssemblyState::Done);
                Ok(model)
            }
            Err(error) => {
                self.transition(AssemblyState::Failed);
                Err(error)
            }
        }
    }

    fn execute(&mut self) -> Result<ForceModel, AssemblyError> {
        validate_options(self.defs.generators, self.topology, self.options)?;
        let reporter = self.reporter;

        self.transition(AssemblyState::Matching);
        let matches = reporter.phase(AssemblyState::Matching.name(), || {
            reporter.report(Progress::TaskStart {
                total_steps: self.topology.residues().len() as u64,
            });
            let matches = match_residues(&self.defs, self.topology, self.options, reporter)?;
            reporter.report(Progress::TaskFinish);
            Ok::<_, AssemblyError>(matches)
        })?;
        info!(residues = matches.len(), "All residues matched to templates.");

        self.transition(AssemblyState::Generating);
        let (data, mut model) = reporter.phase(AssemblyState::Generating.name(), || {
            let mut data = AssemblyData::new(self.topology, self.defs.library, matches, self.options)?;
            let model = self.generate(&mut data)?;
            Ok::<_, AssemblyError>((data, model))
        })?;

        self.transition(AssemblyState::Finalizing);
        reporter.phase(AssemblyState::Finalizing.name(), || {
            if let Some(hydrogen_mass) = self.options.hydrogen_mass {
                repartition_hydrogen_mass(&data, &mut model, hydrogen_mass);
            }
            model.set_remove_cm_motion(self.options.remove_cm_motion);
            model.set_periodic_box_vectors(self.topology.periodic_box_vectors().copied());
            for warning in model.warnings() {
                reporter.report(Progress::Message(warning.clone()));
            }
            Ok::<_, AssemblyError>(())
        })?;

        info!(
            particles = model.num_particles(),
            constraints = model.num_constraints(),
            forces = model.forces().len(),
            "Force model assembled."
        );
        Ok(model)
    }

    fn generate(&self, data: &mut AssemblyData<'a>) -> Result<ForceModel, AssemblyError> {
        let masses = (0..data.num_atoms()).map(|i| data.atom_type(i).mass).collect();
        let mut model = ForceModel::with_masses(masses);
        for site in &data.virtual_sites {
            model.add_virtual_site(VirtualSite {
                particle: site.particle,
                parents: site.parents.clone(),
                kind: site.kind.clone(),
            });
        }

        let generators = self.defs.generators;
        for generator in generators {
            generator.assign_bond_lengths(data);
        }

        self.reporter.report(Progress::TaskStart {
            total_steps: generators.len() as u64,
        });
        for generator in generators {
            debug!(tag = generator.tag(), "Creating force.");
            generator.create_force(data, self.options, &mut model)?;
            self.reporter.report(Progress::TaskIncrement);
        }
        for generator in generators {
            generator.post_process(data, self.options, &mut model)?;
        }
        self.reporter.report(Progress::TaskFinish);
        Ok(model)
    }
}

/// Rejects options nothing will read, and option combinations that cannot
/// be honoured.
fn validate_options(
    generators: &[Box<dyn ForceGenerator>],
    topology: &Topology,
    options: &CreateSystemOptions,
) -> Result<(), AssemblyError> {
    if let Some(name) = options.extra.keys().next() {
        return Err(AssemblyError::UnrecognizedOption { name: name.clone() });
    }

    let consumed: HashSet<OptionKey> = ASSEMBLER_OPTIONS
        .iter()
        .chain(generators.iter().flat_map(|g| g.consumed_options()))
        .copied()
        .collect();
    if let Some(unused) = OptionKey::ALL
        .into_iter()
        .find(|&key| !consumed.contains(&key) && !options.is_default(key))
    {
        return Err(AssemblyError::UnrecognizedOption {
            name: unused.name().to_string(),
        });
    }

    let method = options.nonbonded_method;
    if method != NonbondedMethod::NoCutoff {
        if options.nonbonded_cutoff <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: OptionKey::NonbondedCutoff.name().to_string(),
                reason: format!("the cutoff must be positive, got {}", options.nonbonded_cutoff),
            }
            .into());
        }
        if let Some(switch) = options.switch_distance {
            if switch < 0.0 || switch >= options.nonbonded_cutoff {
                return Err(ConfigError::InvalidValue {
                    key: OptionKey::SwitchDistance.name().to_string(),
                    reason: format!(
                        "the switching distance {switch} must lie between 0 and the cutoff {}",
                        options.nonbonded_cutoff
                    ),
                }
                .into());
            }
        }
    }
    if method.is_periodic() && topology.periodic_box_vectors().is_none() {
        return Err(AssemblyError::IllegalNonbondedMethod {
            force: "System",
            method: method.to_string(),
            reason: "periodic boundary conditions were requested for a topology without periodic box vectors"
                .to_string(),
        });
    }
    Ok(())
}

/// Gives each non-water hydrogen bonded to a heavy atom `hydrogen_mass`,
/// taking the difference from its bonded partner.
fn repartition_hydrogen_mass(data: &AssemblyData<'_>, model: &mut ForceModel, hydrogen_mass: f64) {
    let is_heavy = |atom: usize| data.element(atom).is_some_and(|e| e != Element::HYDROGEN);
    for &[a, b] in &data.bonds {
        let (hydrogen, partner) = if data.element(a) == Some(Element::HYDROGEN) && is_heavy(b) {
            (a, b)
        } else if data.element(b) == Some(Element::HYDROGEN) && is_heavy(a) {
            (b, a)
        } else {
            continue;
        };
        if data.is_water(hydrogen) {
            continue;
        }
        let (Some(h), Some(p)) = (model.particle_mass(hydrogen), model.particle_mass(partner)) else {
            continue;
        };
        let transfer = hydrogen_mass - h;
        model.set_particle_mass(hydrogen, hydrogen_mass);
        model.set_particle_mass(partner, p - transfer);
    }
}
