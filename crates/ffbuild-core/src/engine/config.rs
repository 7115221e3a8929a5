use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for option '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("TOML parsing error: {source}")]
    Toml {
        #[from]
        source: toml::de::Error,
    },
}

fn invalid(key: OptionKey, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.name().to_string(),
        reason: reason.into(),
    }
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub enum NonbondedMethod {
    #[default]
    NoCutoff,
    CutoffNonPeriodic,
    CutoffPeriodic,
    Ewald,
    PME,
    LJPME,
}

impl NonbondedMethod {
    pub fn is_periodic(self) -> bool {
        matches!(
            self,
            NonbondedMethod::CutoffPeriodic
                | NonbondedMethod::Ewald
                | NonbondedMethod::PME
                | NonbondedMethod::LJPME
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            NonbondedMethod::NoCutoff => "NoCutoff",
            NonbondedMethod::CutoffNonPeriodic => "CutoffNonPeriodic",
            NonbondedMethod::CutoffPeriodic => "CutoffPeriodic",
            NonbondedMethod::Ewald => "Ewald",
            NonbondedMethod::PME => "PME",
            NonbondedMethod::LJPME => "LJPME",
        }
    }
}

impl fmt::Display for NonbondedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NonbondedMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            NonbondedMethod::NoCutoff,
            NonbondedMethod::CutoffNonPeriodic,
            NonbondedMethod::CutoffPeriodic,
            NonbondedMethod::Ewald,
            NonbondedMethod::PME,
            NonbondedMethod::LJPME,
        ]
        .into_iter()
        .find(|m| m.name() == s)
        .ok_or_else(|| format!("unknown nonbonded method '{s}'"))
    }
}

/// Which bonds and angles are replaced by rigid distance constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub enum Constraints {
    #[default]
    None,
    HBonds,
    AllBonds,
    HAngles,
}

impl FromStr for Constraints {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(Constraints::None),
            "HBonds" => Ok(Constraints::HBonds),
            "AllBonds" => Ok(Constraints::AllBonds),
            "HAngles" => Ok(Constraints::HAngles),
            other => Err(format!("unknown constraint policy '{other}'")),
        }
    }
}

/// Induced-dipole model for polarizable multipole forces.
///
/// No built-in generator reads this; a generator registered with
/// [`ForceField::register_generator_tag`](crate::workflows::forcefield::ForceField::register_generator_tag)
/// accepts it by listing [`OptionKey::Polarization`] in its consumed options.
/// Without one, a non-default value is rejected as unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarization {
    Direct,
    Extrapolated,
    #[default]
    Mutual,
}

impl FromStr for Polarization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Polarization::Direct),
            "extrapolated" => Ok(Polarization::Extrapolated),
            "mutual" => Ok(Polarization::Mutual),
            other => Err(format!("unknown polarization '{other}'")),
        }
    }
}

/// Identifies one recognised option, by its camelCase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    NonbondedMethod,
    NonbondedCutoff,
    SwitchDistance,
    Constraints,
    RigidWater,
    FlexibleConstraints,
    RemoveCMMotion,
    HydrogenMass,
    DrudeMass,
    SolventDielectric,
    SoluteDielectric,
    UseDispersionCorrection,
    ResidueTemplates,
    IgnoreExternalBonds,
    IgnoreExtraParticles,
    ImplicitSolventKappa,
    /// Read only by caller-registered polarizable generators.
    Polarization,
    /// Read only by caller-registered polarizable generators.
    MutualInducedTargetEpsilon,
    FailFast,
}

impl OptionKey {
    pub const ALL: [OptionKey; 19] = [
        OptionKey::NonbondedMethod,
        OptionKey::NonbondedCutoff,
        OptionKey::SwitchDistance,
        OptionKey::Constraints,
        OptionKey::RigidWater,
        OptionKey::FlexibleConstraints,
        OptionKey::RemoveCMMotion,
        OptionKey::HydrogenMass,
        OptionKey::DrudeMass,
        OptionKey::SolventDielectric,
        OptionKey::SoluteDielectric,
        OptionKey::UseDispersionCorrection,
        OptionKey::ResidueTemplates,
        OptionKey::IgnoreExternalBonds,
        OptionKey::IgnoreExtraParticles,
        OptionKey::ImplicitSolventKappa,
        OptionKey::Polarization,
        OptionKey::MutualInducedTargetEpsilon,
        OptionKey::FailFast,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OptionKey::NonbondedMethod => "nonbondedMethod",
            OptionKey::NonbondedCutoff => "nonbondedCutoff",
            OptionKey::SwitchDistance => "switchDistance",
            OptionKey::Constraints => "constraints",
            OptionKey::RigidWater => "rigidWater",
            OptionKey::FlexibleConstraints => "flexibleConstraints",
            OptionKey::RemoveCMMotion => "removeCMMotion",
            OptionKey::HydrogenMass => "hydrogenMass",
            OptionKey::DrudeMass => "drudeMass",
            OptionKey::SolventDielectric => "solventDielectric",
            OptionKey::SoluteDielectric => "soluteDielectric",
            OptionKey::UseDispersionCorrection => "useDispersionCorrection",
            OptionKey::ResidueTemplates => "residueTemplates",
            OptionKey::IgnoreExternalBonds => "ignoreExternalBonds",
            OptionKey::IgnoreExtraParticles => "ignoreExtraParticles",
            OptionKey::ImplicitSolventKappa => "implicitSolventKappa",
            OptionKey::Polarization => "polarization",
            OptionKey::MutualInducedTargetEpsilon => "mutualInducedTargetEpsilon",
            OptionKey::FailFast => "failFast",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

/// Options accepted by system assembly.
///
/// Every recognised option is a typed field with a fixed default. Keys that
/// are not recognised are kept in `extra` so that assembly can reject them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateSystemOptions {
    pub nonbonded_method: NonbondedMethod,
    /// Cutoff distance in nm.
    pub nonbonded_cutoff: f64,
    pub switch_distance: Option<f64>,
    pub constraints: Constraints,
    /// `None` keeps water rigid.
    pub rigid_water: Option<bool>,
    pub flexible_constraints: bool,
    #[serde(rename = "removeCMMotion")]
    pub remove_cm_motion: bool,
    /// Mass (amu) given to every non-water hydrogen bonded to a heavy atom.
    pub hydrogen_mass: Option<f64>,
    pub drude_mass: f64,
    pub solvent_dielectric: f64,
    pub solute_dielectric: f64,
    pub use_dispersion_correction: Option<bool>,
    /// Residue index to template name.
    #[serde(deserialize_with = "deserialize_residue_templates")]
    pub residue_templates: BTreeMap<usize, String>,
    pub ignore_external_bonds: bool,
    pub ignore_extra_particles: bool,
    pub implicit_solvent_kappa: f64,
    /// Only accepted when a registered generator consumes it.
    pub polarization: Polarization,
    /// Only accepted when a registered generator consumes it.
    pub mutual_induced_target_epsilon: f64,
    pub fail_fast: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl Default for CreateSystemOptions {
    fn default() -> Self {
        Self {
            nonbonded_method: NonbondedMethod::NoCutoff,
            nonbonded_cutoff: 1.0,
            switch_distance: None,
            constraints: Constraints::None,
            rigid_water: None,
            flexible_constraints: false,
            remove_cm_motion: true,
            hydrogen_mass: None,
            drude_mass: 0.4,
            solvent_dielectric: 78.5,
            solute_dielectric: 1.0,
            use_dispersion_correction: None,
            residue_templates: BTreeMap::new(),
            ignore_external_bonds: false,
            ignore_extra_particles: false,
            implicit_solvent_kappa: 0.0,
            polarization: Polarization::Mutual,
            mutual_induced_target_epsilon: 1e-5,
            fail_fast: false,
            extra: BTreeMap::new(),
        }
    }
}

fn deserialize_residue_templates<'de, D>(deserializer: D) -> Result<BTreeMap<usize, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(k, v)| {
            k.trim()
                .parse::<usize>()
                .map(|index| (index, v))
                .map_err(|_| serde::de::Error::custom(format!("invalid residue index '{k}'")))
        })
        .collect()
}

impl CreateSystemOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn nonbonded_method(mut self, method: NonbondedMethod) -> Self {
        self.nonbonded_method = method;
        self
    }
    pub fn nonbonded_cutoff(mut self, cutoff: f64) -> Self {
        self.nonbonded_cutoff = cutoff;
        self
    }
    pub fn switch_distance(mut self, distance: f64) -> Self {
        self.switch_distance = Some(distance);
        self
    }
    pub fn constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }
    pub fn rigid_water(mut self, rigid: bool) -> Self {
        self.rigid_water = Some(rigid);
        self
    }
    pub fn flexible_constraints(mut self, flexible: bool) -> Self {
        self.flexible_constraints = flexible;
        self
    }
    pub fn remove_cm_motion(mut self, remove: bool) -> Self {
        self.remove_cm_motion = remove;
        self
    }
    pub fn hydrogen_mass(mut self, mass: f64) -> Self {
        self.hydrogen_mass = Some(mass);
        self
    }
    pub fn drude_mass(mut self, mass: f64) -> Self {
        self.drude_mass = mass;
        self
    }
    pub fn solvent_dielectric(mut self, dielectric: f64) -> Self {
        self.solvent_dielectric = dielectric;
        self
    }
    pub fn solute_dielectric(mut self, dielectric: f64) -> Self {
        self.solute_dielectric = dielectric;
        self
    }
    pub fn use_dispersion_correction(mut self, enabled: bool) -> Self {
        self.use_dispersion_correction = Some(enabled);
        self
    }
    pub fn residue_template(mut self, residue: usize, template: &str) -> Self {
        self.residue_templates.insert(residue, template.to_string());
        self
    }
    pub fn ignore_external_bonds(mut self, ignore: bool) -> Self {
        self.ignore_external_bonds = ignore;
        self
    }
    pub fn ignore_extra_particles(mut self, ignore: bool) -> Self {
        self.ignore_extra_particles = ignore;
        self
    }
    pub fn implicit_solvent_kappa(mut self, kappa: f64) -> Self {
        self.implicit_solvent_kappa = kappa;
        self
    }
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Sets an option by its camelCase name.
    ///
    /// Unrecognised names are stored in `extra`; assembly rejects them.
    pub fn set(&mut self, key: &str, value: impl Into<toml::Value>) -> Result<&mut Self, ConfigError> {
        let value = value.into();
        let Some(option) = OptionKey::from_name(key) else {
            self.extra.insert(key.to_string(), value);
            return Ok(self);
        };
        match option {
            OptionKey::NonbondedMethod => {
                self.nonbonded_method = parse_str(option, &value)?;
            }
            OptionKey::NonbondedCutoff => self.nonbonded_cutoff = as_f64(option, &value)?,
            OptionKey::SwitchDistance => self.switch_distance = Some(as_f64(option, &value)?),
            OptionKey::Constraints => self.constraints = parse_str(option, &value)?,
            OptionKey::RigidWater => self.rigid_water = Some(as_bool(option, &value)?),
            OptionKey::FlexibleConstraints => {
                self.flexible_constraints = as_bool(option, &value)?;
            }
            OptionKey::RemoveCMMotion => self.remove_cm_motion = as_bool(option, &value)?,
            OptionKey::HydrogenMass => self.hydrogen_mass = Some(as_f64(option, &value)?),
            OptionKey::DrudeMass => self.drude_mass = as_f64(option, &value)?,
            OptionKey::SolventDielectric => self.solvent_dielectric = as_f64(option, &value)?,
            OptionKey::SoluteDielectric => self.solute_dielectric = as_f64(option, &value)?,
            OptionKey::UseDispersionCorrection => {
                self.use_dispersion_correction = Some(as_bool(option, &value)?);
            }
            OptionKey::ResidueTemplates => {
                let table = value
                    .as_table()
                    .ok_or_else(|| invalid(option, "expected a table of residue index to template name"))?;
                for (k, v) in table {
                    let index = k
                        .parse::<usize>()
                        .map_err(|_| invalid(option, format!("invalid residue index '{k}'")))?;
                    let name = v
                        .as_str()
                        .ok_or_else(|| invalid(option, "template names must be strings"))?;
                    self.residue_templates.insert(index, name.to_string());
                }
            }
            OptionKey::IgnoreExternalBonds => {
                self.ignore_external_bonds = as_bool(option, &value)?;
            }
            OptionKey::IgnoreExtraParticles => {
                self.ignore_extra_particles = as_bool(option, &value)?;
            }
            OptionKey::ImplicitSolventKappa => {
                self.implicit_solvent_kappa = as_f64(option, &value)?;
            }
            OptionKey::Polarization => self.polarization = parse_str(option, &value)?,
            OptionKey::MutualInducedTargetEpsilon => {
                self.mutual_induced_target_epsilon = as_f64(option, &value)?;
            }
            OptionKey::FailFast => self.fail_fast = as_bool(option, &value)?,
        }
        Ok(self)
    }

    /// Whether the option still holds its default value.
    pub fn is_default(&self, key: OptionKey) -> bool {
        let d = Self::default();
        match key {
            OptionKey::NonbondedMethod => self.nonbonded_method == d.nonbonded_method,
            OptionKey::NonbondedCutoff => self.nonbonded_cutoff == d.nonbonded_cutoff,
            OptionKey::SwitchDistance => self.switch_distance == d.switch_distance,
            OptionKey::Constraints => self.constraints == d.constraints,
            OptionKey::RigidWater => self.rigid_water == d.rigid_water,
            OptionKey::FlexibleConstraints => self.flexible_constraints == d.flexible_constraints,
            OptionKey::RemoveCMMotion => self.remove_cm_motion == d.remove_cm_motion,
            OptionKey::HydrogenMass => self.hydrogen_mass == d.hydrogen_mass,
            OptionKey::DrudeMass => self.drude_mass == d.drude_mass,
            OptionKey::SolventDielectric => self.solvent_dielectric == d.solvent_dielectric,
            OptionKey::SoluteDielectric => self.solute_dielectric == d.solute_dielectric,
            OptionKey::UseDispersionCorrection => {
                self.use_dispersion_correction == d.use_dispersion_correction
            }
            OptionKey::ResidueTemplates => self.residue_templates.is_empty(),
            OptionKey::IgnoreExternalBonds => {
                self.ignore_external_bonds == d.ignore_external_bonds
            }
            OptionKey::IgnoreExtraParticles => {
                self.ignore_extra_particles == d.ignore_extra_particles
            }
            OptionKey::ImplicitSolventKappa => {
                self.implicit_solvent_kappa == d.implicit_solvent_kappa
            }
            OptionKey::Polarization => self.polarization == d.polarization,
            OptionKey::MutualInducedTargetEpsilon => {
                self.mutual_induced_target_epsilon == d.mutual_induced_target_epsilon
            }
            OptionKey::FailFast => self.fail_fast == d.fail_fast,
        }
    }

    /// Rigid water unless explicitly disabled.
    pub fn rigid_water_enabled(&self) -> bool {
        self.rigid_water.unwrap_or(true)
    }
}

fn as_f64(key: OptionKey, value: &toml::Value) -> Result<f64, ConfigError> {
    match value {
        toml::Value::Float(f) => Ok(*f),
        toml::Value::Integer(i) => Ok(*i as f64),
        other => Err(invalid(key, format!("expected a number, got {other}"))),
    }
}

fn as_bool(key: OptionKey, value: &toml::Value) -> Result<bool, ConfigError> {
    value
        .as_bool()
        .ok_or_else(|| invalid(key, format!("expected a boolean, got {value}")))
}

fn parse_str<T: FromStr<Err = String>>(key: OptionKey, value: &toml::Value) -> Result<T, ConfigError> {
    let text = value
        .as_str()
        .ok_or_else(|| invalid(key, format!("expected a string, got {value}")))?;
    text.parse::<T>().map_err(|reason| invalid(key, reason))
}
