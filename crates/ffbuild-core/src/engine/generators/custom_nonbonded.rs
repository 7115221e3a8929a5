use super::{AtomParameters, ForceGenerator};
use crate::core::error::LoadError;
use crate::core::io::xml::XmlNode;
use crate::engine::config::{CreateSystemOptions, NonbondedMethod, OptionKey};
use crate::engine::context::AssemblyData;
use crate::engine::error::AssemblyError;
use crate::engine::model::{CustomNonbondedTerms, Force, ForceModel};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub const TAG: &str = "CustomNonbondedForce";

const DEFAULT_BOND_CUTOFF: usize = 3;

/// A pairwise force given by an energy expression over per-particle
/// parameters. Sections with different energy expressions become separate
/// forces.
#[derive(Debug, Clone, Default)]
pub struct CustomNonbondedGenerator {
    pub energy: Option<String>,
    pub bond_cutoff: Option<usize>,
    pub global_parameters: Vec<(String, f64)>,
    pub per_particle_parameters: Vec<String>,
    pub computed_values: Vec<(String, String)>,
    pub params: AtomParameters,
}

fn custom_method(method: NonbondedMethod) -> NonbondedMethod {
    match method {
        NonbondedMethod::NoCutoff | NonbondedMethod::CutoffNonPeriodic => method,
        _ => NonbondedMethod::CutoffPeriodic,
    }
}

impl ForceGenerator for CustomNonbondedGenerator {
    fn tag(&self) -> &str {
        TAG
    }

    fn accepts_merge(&self, node: &XmlNode) -> bool {
        match &self.energy {
            None => true,
            Some(energy) => node.attr("energy") == Some(energy.as_str()),
        }
    }

    fn merge(&mut self, node: &XmlNode) -> Result<(), LoadError> {
        let energy = node.required_attr("energy")?;
        if self.energy.is_none() {
            self.energy = Some(energy.to_string());
        }
        if let Some(cutoff) = node.attr_usize("bondCutoff")? {
            if self.bond_cutoff.is_some_and(|c| c != cutoff) {
                return Err(LoadError::conflict(
                    "CustomNonbondedForce",
                    "bondCutoff",
                    format!("sections specify {} and {cutoff}", self.bond_cutoff.unwrap_or_default()),
                ));
            }
            self.bond_cutoff = Some(cutoff);
        }
        for global in node.children_named("GlobalParameter") {
            let name = global.required_attr("name")?;
            let value = global.required_f64("defaultValue")?;
            if !self.global_parameters.iter().any(|(n, _)| n == name) {
                self.global_parameters.push((name.to_string(), value));
            }
        }
        for param in node.children_named("PerParticleParameter") {
            let name = param.required_attr("name")?;
            if !self.per_particle_parameters.iter().any(|n| n == name) {
                self.per_particle_parameters.push(name.to_string());
            }
        }
        for computed in node.children_named("ComputedValue") {
            let name = computed.required_attr("name")?;
            let expression = computed.required_attr("expression")?;
            match self.computed_values.iter().find(|(n, _)| n == name) {
                Some((_, existing)) if existing != expression => {
                    return Err(LoadError::conflict(
                        "CustomNonbondedForce",
                        name,
                        format!("computed value is defined as '{existing}' and '{expression}'"),
                    ));
                }
                Some(_) => {}
                None => self.computed_values.push((name.to_string(), expression.to_string())),
            }
        }
        let required: Vec<&str> = self.per_particle_parameters.iter().map(String::as_str).collect();
        self.params.merge(node, &required)
    }

    fn consumed_options(&self) -> &'static [OptionKey] {
        &[OptionKey::SwitchDistance, OptionKey::UseDispersionCorrection]
    }

    fn create_force(
        &self,
        data: &AssemblyData<'_>,
        options: &CreateSystemOptions,
        model: &mut ForceModel,
    ) -> Result<(), AssemblyError> {
        let energy = self
            .energy
            .clone()
            .ok_or_else(|| AssemblyError::generator(TAG, "no energy expression was defined"))?;
        let names: Vec<&str> = self.per_particle_parameters.iter().map(String::as_str).collect();

        #[cfg(not(feature = "parallel"))]
        let iterator = 0..data.num_atoms();
        #[cfg(feature = "parallel")]
        let iterator = (0..data.num_atoms()).into_par_iter();

        let particles = iterator
            .map(|atom| self.params.values_for(TAG, data, atom, &names))
            .collect::<Result<Vec<_>, _>>()?;

        let bond_cutoff = self.bond_cutoff.unwrap_or(DEFAULT_BOND_CUTOFF);
        let exclusions = data
            .pair_separations(bond_cutoff)
            .into_keys()
            .map(|(a, b)| [a, b])
            .collect();

        model.add_force(Force::CustomNonbonded(CustomNonbondedTerms {
            energy,
            method: custom_method(options.nonbonded_method),
            cutoff: options.nonbonded_cutoff,
            switch_distance: options.switch_distance,
            use_long_range_correction: options.use_dispersion_correction.unwrap_or(false),
            global_parameters: self.global_parameters.clone(),
            per_particle_parameters: self.per_particle_parameters.clone(),
            computed_values: self.computed_values.clone(),
            particles,
            exclusions,
        }));
        Ok(())
    }
}
