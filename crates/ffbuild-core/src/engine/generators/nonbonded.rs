use super::{AtomParameters, ForceGenerator, merge_flag, merge_scale, resolve_dispersion_correction};
use crate::core::error::LoadError;
use crate::core::io::xml::XmlNode;
use crate::engine::config::{CreateSystemOptions, OptionKey};
use crate::engine::context::AssemblyData;
use crate::engine::error::AssemblyError;
use crate::engine::model::{Force, ForceModel, NonbondedException, NonbondedParticle, NonbondedTerms};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::debug;

pub const TAG: &str = "NonbondedForce";

const PARAMETERS: [&str; 3] = ["charge", "sigma", "epsilon"];

/// Coulomb plus Lennard-Jones with per-atom charge, sigma and epsilon.
///
/// Pairs within two bonds are fully excluded; 1-4 pairs are kept as scaled
/// exceptions.
#[derive(Debug, Clone, Default)]
pub struct NonbondedGenerator {
    pub coulomb14scale: Option<f64>,
    pub lj14scale: Option<f64>,
    pub use_dispersion_correction: Option<bool>,
    pub params: AtomParameters,
}

impl NonbondedGenerator {
    fn particle(&self, data: &AssemblyData<'_>, atom: usize) -> Result<NonbondedParticle, AssemblyError> {
        let values = self.params.values_for(TAG, data, atom, &PARAMETERS)?;
        Ok(NonbondedParticle {
            charge: values[0],
            sigma: values[1],
            epsilon: values[2],
        })
    }

    fn scales(&self) -> Result<(f64, f64), AssemblyError> {
        match (self.coulomb14scale, self.lj14scale) {
            (Some(c), Some(l)) => Ok((c, l)),
            _ => Err(AssemblyError::generator(TAG, "no 1-4 scale factors were defined")),
        }
    }
}

impl ForceGenerator for NonbondedGenerator {
    fn tag(&self) -> &str {
        TAG
    }

    fn merge(&mut self, node: &XmlNode) -> Result<(), LoadError> {
        merge_scale(TAG, "coulomb14scale", &mut self.coulomb14scale, node.required_f64("coulomb14scale")?)?;
        merge_scale(TAG, "lj14scale", &mut self.lj14scale, node.required_f64("lj14scale")?)?;
        merge_flag(
            TAG,
            "useDispersionCorrection",
            &mut self.use_dispersion_correction,
            node.attr_bool("useDispersionCorrection")?,
        )?;
        self.params.merge(node, &PARAMETERS)
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
        let (coulomb14scale, lj14scale) = self.scales()?;

        #[cfg(not(feature = "parallel"))]
        let iterator = 0..data.num_atoms();
        #[cfg(feature = "parallel")]
        let iterator = (0..data.num_atoms()).into_par_iter();

        let particles = iterator
            .map(|atom| self.particle(data, atom))
            .collect::<Result<Vec<_>, _>>()?;

        let exceptions: Vec<NonbondedException> = data
            .pair_separations(3)
            .into_iter()
            .map(|((a, b), separation)| {
                if separation < 3 {
                    NonbondedException {
                        atoms: [a, b],
                        charge_prod: 0.0,
                        sigma: 1.0,
                        epsilon: 0.0,
                    }
                } else {
                    let (p, q) = (&particles[a], &particles[b]);
                    NonbondedException {
                        atoms: [a, b],
                        charge_prod: p.charge * q.charge * coulomb14scale,
                        sigma: 0.5 * (p.sigma + q.sigma),
                        epsilon: (p.epsilon * q.epsilon).sqrt() * lj14scale,
                    }
                }
            })
            .collect();
        debug!(
            particles = particles.len(),
            exceptions = exceptions.len(),
            "Built NonbondedForce."
        );

        let use_dispersion_correction = resolve_dispersion_correction(
            TAG,
            options.use_dispersion_correction,
            self.use_dispersion_correction,
            true,
            model,
        );
        model.add_force(Force::Nonbonded(NonbondedTerms {
            method: options.nonbonded_method,
            cutoff: options.nonbonded_cutoff,
            switch_distance: options.switch_distance,
            use_dispersion_correction,
            coulomb14scale,
            lj14scale,
            particles,
            exceptions,
        }));
        Ok(())
    }
}
