use super::{AtomParameters, ForceGenerator};
use crate::core::error::LoadError;
use crate::core::io::xml::XmlNode;
use crate::engine::config::{CreateSystemOptions, NonbondedMethod, OptionKey};
use crate::engine::context::AssemblyData;
use crate::engine::error::AssemblyError;
use crate::engine::model::{Force, ForceModel, GbsaObcTerms, GbsaParticle};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub const TAG: &str = "GBSAOBCForce";

const PARAMETERS: [&str; 3] = ["charge", "radius", "scale"];

/// OBC generalized Born implicit solvent.
#[derive(Debug, Clone, Default)]
pub struct GbsaObcGenerator {
    pub params: AtomParameters,
}

impl ForceGenerator for GbsaObcGenerator {
    fn tag(&self) -> &str {
        TAG
    }

    fn merge(&mut self, node: &XmlNode) -> Result<(), LoadError> {
        self.params.merge(node, &PARAMETERS)
    }

    fn consumed_options(&self) -> &'static [OptionKey] {
        &[
            OptionKey::SolventDielectric,
            OptionKey::SoluteDielectric,
            OptionKey::ImplicitSolventKappa,
        ]
    }

    fn create_force(
        &self,
        data: &AssemblyData<'_>,
        options: &CreateSystemOptions,
        model: &mut ForceModel,
    ) -> Result<(), AssemblyError> {
        let method = options.nonbonded_method;
        if !matches!(
            method,
            NonbondedMethod::NoCutoff | NonbondedMethod::CutoffNonPeriodic | NonbondedMethod::CutoffPeriodic
        ) {
            return Err(AssemblyError::IllegalNonbondedMethod {
                force: TAG,
                method: method.to_string(),
                reason: "implicit solvent supports only NoCutoff, CutoffNonPeriodic and CutoffPeriodic".to_string(),
            });
        }

        #[cfg(not(feature = "parallel"))]
        let iterator = 0..data.num_atoms();
        #[cfg(feature = "parallel")]
        let iterator = (0..data.num_atoms()).into_par_iter();

        let particles = iterator
            .map(|atom| {
                let v = self.params.values_for(TAG, data, atom, &PARAMETERS)?;
                Ok(GbsaParticle {
                    charge: v[0],
                    radius: v[1],
                    scale: v[2],
                })
            })
            .collect::<Result<Vec<_>, AssemblyError>>()?;

        model.add_force(Force::GbsaObc(GbsaObcTerms {
            method,
            cutoff: options.nonbonded_cutoff,
            solvent_dielectric: options.solvent_dielectric,
            solute_dielectric: options.solute_dielectric,
            kappa: options.implicit_solvent_kappa,
            particles,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{chain, section};
    use super::*;

    fn generator() -> GbsaObcGenerator {
        let mut g = GbsaObcGenerator::default();
        g.merge(&section(
            r#"<GBSAOBCForce>
                 <Atom type="CT" charge="-0.1" radius="0.17" scale="0.72"/>
                 <Atom type="HC" charge="0.1" radius="0.13" scale="0.85"/>
               </GBSAOBCForce>"#,
        ))
        .unwrap();
        g
    }

    #[test]
    fn dielectrics_and_kappa_come_from_options() {
        let mol = chain();
        let options = CreateSystemOptions::default()
            .solvent_dielectric(50.0)
            .solute_dielectric(0.9)
            .implicit_solvent_kappa(0.7);
        let data = mol.data(&options);
        let mut model = ForceModel::default();
        generator().create_force(&data, &options, &mut model).unwrap();

        let gb = model.gbsa_obc().unwrap();
        assert_eq!(gb.solvent_dielectric, 50.0);
        assert_eq!(gb.solute_dielectric, 0.9);
        assert_eq!(gb.kappa, 0.7);
        assert_eq!(gb.particles.len(), 6);
        assert_eq!(gb.particles[5].scale, 0.85);
    }

    #[test]
    fn ewald_methods_are_rejected() {
        let mol = chain();
        let options = CreateSystemOptions::default().nonbonded_method(NonbondedMethod::PME);
        let data = mol.data(&options);
        let err = generator()
            .create_force(&data, &options, &mut ForceModel::default())
            .unwrap_err();
        assert!(matches!(err, AssemblyError::IllegalNonbondedMethod { .. }));
    }
}
