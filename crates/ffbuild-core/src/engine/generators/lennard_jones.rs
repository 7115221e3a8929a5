use super::{
    AtomParameters, ForceGenerator, matches_either_direction, merge_flag, merge_scale, missing_parameter,
    read_selectors, resolve_dispersion_correction,
};
use crate::core::error::LoadError;
use crate::core::forcefield::atom_type::AtomType;
use crate::core::forcefield::selector::TypeSelector;
use crate::core::io::xml::XmlNode;
use crate::engine::config::{CreateSystemOptions, NonbondedMethod, OptionKey};
use crate::engine::context::AssemblyData;
use crate::engine::error::AssemblyError;
use crate::engine::model::{Force, ForceModel, LennardJonesPair, LennardJonesTerms};
use std::collections::HashMap;
use tracing::debug;

pub const TAG: &str = "LennardJonesForce";

/// A pair-specific override of the combined sigma/epsilon for two types.
#[derive(Debug, Clone, PartialEq)]
pub struct NbFixPair {
    pub types: [TypeSelector; 2],
    pub sigma: f64,
    pub epsilon: f64,
}

/// Tabulated Lennard-Jones with Lorentz-Berthelot combining and NBFix
/// overrides. Each distinct atom type becomes one LJ type, in order of first
/// appearance among the particles.
#[derive(Debug, Clone, Default)]
pub struct LennardJonesGenerator {
    pub lj14scale: Option<f64>,
    pub use_dispersion_correction: Option<bool>,
    pub params: AtomParameters,
    pub nbfix: Vec<NbFixPair>,
}

struct Slot<'a> {
    atom_type: &'a AtomType,
    sigma: f64,
    epsilon: f64,
    pair14: Option<(f64, f64)>,
}

impl LennardJonesGenerator {
    fn slot<'a>(&self, data: &AssemblyData<'a>, atom: usize) -> Result<Slot<'a>, AssemblyError> {
        let atom_type = data.atom_type(atom);
        let values = self
            .params
            .lookup(atom_type)
            .ok_or_else(|| missing_parameter(TAG, data, atom))?;
        let get = |key: &str| values.get(key).copied();
        let (Some(sigma), Some(epsilon)) = (get("sigma"), get("epsilon")) else {
            return Err(missing_parameter(TAG, data, atom));
        };
        Ok(Slot {
            atom_type,
            sigma,
            epsilon,
            pair14: get("sigma14").zip(get("epsilon14")),
        })
    }

    fn nbfix(&self, a: &AtomType, b: &AtomType) -> Option<&NbFixPair> {
        self.nbfix
            .iter()
            .find(|fix| matches_either_direction(&fix.types, &[a, b]))
    }
}

/// Periodic long-range methods have no LJ-specific Ewald treatment here.
fn lennard_jones_method(method: NonbondedMethod) -> NonbondedMethod {
    match method {
        NonbondedMethod::Ewald | NonbondedMethod::PME | NonbondedMethod::LJPME => NonbondedMethod::CutoffPeriodic,
        other => other,
    }
}

impl ForceGenerator for LennardJonesGenerator {
    fn tag(&self) -> &str {
        TAG
    }

    fn merge(&mut self, node: &XmlNode) -> Result<(), LoadError> {
        let lj14scale = node.attr_f64("lj14scale")?.unwrap_or(1.0);
        merge_scale(TAG, "lj14scale", &mut self.lj14scale, lj14scale)?;
        merge_flag(
            TAG,
            "useDispersionCorrection",
            &mut self.use_dispersion_correction,
            node.attr_bool("useDispersionCorrection")?,
        )?;
        self.params.merge(node, &["sigma", "epsilon"])?;
        for fix in node.children_named("NBFixPair") {
            self.nbfix.push(NbFixPair {
                types: read_selectors::<2>(fix)?,
                sigma: fix.required_f64("sigma")?,
                epsilon: fix.required_f64("epsilon")?,
            });
        }
        Ok(())
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
        let lj14scale = self.lj14scale.unwrap_or(1.0);

        let mut slots: Vec<Slot<'_>> = Vec::new();
        let mut slot_of: HashMap<&str, usize> = HashMap::new();
        let mut particle_types = Vec::with_capacity(data.num_atoms());
        let mut particle_pair14 = Vec::with_capacity(data.num_atoms());
        for atom in 0..data.num_atoms() {
            let name = data.atom_type(atom).name.as_str();
            let index = match slot_of.get(name) {
                Some(&index) => index,
                None => {
                    slots.push(self.slot(data, atom)?);
                    slot_of.insert(name, slots.len() - 1);
                    slots.len() - 1
                }
            };
            particle_types.push(index);
            particle_pair14.push(slots[index].pair14);
        }

        let use_long_range_correction = resolve_dispersion_correction(
            TAG,
            options.use_dispersion_correction,
            self.use_dispersion_correction,
            false,
            model,
        );
        let type_names = slots.iter().map(|s| s.atom_type.name.clone()).collect();
        let mut terms = LennardJonesTerms::new(
            lennard_jones_method(options.nonbonded_method),
            options.nonbonded_cutoff,
            options.switch_distance,
            use_long_range_correction,
            type_names,
            particle_types,
        );

        for (i, a) in slots.iter().enumerate() {
            for (j, b) in slots.iter().enumerate().skip(i) {
                let (sigma, epsilon) = match self.nbfix(a.atom_type, b.atom_type) {
                    Some(fix) => (fix.sigma, fix.epsilon),
                    None => (0.5 * (a.sigma + b.sigma), (a.epsilon * b.epsilon).sqrt()),
                };
                terms.set_pair(i, j, sigma, epsilon);
            }
        }

        for ((a, b), separation) in data.pair_separations(3) {
            terms.exclusions.push([a, b]);
            if separation < 3 {
                continue;
            }
            let (sigma, epsilon) = match (particle_pair14[a], particle_pair14[b]) {
                (Some((s1, e1)), Some((s2, e2))) => (0.5 * (s1 + s2), (e1 * e2).sqrt()),
                _ => terms.particle_pair(a, b),
            };
            terms.pairs14.push(LennardJonesPair {
                atoms: [a, b],
                sigma,
                epsilon: epsilon * lj14scale,
            });
        }
        debug!(
            types = terms.num_types(),
            pairs14 = terms.pairs14.len(),
            exclusions = terms.exclusions.len(),
            "Built LennardJonesForce."
        );

        model.add_force(Force::LennardJones(terms));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{chain, section};
    use super::*;

    fn generator(xml: &str) -> LennardJonesGenerator {
        let mut g = LennardJonesGenerator::default();
        g.merge(&section(xml)).unwrap();
        g
    }

    fn build(g: &LennardJonesGenerator, options: &CreateSystemOptions) -> ForceModel {
        let mol = chain();
        let data = mol.data(options);
        let mut model = ForceModel::default();
        g.create_force(&data, options, &mut model).unwrap();
        model
    }

    const CHARMM_LIKE: &str = r#"<LennardJonesForce lj14scale="1.0">
        <Atom type="CT" sigma="0.36" epsilon="0.3" sigma14="0.34" epsilon14="0.1"/>
        <Atom type="HC" sigma="0.24" epsilon="0.1"/>
        <NBFixPair type1="HC" type2="CT" sigma="0.25" epsilon="0.5"/>
      </LennardJonesForce>"#;

    #[test]
    fn types_get_slots_in_order_of_first_appearance() {
        let model = build(&generator(CHARMM_LIKE), &CreateSystemOptions::default());
        let lj = model.lennard_jones().unwrap();
        assert_eq!(lj.type_names, vec!["CT".to_string(), "HC".to_string()]);
        assert_eq!(lj.particle_types, vec![0, 0, 0, 0, 1, 1]);
        let (sigma, epsilon) = lj.pair(1, 1);
        assert!((sigma - 0.24).abs() < 1e-12);
        assert!((epsilon - 0.1).abs() < 1e-12);
        assert!(!lj.use_long_range_correction);
    }

    #[test]
    fn nbfix_overrides_combining_rule_in_either_orientation() {
        let model = build(&generator(CHARMM_LIKE), &CreateSystemOptions::default());
        let lj = model.lennard_jones().unwrap();
        assert_eq!(lj.pair(0, 1), (0.25, 0.5));
        assert_eq!(lj.pair(1, 0), (0.25, 0.5));
        let (sigma, epsilon) = lj.pair(0, 0);
        assert!((sigma - 0.36).abs() < 1e-12);
        assert!((epsilon - 0.3).abs() < 1e-12);
    }

    #[test]
    fn one_four_pairs_use_special_parameters_when_both_atoms_have_them() {
        let model = build(&generator(CHARMM_LIKE), &CreateSystemOptions::default());
        let lj = model.lennard_jones().unwrap();
        assert_eq!(lj.exclusions.len(), 12);
        assert_eq!(lj.pairs14.len(), 3);
        let carbons = lj.pairs14.iter().find(|p| p.atoms == [0, 3]).unwrap();
        assert!((carbons.sigma - 0.34).abs() < 1e-12);
        assert!((carbons.epsilon - 0.1).abs() < 1e-12);
        let mixed = lj.pairs14.iter().find(|p| p.atoms == [2, 4]).unwrap();
        assert_eq!((mixed.sigma, mixed.epsilon), (0.25, 0.5));
    }

    #[test]
    fn ewald_methods_fall_back_to_periodic_cutoff() {
        let options = CreateSystemOptions::default().nonbonded_method(NonbondedMethod::PME);
        let model = build(&generator(CHARMM_LIKE), &options);
        assert_eq!(model.lennard_jones().unwrap().method, NonbondedMethod::CutoffPeriodic);
    }
}
