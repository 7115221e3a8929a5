use super::{ForceGenerator, matches_either_direction, read_selectors};
use crate::core::error::LoadError;
use crate::core::forcefield::selector::TypeSelector;
use crate::core::io::xml::XmlNode;
use crate::engine::config::CreateSystemOptions;
use crate::engine::context::AssemblyData;
use crate::engine::error::AssemblyError;
use crate::engine::model::{Force, ForceModel, HarmonicBond};
use tracing::debug;

pub const TAG: &str = "HarmonicBondForce";

#[derive(Debug, Clone, PartialEq)]
pub struct BondParameters {
    pub types: [TypeSelector; 2],
    pub length: f64,
    pub k: f64,
}

/// `<HarmonicBondForce><Bond type1 type2 length k/></HarmonicBondForce>`
#[derive(Debug, Clone, Default)]
pub struct HarmonicBondGenerator {
    pub bonds: Vec<BondParameters>,
}

impl HarmonicBondGenerator {
    pub fn with_bond(mut self, types: [TypeSelector; 2], length: f64, k: f64) -> Self {
        self.bonds.push(BondParameters { types, length, k });
        self
    }

    fn lookup(&self, data: &AssemblyData<'_>, a: usize, b: usize) -> Option<&BondParameters> {
        let types = [data.atom_type(a), data.atom_type(b)];
        self.bonds
            .iter()
            .find(|p| matches_either_direction(&p.types, &types))
    }
}

impl ForceGenerator for HarmonicBondGenerator {
    fn tag(&self) -> &str {
        TAG
    }

    fn merge(&mut self, node: &XmlNode) -> Result<(), LoadError> {
        for bond in node.children_named("Bond") {
            self.bonds.push(BondParameters {
                types: read_selectors::<2>(bond)?,
                length: bond.required_f64("length")?,
                k: bond.required_f64("k")?,
            });
        }
        Ok(())
    }

    fn assign_bond_lengths(&self, data: &mut AssemblyData<'_>) {
        for index in 0..data.bonds.len() {
            let [a, b] = data.bonds[index];
            if let Some(length) = self.lookup(data, a, b).map(|p| p.length) {
                data.set_bond_length(index, length);
            }
        }
    }

    fn create_force(
        &self,
        data: &AssemblyData<'_>,
        options: &CreateSystemOptions,
        model: &mut ForceModel,
    ) -> Result<(), AssemblyError> {
        let mut terms = Vec::new();
        for (index, &[a, b]) in data.bonds.iter().enumerate() {
            let Some(params) = self.lookup(data, a, b) else {
                debug!(atom1 = a, atom2 = b, "No HarmonicBondForce parameters; skipping bond.");
                continue;
            };
            if data.bond_is_constrained(index) {
                model.add_constraint(a, b, params.length);
                if !options.flexible_constraints {
                    continue;
                }
            }
            terms.push(HarmonicBond {
                atoms: [a, b],
                length: params.length,
                k: params.k,
            });
        }
        model.add_force(Force::HarmonicBond(terms));
        Ok(())
    }
}
