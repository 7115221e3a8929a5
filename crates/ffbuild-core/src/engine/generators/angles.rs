use super::{ForceGenerator, matches_either_direction, read_selectors};
use crate::core::error::LoadError;
use crate::core::forcefield::selector::TypeSelector;
use crate::core::io::xml::XmlNode;
use crate::engine::config::CreateSystemOptions;
use crate::engine::context::AssemblyData;
use crate::engine::error::AssemblyError;
use crate::engine::model::{Force, ForceModel, HarmonicAngle};
use tracing::debug;

pub const TAG: &str = "HarmonicAngleForce";

#[derive(Debug, Clone, PartialEq)]
pub struct AngleParameters {
    pub types: [TypeSelector; 3],
    /// Equilibrium angle in radians.
    pub angle: f64,
    pub k: f64,
}

#[derive(Debug, Clone, Default)]
pub struct HarmonicAngleGenerator {
    pub angles: Vec<AngleParameters>,
}

impl HarmonicAngleGenerator {
    pub fn with_angle(mut self, types: [TypeSelector; 3], angle: f64, k: f64) -> Self {
        self.angles.push(AngleParameters { types, angle, k });
        self
    }
}

/// Distance between the outer atoms of an angle with arms `l1`, `l2`.
fn outer_distance(l1: f64, l2: f64, theta: f64) -> f64 {
    (l1 * l1 + l2 * l2 - 2.0 * l1 * l2 * theta.cos()).sqrt()
}

impl ForceGenerator for HarmonicAngleGenerator {
    fn tag(&self) -> &str {
        TAG
    }

    fn merge(&mut self, node: &XmlNode) -> Result<(), LoadError> {
        for angle in node.children_named("Angle") {
            self.angles.push(AngleParameters {
                types: read_selectors::<3>(angle)?,
                angle: angle.required_f64("angle")?,
                k: angle.required_f64("k")?,
            });
        }
        Ok(())
    }

    fn create_force(
        &self,
        data: &AssemblyData<'_>,
        options: &CreateSystemOptions,
        model: &mut ForceModel,
    ) -> Result<(), AssemblyError> {
        let mut terms = Vec::new();
        for (index, &[i, j, k]) in data.angles.iter().enumerate() {
            let types = [data.atom_type(i), data.atom_type(j), data.atom_type(k)];
            let Some(params) = self
                .angles
                .iter()
                .find(|p| matches_either_direction(&p.types, &types))
            else {
                debug!(atom1 = i, atom2 = j, atom3 = k, "No HarmonicAngleForce parameters; skipping angle.");
                continue;
            };

            if data.angle_is_constrained(index) {
                match (data.bond_length(i, j), data.bond_length(j, k)) {
                    (Some(l1), Some(l2)) => {
                        model.add_constraint(i, k, outer_distance(l1, l2, params.angle));
                        if !options.flexible_constraints {
                            continue;
                        }
                    }
                    _ => debug!(
                        atom1 = i,
                        atom2 = j,
                        atom3 = k,
                        "Bond lengths unknown; keeping constrained angle flexible."
                    ),
                }
            }
            terms.push(HarmonicAngle {
                atoms: [i, j, k],
                angle: params.angle,
                k: params.k,
            });
        }
        model.add_force(Force::HarmonicAngle(terms));
        Ok(())
    }
}
