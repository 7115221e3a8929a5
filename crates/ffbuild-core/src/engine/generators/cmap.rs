use super::{ForceGenerator, read_selectors};
use crate::core::error::LoadError;
use crate::core::forcefield::atom_type::AtomType;
use crate::core::forcefield::selector::TypeSelector;
use crate::core::io::xml::XmlNode;
use crate::engine::config::CreateSystemOptions;
use crate::engine::context::AssemblyData;
use crate::engine::error::AssemblyError;
use crate::engine::model::{CmapGrid, CmapTerms, CmapTorsion, Force, ForceModel};
use std::collections::BTreeSet;
use tracing::debug;

pub const TAG: &str = "CMAPTorsionForce";

#[derive(Debug, Clone, PartialEq)]
pub struct CmapDefinition {
    pub map: usize,
    pub types: [TypeSelector; 5],
}

/// Correction maps over pairs of adjacent torsions (five-atom chains).
///
/// Maps are numbered globally: a `map` index in a later section is relative
/// to the maps that section itself declares.
#[derive(Debug, Clone, Default)]
pub struct CmapTorsionGenerator {
    pub maps: Vec<CmapGrid>,
    pub torsions: Vec<CmapDefinition>,
}

fn parse_grid(node: &XmlNode) -> Result<CmapGrid, LoadError> {
    let energies = node
        .text
        .split_whitespace()
        .map(|v| {
            v.parse::<f64>()
                .map_err(|_| LoadError::invalid_value(&node.name, "text", v, "map entries must be numbers"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let size = (energies.len() as f64).sqrt().round() as usize;
    if size == 0 || size * size != energies.len() {
        return Err(LoadError::invalid_value(
            &node.name,
            "text",
            &energies.len().to_string(),
            "a map must hold a square number of energies",
        ));
    }
    Ok(CmapGrid { size, energies })
}

impl CmapTorsionGenerator {
    /// Every five-atom chain, once, oriented so the first atom has the
    /// lower index.
    fn chains(data: &AssemblyData<'_>) -> BTreeSet<[usize; 5]> {
        let neighbors = |atom: usize| data.topology.neighbors(atom).iter().copied();
        let mut chains = BTreeSet::new();
        let mut insert = |chain: [usize; 5]| {
            if chain[0] < chain[4] {
                chains.insert(chain);
            } else {
                let mut reversed = chain;
                reversed.reverse();
                chains.insert(reversed);
            }
        };
        for &[a, b, c, d] in &data.propers {
            for e in neighbors(d).filter(|e| ![a, b, c].contains(e)) {
                insert([a, b, c, d, e]);
            }
            for z in neighbors(a).filter(|z| ![b, c, d].contains(z)) {
                insert([z, a, b, c, d]);
            }
        }
        chains
    }

    fn oriented(&self, chain: [usize; 5], types: [&AtomType; 5]) -> Option<CmapTorsion> {
        self.torsions.iter().find_map(|def| {
            let forward = def.types.iter().zip(types).all(|(s, t)| s.matches(t));
            if forward {
                return Some(CmapTorsion { map: def.map, atoms: chain });
            }
            let backward = def.types.iter().zip(types.iter().rev()).all(|(s, t)| s.matches(t));
            backward.then(|| {
                let mut atoms = chain;
                atoms.reverse();
                CmapTorsion { map: def.map, atoms }
            })
        })
    }
}

impl ForceGenerator for CmapTorsionGenerator {
    fn tag(&self) -> &str {
        TAG
    }

    fn merge(&mut self, node: &XmlNode) -> Result<(), LoadError> {
        let offset = self.maps.len();
        for map in node.children_named("Map") {
            self.maps.push(parse_grid(map)?);
        }
        for torsion in node.children_named("Torsion") {
            let local = torsion
                .attr_usize("map")?
                .ok_or_else(|| LoadError::MissingAttribute {
                    element: torsion.name.clone(),
                    attribute: "map".to_string(),
                })?;
            let map = offset + local;
            if map >= self.maps.len() {
                return Err(LoadError::invalid_value(
                    &torsion.name,
                    "map",
                    &local.to_string(),
                    "no such map in this section",
                ));
            }
            self.torsions.push(CmapDefinition {
                map,
                types: read_selectors::<5>(torsion)?,
            });
        }
        Ok(())
    }

    fn create_force(
        &self,
        data: &AssemblyData<'_>,
        _options: &CreateSystemOptions,
        model: &mut ForceModel,
    ) -> Result<(), AssemblyError> {
        let torsions: Vec<CmapTorsion> = Self::chains(data)
            .into_iter()
            .filter_map(|chain| self.oriented(chain, chain.map(|a| data.atom_type(a))))
            .collect();
        debug!(maps = self.maps.len(), torsions = torsions.len(), "Built CMAPTorsionForce.");
        model.add_force(Force::Cmap(CmapTerms {
            maps: self.maps.clone(),
            torsions,
        }));
        Ok(())
    }
}
