use super::ForceGenerator;
use crate::core::error::LoadError;
use crate::core::forcefield::selector::TypeSelector;
use crate::core::io::xml::XmlNode;
use crate::engine::config::{CreateSystemOptions, OptionKey};
use crate::engine::context::AssemblyData;
use crate::engine::error::AssemblyError;
use crate::engine::model::{DrudeParticle, DrudeTerms, Force, ForceModel, ScreenedPair};
use tracing::debug;

pub const TAG: &str = "DrudeForce";

#[derive(Debug, Clone, PartialEq)]
pub struct DrudeDefinition {
    /// Selects the Drude particle itself.
    pub drude: TypeSelector,
    /// Selects the atom the Drude particle is bonded to.
    pub parent: TypeSelector,
    /// Optional atoms bonded to the parent that define the anisotropy axes.
    pub anisotropy: [Option<TypeSelector>; 3],
    pub charge: f64,
    pub polarizability: f64,
    pub aniso12: f64,
    pub aniso34: f64,
    pub thole: f64,
}

/// Drude oscillators: polarizable particles bonded to a parent atom.
#[derive(Debug, Clone, Default)]
pub struct DrudeGenerator {
    pub particles: Vec<DrudeDefinition>,
}

impl DrudeGenerator {
    fn build_particle(
        &self,
        data: &AssemblyData<'_>,
        atom: usize,
        def: &DrudeDefinition,
    ) -> Result<DrudeParticle, AssemblyError> {
        let neighbors = data.topology.neighbors(atom);
        let parent = neighbors
            .iter()
            .copied()
            .find(|&n| def.parent.matches(data.atom_type(n)))
            .ok_or_else(|| {
                AssemblyError::generator(
                    TAG,
                    format!(
                        "Drude particle {} ({}) is not bonded to an atom of its parent type",
                        atom,
                        data.topology.atoms()[atom].name
                    ),
                )
            })?;

        let mut used = vec![atom, parent];
        let mut anisotropy_atoms = [None; 3];
        for (slot, selector) in anisotropy_atoms.iter_mut().zip(&def.anisotropy) {
            let Some(selector) = selector else { continue };
            let found = data
                .topology
                .neighbors(parent)
                .iter()
                .copied()
                .find(|n| !used.contains(n) && selector.matches(data.atom_type(*n)))
                .ok_or_else(|| {
                    AssemblyError::generator(
                        TAG,
                        format!("no anisotropy atom bonded to parent {parent} of Drude particle {atom}"),
                    )
                })?;
            used.push(found);
            *slot = Some(found);
        }

        Ok(DrudeParticle {
            particle: atom,
            parent,
            anisotropy_atoms,
            charge: def.charge,
            polarizability: def.polarizability,
            aniso12: def.aniso12,
            aniso34: def.aniso34,
            thole: def.thole,
        })
    }
}

impl ForceGenerator for DrudeGenerator {
    fn tag(&self) -> &str {
        TAG
    }

    fn merge(&mut self, node: &XmlNode) -> Result<(), LoadError> {
        for particle in node.children_named("Particle") {
            self.particles.push(DrudeDefinition {
                drude: TypeSelector::from_node(particle, "1")?,
                parent: TypeSelector::from_node(particle, "2")?,
                anisotropy: [
                    TypeSelector::from_node_opt(particle, "3")?,
                    TypeSelector::from_node_opt(particle, "4")?,
                    TypeSelector::from_node_opt(particle, "5")?,
                ],
                charge: particle.required_f64("charge")?,
                polarizability: particle.required_f64("polarizability")?,
                aniso12: particle.attr_f64("aniso12")?.unwrap_or(0.0),
                aniso34: particle.attr_f64("aniso34")?.unwrap_or(0.0),
                thole: particle.required_f64("thole")?,
            });
        }
        Ok(())
    }

    fn consumed_options(&self) -> &'static [OptionKey] {
        &[OptionKey::DrudeMass]
    }

    fn create_force(
        &self,
        data: &AssemblyData<'_>,
        _options: &CreateSystemOptions,
        model: &mut ForceModel,
    ) -> Result<(), AssemblyError> {
        let mut particles = Vec::new();
        for atom in 0..data.num_atoms() {
            let atom_type = data.atom_type(atom);
            if let Some(def) = self.particles.iter().find(|d| d.drude.matches(atom_type)) {
                particles.push(self.build_particle(data, atom, def)?);
            }
        }

        // Pairs of Drude particles whose parents are 1-2 or 1-3 neighbours.
        let separations = data.bonded_separations(2);
        let mut screened_pairs = Vec::new();
        for (i, a) in particles.iter().enumerate() {
            for (j, b) in particles.iter().enumerate().skip(i + 1) {
                let key = (a.parent.min(b.parent), a.parent.max(b.parent));
                if separations.contains_key(&key) {
                    screened_pairs.push(ScreenedPair {
                        first: i,
                        second: j,
                        thole: a.thole + b.thole,
                    });
                }
            }
        }
        debug!(
            particles = particles.len(),
            screened = screened_pairs.len(),
            "Built DrudeForce."
        );

        model.add_force(Force::Drude(DrudeTerms {
            particles,
            screened_pairs,
        }));
        Ok(())
    }

    /// Moves `drudeMass` from each parent onto its Drude particle.
    fn post_process(
        &self,
        _data: &AssemblyData<'_>,
        options: &CreateSystemOptions,
        model: &mut ForceModel,
    ) -> Result<(), AssemblyError> {
        let Some(terms) = model.drude() else {
            return Ok(());
        };
        let pairs: Vec<(usize, usize)> = terms.particles.iter().map(|p| (p.particle, p.parent)).collect();
        for (particle, parent) in pairs {
            let parent_mass = model
                .particle_mass(parent)
                .ok_or_else(|| AssemblyError::generator(TAG, format!("no mass for parent particle {parent}")))?;
            model.set_particle_mass(particle, options.drude_mass);
            model.set_particle_mass(parent, parent_mass - options.drude_mass);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Molecule, molecule, section};
    use super::*;

    /// Carbon and oxygen, each carrying a Drude particle, plus one hydrogen.
    fn polarizable() -> Molecule {
        molecule(
            "POL",
            &[
                ("C", "C", Some("C"), 0.0),
                ("DC", "DC", None, 0.0),
                ("O", "O", Some("O"), 0.0),
                ("DO", "DO", None, 0.0),
                ("H", "H", Some("H"), 0.0),
            ],
            &[(0, 1), (0, 2), (2, 3), (0, 4)],
            &[],
        )
    }

    fn generator() -> DrudeGenerator {
        let mut g = DrudeGenerator::default();
        g.merge(&section(
            r#"<DrudeForce>
                 <Particle type1="DC" type2="C" type3="O" charge="-1.1" polarizability="0.0017" aniso12="0.1" thole="1.3"/>
                 <Particle type1="DO" type2="O" charge="-1.4" polarizability="0.0009" thole="1.2"/>
               </DrudeForce>"#,
        ))
        .unwrap();
        g
    }

    #[test]
    fn drude_particles_find_their_parents_and_screened_pairs() {
        let mol = polarizable();
        let options = CreateSystemOptions::default();
        let data = mol.data(&options);
        let mut model = ForceModel::default();
        generator().create_force(&data, &options, &mut model).unwrap();

        let drude = model.drude().unwrap();
        assert_eq!(drude.particles.len(), 2);
        assert_eq!((drude.particles[0].particle, drude.particles[0].parent), (1, 0));
        assert_eq!(drude.particles[0].anisotropy_atoms, [Some(2), None, None]);
        assert_eq!(drude.particles[1].parent, 2);
        assert_eq!(drude.screened_pairs.len(), 1);
        assert!((drude.screened_pairs[0].thole - 2.5).abs() < 1e-12);
    }

    #[test]
    fn post_process_moves_drude_mass_off_the_parent() {
        let mol = polarizable();
        let options = CreateSystemOptions::default();
        let data = mol.data(&options);
        let masses = vec![12.011, 0.0, 15.999, 0.0, 1.008];
        let total: f64 = masses.iter().sum();
        let mut model = ForceModel::with_masses(masses);
        let g = generator();
        g.create_force(&data, &options, &mut model).unwrap();
        g.post_process(&data, &options, &mut model).unwrap();

        assert_eq!(model.particle_mass(1), Some(0.4));
        assert!((model.particle_mass(0).unwrap() - 11.611).abs() < 1e-9);
        assert!((model.particle_mass(2).unwrap() - 15.599).abs() < 1e-9);
        assert!((model.total_mass() - total).abs() < 1e-9);
    }

    #[test]
    fn a_drude_particle_without_a_parent_fails() {
        let mol = polarizable();
        let options = CreateSystemOptions::default();
        let data = mol.data(&options);
        let mut g = DrudeGenerator::default();
        g.merge(&section(
            r#"<DrudeForce><Particle type1="DO" type2="C" charge="-1" polarizability="0.001" thole="1"/></DrudeForce>"#,
        ))
        .unwrap();
        let err = g
            .create_force(&data, &options, &mut ForceModel::default())
            .unwrap_err();
        assert!(matches!(err, AssemblyError::Generator { .. }));
    }
}
