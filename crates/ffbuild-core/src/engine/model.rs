//! The parameterized force model produced by system assembly.

use super::config::NonbondedMethod;
use crate::core::forcefield::template::VirtualSiteKind;
use nalgebra::Vector3;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraint {
    pub atom1: usize,
    pub atom2: usize,
    pub distance: f64,
}

/// A virtual site bound to concrete particles.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualSite {
    pub particle: usize,
    pub parents: Vec<usize>,
    pub kind: VirtualSiteKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicBond {
    pub atoms: [usize; 2],
    pub length: f64,
    pub k: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicAngle {
    pub atoms: [usize; 3],
    pub angle: f64,
    pub k: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodicTorsion {
    pub atoms: [usize; 4],
    pub periodicity: u32,
    pub phase: f64,
    pub k: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NonbondedParticle {
    pub charge: f64,
    pub sigma: f64,
    pub epsilon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NonbondedException {
    pub atoms: [usize; 2],
    pub charge_prod: f64,
    pub sigma: f64,
    pub epsilon: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NonbondedTerms {
    pub method: NonbondedMethod,
    pub cutoff: f64,
    pub switch_distance: Option<f64>,
    pub use_dispersion_correction: bool,
    pub coulomb14scale: f64,
    pub lj14scale: f64,
    pub particles: Vec<NonbondedParticle>,
    pub exceptions: Vec<NonbondedException>,
}

/// One pair-parameter 1-4 interaction of a Lennard-Jones force.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LennardJonesPair {
    pub atoms: [usize; 2],
    pub sigma: f64,
    pub epsilon: f64,
}

/// A tabulated Lennard-Jones force: each particle has an LJ type, and every
/// pair of types has its own sigma/epsilon (Lorentz-Berthelot unless an
/// NBFix entry overrides it).
#[derive(Debug, Clone, PartialEq)]
pub struct LennardJonesTerms {
    pub method: NonbondedMethod,
    pub cutoff: f64,
    pub switch_distance: Option<f64>,
    pub use_long_range_correction: bool,
    pub type_names: Vec<String>,
    pub particle_types: Vec<usize>,
    sigma: Vec<f64>,
    epsilon: Vec<f64>,
    pub pairs14: Vec<LennardJonesPair>,
    pub exclusions: Vec<[usize; 2]>,
}

impl LennardJonesTerms {
    pub(crate) fn new(
        method: NonbondedMethod,
        cutoff: f64,
        switch_distance: Option<f64>,
        use_long_range_correction: bool,
        type_names: Vec<String>,
        particle_types: Vec<usize>,
    ) -> Self {
        let n = type_names.len();
        Self {
            method,
            cutoff,
            switch_distance,
            use_long_range_correction,
            type_names,
            particle_types,
            sigma: vec![0.0; n * n],
            epsilon: vec![0.0; n * n],
            pairs14: Vec::new(),
            exclusions: Vec::new(),
        }
    }

    pub fn num_types(&self) -> usize {
        self.type_names.len()
    }

    pub(crate) fn set_pair(&mut self, i: usize, j: usize, sigma: f64, epsilon: f64) {
        let n = self.num_types();
        self.sigma[i * n + j] = sigma;
        self.sigma[j * n + i] = sigma;
        self.epsilon[i * n + j] = epsilon;
        self.epsilon[j * n + i] = epsilon;
    }

    /// `(sigma, epsilon)` between two LJ types.
    pub fn pair(&self, i: usize, j: usize) -> (f64, f64) {
        let n = self.num_types();
        (self.sigma[i * n + j], self.epsilon[i * n + j])
    }

    /// `(sigma, epsilon)` between two particles.
    pub fn particle_pair(&self, a: usize, b: usize) -> (f64, f64) {
        self.pair(self.particle_types[a], self.particle_types[b])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomNonbondedTerms {
    pub energy: String,
    pub method: NonbondedMethod,
    pub cutoff: f64,
    pub switch_distance: Option<f64>,
    pub use_long_range_correction: bool,
    pub global_parameters: Vec<(String, f64)>,
    pub per_particle_parameters: Vec<String>,
    pub computed_values: Vec<(String, String)>,
    pub particles: Vec<Vec<f64>>,
    pub exclusions: Vec<[usize; 2]>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GbsaParticle {
    pub charge: f64,
    pub radius: f64,
    pub scale: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GbsaObcTerms {
    pub method: NonbondedMethod,
    pub cutoff: f64,
    pub solvent_dielectric: f64,
    pub solute_dielectric: f64,
    pub kappa: f64,
    pub particles: Vec<GbsaParticle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CmapGrid {
    pub size: usize,
    pub energies: Vec<f64>,
}

/// Two consecutive torsions sharing three atoms: `phi = atoms[0..4]`, `psi = atoms[1..5]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CmapTorsion {
    pub map: usize,
    pub atoms: [usize; 5],
}

impl CmapTorsion {
    pub fn phi(&self) -> [usize; 4] {
        [self.atoms[0], self.atoms[1], self.atoms[2], self.atoms[3]]
    }

    pub fn psi(&self) -> [usize; 4] {
        [self.atoms[1], self.atoms[2], self.atoms[3], self.atoms[4]]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CmapTerms {
    pub maps: Vec<CmapGrid>,
    pub torsions: Vec<CmapTorsion>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrudeParticle {
    pub particle: usize,
    pub parent: usize,
    pub anisotropy_atoms: [Option<usize>; 3],
    pub charge: f64,
    pub polarizability: f64,
    pub aniso12: f64,
    pub aniso34: f64,
    pub thole: f64,
}

/// Screened dipole-dipole interaction between two Drude particles (by index
/// into `DrudeTerms::particles`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenedPair {
    pub first: usize,
    pub second: usize,
    pub thole: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrudeTerms {
    pub particles: Vec<DrudeParticle>,
    pub screened_pairs: Vec<ScreenedPair>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Force {
    HarmonicBond(Vec<HarmonicBond>),
    HarmonicAngle(Vec<HarmonicAngle>),
    PeriodicTorsion(Vec<PeriodicTorsion>),
    Nonbonded(NonbondedTerms),
    LennardJones(LennardJonesTerms),
    CustomNonbonded(CustomNonbondedTerms),
    GbsaObc(GbsaObcTerms),
    Cmap(CmapTerms),
    Drude(DrudeTerms),
}

impl Force {
    pub fn kind(&self) -> &'static str {
        match self {
            Force::HarmonicBond(_) => "HarmonicBondForce",
            Force::HarmonicAngle(_) => "HarmonicAngleForce",
            Force::PeriodicTorsion(_) => "PeriodicTorsionForce",
            Force::Nonbonded(_) => "NonbondedForce",
            Force::LennardJones(_) => "LennardJonesForce",
            Force::CustomNonbonded(_) => "CustomNonbondedForce",
            Force::GbsaObc(_) => "GBSAOBCForce",
            Force::Cmap(_) => "CMAPTorsionForce",
            Force::Drude(_) => "DrudeForce",
        }
    }
}

/// The assembled system: particles, constraints, virtual sites and forces.
///
/// Built by `ForceField::create_system`; immutable once returned.
#[derive(Debug, Clone, Default)]
pub struct ForceModel {
    masses: Vec<f64>,
    constraints: Vec<Constraint>,
    constraint_index: HashMap<(usize, usize), usize>,
    virtual_sites: Vec<VirtualSite>,
    forces: Vec<Force>,
    remove_cm_motion: bool,
    box_vectors: Option<[Vector3<f64>; 3]>,
    warnings: Vec<String>,
}

impl ForceModel {
    pub(crate) fn with_masses(masses: Vec<f64>) -> Self {
        Self {
            masses,
            ..Self::default()
        }
    }

    pub fn num_particles(&self) -> usize {
        self.masses.len()
    }

    pub fn particle_mass(&self, particle: usize) -> Option<f64> {
        self.masses.get(particle).copied()
    }

    pub fn masses(&self) -> &[f64] {
        &self.masses
    }

    pub fn total_mass(&self) -> f64 {
        self.masses.iter().sum()
    }

    pub(crate) fn set_particle_mass(&mut self, particle: usize, mass: f64) {
        self.masses[particle] = mass;
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Adds a distance constraint; a repeated pair keeps a single entry with
    /// the latest distance.
    pub(crate) fn add_constraint(&mut self, atom1: usize, atom2: usize, distance: f64) {
        let key = (atom1.min(atom2), atom1.max(atom2));
        match self.constraint_index.get(&key) {
            Some(&i) => self.constraints[i].distance = distance,
            None => {
                self.constraint_index.insert(key, self.constraints.len());
                self.constraints.push(Constraint {
                    atom1,
                    atom2,
                    distance,
                });
            }
        }
    }

    pub fn is_constrained(&self, atom1: usize, atom2: usize) -> bool {
        self.constraint_index
            .contains_key(&(atom1.min(atom2), atom1.max(atom2)))
    }

    pub fn virtual_sites(&self) -> &[VirtualSite] {
        &self.virtual_sites
    }

    pub(crate) fn add_virtual_site(&mut self, site: VirtualSite) {
        self.virtual_sites.push(site);
    }

    pub fn forces(&self) -> &[Force] {
        &self.forces
    }

    pub(crate) fn add_force(&mut self, force: Force) {
        self.forces.push(force);
    }

    pub(crate) fn forces_mut(&mut self) -> &mut [Force] {
        &mut self.forces
    }

    pub fn remove_cm_motion(&self) -> bool {
        self.remove_cm_motion
    }

    pub(crate) fn set_remove_cm_motion(&mut self, remove: bool) {
        self.remove_cm_motion = remove;
    }

    pub fn periodic_box_vectors(&self) -> Option<&[Vector3<f64>; 3]> {
        self.box_vectors.as_ref()
    }

    pub(crate) fn set_periodic_box_vectors(&mut self, vectors: Option<[Vector3<f64>; 3]>) {
        self.box_vectors = vectors;
    }

    /// Warnings raised during assembly, such as option conflicts.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub(crate) fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }

    pub fn harmonic_bonds(&self) -> impl Iterator<Item = &HarmonicBond> {
        self.forces.iter().flat_map(|f| match f {
            Force::HarmonicBond(terms) => terms.as_slice(),
            _ => Default::default(),
        })
    }

    pub fn harmonic_angles(&self) -> impl Iterator<Item = &HarmonicAngle> {
        self.forces.iter().flat_map(|f| match f {
            Force::HarmonicAngle(terms) => terms.as_slice(),
            _ => Default::default(),
        })
    }

    pub fn periodic_torsions(&self) -> impl Iterator<Item = &PeriodicTorsion> {
        self.forces.iter().flat_map(|f| match f {
            Force::PeriodicTorsion(terms) => terms.as_slice(),
            _ => Default::default(),
        })
    }

    pub fn nonbonded(&self) -> Option<&NonbondedTerms> {
        self.forces.iter().find_map(|f| match f {
            Force::Nonbonded(terms) => Some(terms),
            _ => None,
        })
    }

    pub fn lennard_jones(&self) -> Option<&LennardJonesTerms> {
        self.forces.iter().find_map(|f| match f {
            Force::LennardJones(terms) => Some(terms),
            _ => None,
        })
    }

    pub fn custom_nonbonded(&self) -> impl Iterator<Item = &CustomNonbondedTerms> {
        self.forces.iter().filter_map(|f| match f {
            Force::CustomNonbonded(terms) => Some(terms),
            _ => None,
        })
    }

    pub fn gbsa_obc(&self) -> Option<&GbsaObcTerms> {
        self.forces.iter().find_map(|f| match f {
            Force::GbsaObc(terms) => Some(terms),
            _ => None,
        })
    }

    pub fn cmap(&self) -> Option<&CmapTerms> {
        self.forces.iter().find_map(|f| match f {
            Force::Cmap(terms) => Some(terms),
            _ => None,
        })
    }

    pub fn drude(&self) -> Option<&DrudeTerms> {
        self.forces.iter().find_map(|f| match f {
            Force::Drude(terms) => Some(terms),
            _ => None,
        })
    }
}
