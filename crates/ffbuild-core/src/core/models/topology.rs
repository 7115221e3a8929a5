use super::element::Element;
use nalgebra::Vector3;
use std::collections::HashSet;

/// An atom (or extra particle) of a [`Topology`].
///
/// Extra particles such as virtual sites and Drude particles carry no element.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub name: String,
    pub element: Option<Element>,
    pub residue: usize,
    pub index: usize,
}

impl Atom {
    pub fn is_extra_particle(&self) -> bool {
        self.element.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Residue {
    pub name: String,
    pub id: String,
    pub chain: usize,
    pub index: usize,
    atoms: Vec<usize>,
}

impl Residue {
    /// Global indices of this residue's atoms, in insertion order.
    pub fn atoms(&self) -> &[usize] {
        &self.atoms
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub id: String,
    pub index: usize,
    residues: Vec<usize>,
}

impl Chain {
    pub fn residues(&self) -> &[usize] {
        &self.residues
    }
}

/// A bond between two atoms, referenced by global atom index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bond {
    pub atom1: usize,
    pub atom2: usize,
}

impl Bond {
    /// The bond's atom pair with the smaller index first.
    pub fn canonical(&self) -> (usize, usize) {
        if self.atom1 <= self.atom2 {
            (self.atom1, self.atom2)
        } else {
            (self.atom2, self.atom1)
        }
    }
}

/// The chemical graph handed to the force field: chains of residues of atoms,
/// the bonds between atoms, and optional periodic box vectors.
///
/// Atom indices are global and assigned in insertion order; they become the
/// particle indices of the assembled force model.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    chains: Vec<Chain>,
    residues: Vec<Residue>,
    atoms: Vec<Atom>,
    bonds: Vec<Bond>,
    bond_set: HashSet<(usize, usize)>,
    adjacency: Vec<Vec<usize>>,
    /// Indices into `bonds` of the bonds touching each residue.
    residue_bonds: Vec<Vec<usize>>,
    box_vectors: Option<[Vector3<f64>; 3]>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new chain.
    ///
    /// # Return
    ///
    /// The index of the new chain.
    pub fn add_chain(&mut self, id: &str) -> usize {
        let index = self.chains.len();
        self.chains.push(Chain {
            id: id.to_string(),
            index,
            residues: Vec::new(),
        });
        index
    }

    /// Appends a new residue to an existing chain.
    ///
    /// # Arguments
    ///
    /// * `name` - The residue name used for template lookup and diagnostics.
    /// * `chain` - Index of the owning chain.
    /// * `id` - Optional residue identifier; defaults to the one-based position in the chain.
    ///
    /// # Return
    ///
    /// Returns `Some(index)` of the new residue, or `None` if the chain does not exist.
    pub fn add_residue(&mut self, name: &str, chain: usize, id: Option<&str>) -> Option<usize> {
        let index = self.residues.len();
        let chain_ref = self.chains.get_mut(chain)?;
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| (chain_ref.residues.len() + 1).to_string());
        chain_ref.residues.push(index);
        self.residues.push(Residue {
            name: name.to_string(),
            id,
            chain,
            index,
            atoms: Vec::new(),
        });
        self.residue_bonds.push(Vec::new());
        Some(index)
    }

    /// Appends a new atom to an existing residue.
    ///
    /// # Return
    ///
    /// Returns `Some(index)` of the new atom, or `None` if the residue does not exist.
    pub fn add_atom(
        &mut self,
        name: &str,
        element: Option<Element>,
        residue: usize,
    ) -> Option<usize> {
        let index = self.atoms.len();
        self.residues.get_mut(residue)?.atoms.push(index);
        self.atoms.push(Atom {
            name: name.to_string(),
            element,
            residue,
            index,
        });
        self.adjacency.push(Vec::new());
        Some(index)
    }

    /// Adds a bond between two atoms. Adding an existing bond again is a no-op.
    ///
    /// # Return
    ///
    /// Returns `None` if either atom does not exist or both indices are equal.
    pub fn add_bond(&mut self, atom1: usize, atom2: usize) -> Option<()> {
        if atom1 == atom2 || atom1 >= self.atoms.len() || atom2 >= self.atoms.len() {
            return None;
        }
        let bond = Bond { atom1, atom2 };
        if self.bond_set.insert(bond.canonical()) {
            let id = self.bonds.len();
            self.bonds.push(bond);
            self.adjacency[atom1].push(atom2);
            self.adjacency[atom2].push(atom1);
            let (r1, r2) = (self.atoms[atom1].residue, self.atoms[atom2].residue);
            self.residue_bonds[r1].push(id);
            if r2 != r1 {
                self.residue_bonds[r2].push(id);
            }
        }
        Some(())
    }

    pub fn set_periodic_box_vectors(&mut self, vectors: Option<[Vector3<f64>; 3]>) {
        self.box_vectors = vectors;
    }

    pub fn periodic_box_vectors(&self) -> Option<&[Vector3<f64>; 3]> {
        self.box_vectors.as_ref()
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn residues(&self) -> &[Residue] {
        &self.residues
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    pub fn atom(&self, index: usize) -> Option<&Atom> {
        self.atoms.get(index)
    }

    pub fn residue(&self, index: usize) -> Option<&Residue> {
        self.residues.get(index)
    }

    pub fn chain(&self, index: usize) -> Option<&Chain> {
        self.chains.get(index)
    }

    pub fn num_atoms(&self) -> usize {
        self.atoms.len()
    }

    /// Atoms bonded to `atom`, in bond insertion order.
    pub fn neighbors(&self, atom: usize) -> &[usize] {
        self.adjacency.get(atom).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_bonded(&self, atom1: usize, atom2: usize) -> bool {
        let key = if atom1 <= atom2 {
            (atom1, atom2)
        } else {
            (atom2, atom1)
        };
        self.bond_set.contains(&key)
    }

    /// Indices into [`bonds`](Self::bonds) of every bond touching a residue,
    /// in bond insertion order. The index is kept up to date by
    /// [`add_bond`](Self::add_bond), so lookups never scan the whole bond list.
    pub fn residue_bond_indices(&self, residue: usize) -> &[usize] {
        self.residue_bonds.get(residue).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Splits the bonds touching a residue into internal bonds and external ones.
    ///
    /// # Return
    ///
    /// A tuple `(internal, external)`. External bonds are reported with the
    /// residue's own atom as `atom1`.
    pub fn residue_bonds(&self, residue: usize) -> (Vec<Bond>, Vec<Bond>) {
        let mut internal = Vec::new();
        let mut external = Vec::new();
        for &id in self.residue_bond_indices(residue) {
            let bond = self.bonds[id];
            let r1 = self.atoms[bond.atom1].residue;
            let r2 = self.atoms[bond.atom2].residue;
            match (r1 == residue, r2 == residue) {
                (true, true) => internal.push(bond),
                (true, false) => external.push(bond),
                (false, true) => external.push(Bond {
                    atom1: bond.atom2,
                    atom2: bond.atom1,
                }),
                (false, false) => {}
            }
        }
        (internal, external)
    }

    /// Whether a residue is the first or last residue of its chain.
    pub fn is_chain_terminal(&self, residue: usize) -> bool {
        let Some(res) = self.residues.get(residue) else {
            return false;
        };
        let chain = &self.chains[res.chain].residues;
        chain.first() == Some(&residue) || chain.last() == Some(&residue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dipeptide() -> Topology {
        let mut top = Topology::new();
        let chain = top.add_chain("A");
        let r0 = top.add_residue("ALA", chain, None).unwrap();
        let r1 = top.add_residue("GLY", chain, None).unwrap();
        let n = top.add_atom("N", Some(Element::NITROGEN), r0).unwrap();
        let ca = top.add_atom("CA", Some(Element::CARBON), r0).unwrap();
        let c = top.add_atom("C", Some(Element::CARBON), r0).unwrap();
        let n2 = top.add_atom("N", Some(Element::NITROGEN), r1).unwrap();
        let ca2 = top.add_atom("CA", Some(Element::CARBON), r1).unwrap();
        top.add_bond(n, ca).unwrap();
        top.add_bond(ca, c).unwrap();
        top.add_bond(c, n2).unwrap();
        top.add_bond(n2, ca2).unwrap();
        top
    }

    #[test]
    fn residue_ids_default_to_chain_position() {
        let top = dipeptide();
        assert_eq!(top.residue(0).unwrap().id, "1");
        assert_eq!(top.residue(1).unwrap().id, "2");
        assert_eq!(top.chain(0).unwrap().residues(), &[0, 1]);
    }

    #[test]
    fn add_bond_is_idempotent_and_symmetric() {
        let mut top = dipeptide();
        assert_eq!(top.bonds().len(), 4);
        top.add_bond(1, 0).unwrap();
        assert_eq!(top.bonds().len(), 4);
        assert!(top.is_bonded(1, 0));
        assert_eq!(top.neighbors(1), &[0, 2]);
    }

    #[test]
    fn add_bond_rejects_invalid_atoms() {
        let mut top = dipeptide();
        assert!(top.add_bond(0, 0).is_none());
        assert!(top.add_bond(0, 99).is_none());
    }

    #[test]
    fn residue_bonds_splits_internal_and_external() {
        let top = dipeptide();
        let (internal, external) = top.residue_bonds(1);
        assert_eq!(internal.len(), 1);
        assert_eq!(external, vec![Bond { atom1: 3, atom2: 2 }]);
    }

    #[test]
    fn residue_bond_index_tracks_only_touching_bonds() {
        let mut top = dipeptide();
        assert_eq!(top.residue_bond_indices(0), &[0, 1, 2]);
        assert_eq!(top.residue_bond_indices(1), &[2, 3]);
        top.add_bond(3, 2).unwrap();
        assert_eq!(top.residue_bond_indices(1), &[2, 3]);

        let chain = top.add_chain("W");
        let water = top.add_residue("HOH", chain, None).unwrap();
        let o = top.add_atom("O", Some(Element::OXYGEN), water).unwrap();
        let h = top.add_atom("H1", Some(Element::HYDROGEN), water).unwrap();
        top.add_bond(o, h).unwrap();
        assert_eq!(top.residue_bond_indices(water), &[4]);
        assert_eq!(top.residue_bond_indices(0), &[0, 1, 2]);
        assert!(top.residue_bond_indices(9).is_empty());
        assert_eq!(top.residue_bonds(water).0, vec![Bond { atom1: o, atom2: h }]);
    }

    #[test]
    fn adding_to_missing_parents_returns_none() {
        let mut top = Topology::new();
        assert!(top.add_residue("ALA", 0, None).is_none());
        assert!(top.add_atom("CA", Some(Element::CARBON), 3).is_none());
    }

    #[test]
    fn terminal_residues_are_detected() {
        let mut top = dipeptide();
        let chain = top.chain(0).unwrap().index;
        top.add_residue("SER", chain, Some("7")).unwrap();
        assert!(top.is_chain_terminal(0));
        assert!(!top.is_chain_terminal(1));
        assert!(top.is_chain_terminal(2));
    }
}
