use super::signature::Signature;
use crate::core::models::element::Element;
use crate::core::models::topology::Topology;
use std::collections::BTreeMap;

/// An atom of a residue template.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateAtom {
    pub name: String,
    /// Name of the atom type; must be registered before the template is.
    pub atom_type: String,
    /// Element of the atom type, filled in when the template is registered.
    pub element: Option<Element>,
    /// Per-atom attributes such as `charge`, read by force generators.
    pub attributes: BTreeMap<String, f64>,
    /// Number of bonds this atom forms to atoms of other residues.
    pub external_bonds: usize,
}

impl TemplateAtom {
    pub fn new(name: &str, atom_type: &str) -> Self {
        Self {
            name: name.to_string(),
            atom_type: atom_type.to_string(),
            element: None,
            attributes: BTreeMap::new(),
            external_bonds: 0,
        }
    }

    pub fn with_attribute(mut self, key: &str, value: f64) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }
}

/// How a virtual site's position is computed from its parent atoms.
#[derive(Debug, Clone, PartialEq)]
pub enum VirtualSiteKind {
    TwoParticleAverage {
        weights: [f64; 2],
    },
    ThreeParticleAverage {
        weights: [f64; 3],
    },
    OutOfPlane {
        weight12: f64,
        weight13: f64,
        weight_cross: f64,
    },
    LocalCoordinates {
        origin_weights: Vec<f64>,
        x_weights: Vec<f64>,
        y_weights: Vec<f64>,
        local_position: [f64; 3],
    },
}

impl VirtualSiteKind {
    pub fn num_parents(&self) -> usize {
        match self {
            VirtualSiteKind::TwoParticleAverage { .. } => 2,
            VirtualSiteKind::ThreeParticleAverage { .. } | VirtualSiteKind::OutOfPlane { .. } => 3,
            VirtualSiteKind::LocalCoordinates { origin_weights, .. } => origin_weights.len(),
        }
    }
}

/// A virtual site declared by a template. All indices refer to template atoms.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateVirtualSite {
    pub site: usize,
    pub parents: Vec<usize>,
    pub kind: VirtualSiteKind,
    /// The atom whose nonbonded exclusions the site inherits.
    pub exclude_with: usize,
}

/// A residue template: the reference chemical graph a residue must be
/// isomorphic to, carrying the atom types and attributes it assigns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    pub name: String,
    pub atoms: Vec<TemplateAtom>,
    pub bonds: Vec<(usize, usize)>,
    pub virtual_sites: Vec<TemplateVirtualSite>,
    /// Replacement priority; 0 means the template cannot replace another one.
    pub override_level: u32,
    pub allowed_patches: Vec<String>,
}

impl Template {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn add_atom(&mut self, atom: TemplateAtom) -> usize {
        self.atoms.push(atom);
        self.atoms.len() - 1
    }

    /// Adds an internal bond.
    ///
    /// # Return
    ///
    /// `false` if either index is out of range, both are equal, or the bond already exists.
    pub fn add_bond(&mut self, atom1: usize, atom2: usize) -> bool {
        if atom1 == atom2
            || atom1 >= self.atoms.len()
            || atom2 >= self.atoms.len()
            || self.has_bond(atom1, atom2)
        {
            return false;
        }
        self.bonds.push((atom1, atom2));
        true
    }

    pub fn add_bond_by_name(&mut self, name1: &str, name2: &str) -> bool {
        match (self.atom_index(name1), self.atom_index(name2)) {
            (Some(a), Some(b)) => self.add_bond(a, b),
            _ => false,
        }
    }

    pub fn add_external_bond(&mut self, atom: usize) -> bool {
        match self.atoms.get_mut(atom) {
            Some(a) => {
                a.external_bonds += 1;
                true
            }
            None => false,
        }
    }

    pub fn atom_index(&self, name: &str) -> Option<usize> {
        self.atoms.iter().position(|a| a.name == name)
    }

    pub fn has_bond(&self, atom1: usize, atom2: usize) -> bool {
        self.bonds
            .iter()
            .any(|&(a, b)| (a == atom1 && b == atom2) || (a == atom2 && b == atom1))
    }

    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        let mut adjacency = vec![Vec::new(); self.atoms.len()];
        for &(a, b) in &self.bonds {
            adjacency[a].push(b);
            adjacency[b].push(a);
        }
        adjacency
    }

    pub fn signature(&self) -> Signature {
        Signature::from_elements(self.atoms.iter().map(|a| a.element))
    }

    pub fn has_extra_particles(&self) -> bool {
        self.atoms.iter().any(|a| a.element.is_none())
    }

    /// Builds an untyped template mirroring a residue of a topology.
    ///
    /// Atom names, elements, internal bonds and external-bond counts are copied;
    /// atom types are left empty for the caller to fill in.
    ///
    /// # Return
    ///
    /// `None` if the residue does not exist.
    pub fn from_residue(topology: &Topology, residue: usize) -> Option<Template> {
        let res = topology.residue(residue)?;
        let mut template = Template::new(&res.name);
        let mut local = BTreeMap::new();
        for &atom_index in res.atoms() {
            let atom = topology.atom(atom_index)?;
            let mut template_atom = TemplateAtom::new(&atom.name, "");
            template_atom.element = atom.element;
            local.insert(atom_index, template.add_atom(template_atom));
        }
        let (internal, external) = topology.residue_bonds(residue);
        for bond in internal {
            template.add_bond(local[&bond.atom1], local[&bond.atom2]);
        }
        for bond in external {
            template.add_external_bond(local[&bond.atom1]);
        }
        Some(template)
    }
}
