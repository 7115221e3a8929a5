use super::config::{Constraints, CreateSystemOptions};
use super::error::AssemblyError;
use super::matcher::TemplateMatch;
use crate::core::forcefield::atom_type::AtomType;
use crate::core::forcefield::library::TemplateLibrary;
use crate::core::forcefield::template::{Template, TemplateAtom, VirtualSiteKind};
use crate::core::models::element::Element;
use crate::core::models::topology::Topology;
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

/// Residue names treated as water by the rigid-water policy.
pub const WATER_RESIDUE_NAMES: [&str; 2] = ["HOH", "WAT"];

/// A template virtual site resolved to particle indices.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSite {
    pub particle: usize,
    pub parents: Vec<usize>,
    pub kind: VirtualSiteKind,
    pub exclude_with: usize,
}

/// Per-call view of a matched topology handed to force generators.
///
/// Holds the template chosen for every residue, the atom type of every
/// atom, the bonded terms derived from connectivity, and the constraint
/// flags computed from the constraint and rigid-water policies.
pub struct AssemblyData<'a> {
    pub topology: &'a Topology,
    matches: Vec<TemplateMatch<'a>>,
    atom_types: Vec<&'a AtomType>,
    template_atom: Vec<usize>,
    is_water: Vec<bool>,
    pub bonds: Vec<[usize; 2]>,
    bond_constrained: Vec<bool>,
    bond_lengths: Vec<Option<f64>>,
    bond_index: HashMap<(usize, usize), usize>,
    pub angles: Vec<[usize; 3]>,
    angle_constrained: Vec<bool>,
    pub propers: Vec<[usize; 4]>,
    pub impropers: Vec<[usize; 4]>,
    pub virtual_sites: Vec<ResolvedSite>,
}

fn pair_key(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

impl<'a> AssemblyData<'a> {
    /// Builds the assembly view from one match per residue, in residue order.
    pub fn new(
        topology: &'a Topology,
        library: &'a TemplateLibrary,
        matches: Vec<TemplateMatch<'a>>,
        options: &CreateSystemOptions,
    ) -> Result<Self, AssemblyError> {
        let n = topology.num_atoms();
        let mut atom_types: Vec<Option<&'a AtomType>> = vec![None; n];
        let mut template_atom = vec![0; n];

        for m in &matches {
            let residue = &topology.residues()[m.residue];
            for (local, &global) in residue.atoms().iter().enumerate() {
                let Some(t) = m.atom_map[local] else {
                    return Err(AssemblyError::NoTemplate {
                        residue: m.residue,
                        name: residue.name.clone(),
                        detail: format!(
                            "The extra particle {} has no counterpart in template {}.",
                            topology.atoms()[global].name,
                            m.template.name
                        ),
                    });
                };
                let type_name = &m.template.atoms[t].atom_type;
                let atom_type = library.atom_type(type_name).ok_or_else(|| {
                    AssemblyError::from(crate::core::error::LoadError::UnknownType {
                        name: type_name.clone(),
                        context: format!("Template '{}'", m.template.name),
                    })
                })?;
                atom_types[global] = Some(atom_type);
                template_atom[global] = t;
            }
        }
        let atom_types = atom_types
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                t.ok_or_else(|| AssemblyError::generator("AssemblyData", format!("atom {i} was not matched")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let virtual_sites = resolve_virtual_sites(topology, &matches);

        let is_water = topology
            .atoms()
            .iter()
            .map(|a| WATER_RESIDUE_NAMES.contains(&topology.residues()[a.residue].name.as_str()))
            .collect();

        let mut data = Self {
            topology,
            matches,
            atom_types,
            template_atom,
            is_water,
            bonds: Vec::new(),
            bond_constrained: Vec::new(),
            bond_lengths: Vec::new(),
            bond_index: HashMap::new(),
            angles: Vec::new(),
            angle_constrained: Vec::new(),
            propers: Vec::new(),
            impropers: Vec::new(),
            virtual_sites,
        };
        data.collect_bonded_terms();
        data.apply_constraint_policy(options);
        Ok(data)
    }

    fn collect_bonded_terms(&mut self) {
        let topology = self.topology;
        for bond in topology.bonds() {
            self.bond_index
                .insert(bond.canonical(), self.bonds.len());
            self.bonds.push([bond.atom1, bond.atom2]);
        }
        self.bond_lengths = vec![None; self.bonds.len()];

        for center in 0..topology.num_atoms() {
            let neighbors: Vec<usize> = topology.neighbors(center).iter().copied().sorted().collect();
            for (&i, &k) in neighbors.iter().tuple_combinations() {
                self.angles.push([i, center, k]);
            }
            for (&a, &b, &c) in neighbors.iter().tuple_combinations() {
                self.impropers.push([center, a, b, c]);
            }
        }

        let mut central: Vec<(usize, usize)> = self.bond_index.keys().copied().collect();
        central.sort_unstable();
        for (j, k) in central {
            for &i in topology.neighbors(j) {
                if i == k {
                    continue;
                }
                for &l in topology.neighbors(k) {
                    if l != j && l != i {
                        self.propers.push([i, j, k, l]);
                    }
                }
            }
        }
    }

    fn apply_constraint_policy(&mut self, options: &CreateSystemOptions) {
        let rigid_water = options.rigid_water_enabled();
        let is_h = |atom: usize| self.element(atom) == Some(Element::HYDROGEN);

        let bond_constrained: Vec<bool> = self
            .bonds
            .iter()
            .map(|&[a, b]| {
                if self.same_water(&[a, b]) {
                    rigid_water
                } else {
                    match options.constraints {
                        Constraints::None => false,
                        Constraints::HBonds => is_h(a) || is_h(b),
                        Constraints::AllBonds | Constraints::HAngles => true,
                    }
                }
            })
            .collect();

        let angle_constrained: Vec<bool> = self
            .angles
            .iter()
            .map(|&[i, j, k]| {
                if self.same_water(&[i, j, k]) {
                    rigid_water
                } else if options.constraints == Constraints::HAngles {
                    let hydrogens = usize::from(is_h(i)) + usize::from(is_h(k));
                    hydrogens == 2 || (hydrogens == 1 && self.element(j) == Some(Element::OXYGEN))
                } else {
                    false
                }
            })
            .collect();

        self.bond_constrained = bond_constrained;
        self.angle_constrained = angle_constrained;
    }

    fn same_water(&self, atoms: &[usize]) -> bool {
        let residue = self.topology.atoms()[atoms[0]].residue;
        atoms
            .iter()
            .all(|&a| self.is_water[a] && self.topology.atoms()[a].residue == residue)
    }

    pub fn num_atoms(&self) -> usize {
        self.atom_types.len()
    }

    pub fn atom_type(&self, atom: usize) -> &'a AtomType {
        self.atom_types[atom]
    }

    pub fn element(&self, atom: usize) -> Option<Element> {
        self.topology.atoms()[atom].element
    }

    pub fn is_water(&self, atom: usize) -> bool {
        self.is_water[atom]
    }

    pub fn matches(&self) -> &[TemplateMatch<'a>] {
        &self.matches
    }

    /// The template matched to the residue owning `atom`.
    pub fn template_of(&self, atom: usize) -> &Template {
        &self.matches[self.topology.atoms()[atom].residue].template
    }

    pub fn template_atom(&self, atom: usize) -> &TemplateAtom {
        &self.template_of(atom).atoms[self.template_atom[atom]]
    }

    /// Index of the template atom matched to `atom` within its template.
    pub fn template_atom_index(&self, atom: usize) -> usize {
        self.template_atom[atom]
    }

    /// A per-atom template attribute such as `charge`.
    pub fn template_attribute(&self, atom: usize, name: &str) -> Option<f64> {
        self.template_atom(atom).attributes.get(name).copied()
    }

    pub fn bond_is_constrained(&self, bond: usize) -> bool {
        self.bond_constrained[bond]
    }

    pub fn angle_is_constrained(&self, angle: usize) -> bool {
        self.angle_constrained[angle]
    }

    pub fn bond_index(&self, a: usize, b: usize) -> Option<usize> {
        self.bond_index.get(&pair_key(a, b)).copied()
    }

    pub fn bond_length(&self, a: usize, b: usize) -> Option<f64> {
        self.bond_index(a, b).and_then(|i| self.bond_lengths[i])
    }

    pub(crate) fn set_bond_length(&mut self, bond: usize, length: f64) {
        self.bond_lengths[bond] = Some(length);
    }

    /// Every pair of atoms separated by at most `max_bonds` bonds, with its
    /// shortest bond-path length, ordered by pair.
    pub fn bonded_separations(&self, max_bonds: usize) -> BTreeMap<(usize, usize), usize> {
        let mut separations = BTreeMap::new();
        if max_bonds == 0 {
            return separations;
        }
        let mut distance = vec![usize::MAX; self.num_atoms()];
        let mut touched = Vec::new();
        for start in 0..self.num_atoms() {
            let mut queue = VecDeque::from([start]);
            distance[start] = 0;
            touched.push(start);
            while let Some(atom) = queue.pop_front() {
                let d = distance[atom];
                if d == max_bonds {
                    continue;
                }
                for &next in self.topology.neighbors(atom) {
                    if distance[next] == usize::MAX {
                        distance[next] = d + 1;
                        touched.push(next);
                        queue.push_back(next);
                        if next > start {
                            separations.insert((start, next), d + 1);
                        }
                    }
                }
            }
            for atom in touched.drain(..) {
                distance[atom] = usize::MAX;
            }
        }
        separations
    }

    /// Like [`AssemblyData::bonded_separations`], but each virtual site also
    /// takes on the separations of its `exclude_with` atom and sits one bond
    /// away from it.
    pub fn pair_separations(&self, max_bonds: usize) -> BTreeMap<(usize, usize), usize> {
        let mut separations = self.bonded_separations(max_bonds);
        if max_bonds == 0 {
            return separations;
        }
        for site in &self.virtual_sites {
            let (v, p) = (site.particle, site.exclude_with);
            if v == p {
                continue;
            }
            let inherited: Vec<(usize, usize)> = separations
                .iter()
                .filter_map(|(&(a, b), &d)| match (a == p, b == p) {
                    (true, _) => Some((b, d)),
                    (_, true) => Some((a, d)),
                    _ => None,
                })
                .collect();
            for (other, d) in std::iter::once((p, 1)).chain(inherited) {
                if other == v {
                    continue;
                }
                separations
                    .entry(pair_key(v, other))
                    .and_modify(|e| *e = (*e).min(d))
                    .or_insert(d);
            }
        }
        separations
    }
}

fn resolve_virtual_sites(topology: &Topology, matches: &[TemplateMatch<'_>]) -> Vec<ResolvedSite> {
    let mut sites = Vec::new();
    for m in matches {
        let residue_atoms = topology.residues()[m.residue].atoms();
        let mut global = vec![None; m.template.atoms.len()];
        for (local, t) in m.atom_map.iter().enumerate() {
            if let Some(t) = *t {
                global[t] = Some(residue_atoms[local]);
            }
        }
        for site in &m.template.virtual_sites {
            let particle = global[site.site];
            let parents: Option<Vec<usize>> = site.parents.iter().map(|&p| global[p]).collect();
            let exclude_with = global[site.exclude_with];
            match (particle, parents, exclude_with) {
                (Some(particle), Some(parents), Some(exclude_with)) => sites.push(ResolvedSite {
                    particle,
                    parents,
                    kind: site.kind.clone(),
                    exclude_with,
                }),
                _ => debug!(
                    residue = m.residue + 1,
                    template = %m.template.name,
                    "Virtual site has no counterpart in the residue; skipping."
                ),
            }
        }
    }
    sites
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::template::TemplateAtom;
    use std::borrow::Cow;

    struct Fixture {
        topology: Topology,
        library: TemplateLibrary,
    }

    /// Methanol (MOH) plus one water.
    fn fixture() -> Fixture {
        let mut library = TemplateLibrary::new();
        for (name, el, mass) in [
            ("CT", Element::CARBON, 12.01),
            ("OH", Element::OXYGEN, 16.0),
            ("HO", Element::HYDROGEN, 1.008),
            ("HC", Element::HYDROGEN, 1.008),
        ] {
            library
                .register_atom_type(AtomType::new(name, name, Some(el), mass))
                .unwrap();
        }
        let mut topology = Topology::new();
        let chain = topology.add_chain("A");
        let moh = topology.add_residue("MOH", chain, None).unwrap();
        let c = topology.add_atom("C", Some(Element::CARBON), moh).unwrap();
        let o = topology.add_atom("O", Some(Element::OXYGEN), moh).unwrap();
        let ho = topology.add_atom("HO", Some(Element::HYDROGEN), moh).unwrap();
        let h1 = topology.add_atom("H1", Some(Element::HYDROGEN), moh).unwrap();
        topology.add_bond(c, o).unwrap();
        topology.add_bond(o, ho).unwrap();
        topology.add_bond(c, h1).unwrap();
        let hoh = topology.add_residue("HOH", chain, None).unwrap();
        let ow = topology.add_atom("O", Some(Element::OXYGEN), hoh).unwrap();
        let hw1 = topology.add_atom("H1", Some(Element::HYDROGEN), hoh).unwrap();
        let hw2 = topology.add_atom("H2", Some(Element::HYDROGEN), hoh).unwrap();
        topology.add_bond(ow, hw1).unwrap();
        topology.add_bond(ow, hw2).unwrap();
        Fixture { topology, library }
    }

    fn matches(f: &Fixture) -> Vec<TemplateMatch<'_>> {
        let mut moh = Template::new("MOH");
        for (name, ty) in [("C", "CT"), ("O", "OH"), ("HO", "HO"), ("H1", "HC")] {
            moh.add_atom(TemplateAtom::new(name, ty));
        }
        let mut hoh = Template::new("HOH");
        for (name, ty) in [("O", "OH"), ("H1", "HO"), ("H2", "HO")] {
            hoh.add_atom(TemplateAtom::new(name, ty));
        }
        vec![
            TemplateMatch {
                residue: 0,
                template: Cow::Owned(moh),
                atom_map: (0..4).map(Some).collect(),
            },
            TemplateMatch {
                residue: 1,
                template: Cow::Owned(hoh),
                atom_map: (0..3).map(Some).collect(),
            },
        ]
    }

    fn build<'a>(f: &'a Fixture, options: &CreateSystemOptions) -> AssemblyData<'a> {
        AssemblyData::new(&f.topology, &f.library, matches(f), options).unwrap()
    }

    #[test]
    fn bonded_terms_are_derived_from_connectivity() {
        let f = fixture();
        let data = build(&f, &CreateSystemOptions::default());
        assert_eq!(data.bonds.len(), 5);
        // C: O-C-H1; O: C-O-HO; water: H1-O-H2
        assert_eq!(data.angles.len(), 3);
        assert_eq!(data.propers, vec![[3, 0, 1, 2]]);
        assert!(data.impropers.is_empty());
        assert_eq!(data.atom_type(2).name, "HO");
        assert_eq!(data.template_atom(5).name, "H1");
    }

    #[test]
    fn hbonds_constrain_bonds_to_hydrogen_and_water_stays_rigid() {
        let f = fixture();
        let data = build(
            &f,
            &CreateSystemOptions::default().constraints(Constraints::HBonds),
        );
        let constrained: Vec<bool> = (0..5).map(|b| data.bond_is_constrained(b)).collect();
        assert_eq!(constrained, vec![false, true, true, true, true]);
        let water_angle = data.angles.iter().position(|a| a[1] == 4).unwrap();
        assert!(data.angle_is_constrained(water_angle));
    }

    #[test]
    fn rigid_water_false_forbids_water_constraints() {
        let f = fixture();
        let data = build(
            &f,
            &CreateSystemOptions::default()
                .constraints(Constraints::HAngles)
                .rigid_water(false),
        );
        assert!(!data.bond_is_constrained(3));
        assert!(!data.bond_is_constrained(4));
        assert!(data.bond_is_constrained(0));
        let constrained_angles: Vec<[usize; 3]> = data
            .angles
            .iter()
            .enumerate()
            .filter(|(i, _)| data.angle_is_constrained(*i))
            .map(|(_, a)| *a)
            .collect();
        // C-O-HO has one hydrogen on an oxygen center; O-C-H1 does not qualify.
        assert_eq!(constrained_angles, vec![[0, 1, 2]]);
    }

    #[test]
    fn separations_cover_one_to_four_pairs() {
        let f = fixture();
        let data = build(&f, &CreateSystemOptions::default());
        let seps = data.bonded_separations(3);
        assert_eq!(seps.get(&(0, 1)), Some(&1));
        assert_eq!(seps.get(&(1, 3)), Some(&2));
        assert_eq!(seps.get(&(2, 3)), Some(&3));
        assert_eq!(seps.get(&(5, 6)), Some(&2));
        assert!(!seps.contains_key(&(0, 4)));
        assert!(data.bonded_separations(0).is_empty());
    }
}
