use super::template::{Template, TemplateAtom};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum PatchOperation {
    AddAtom(TemplateAtom),
    /// Replaces the type and attributes of the atom with the same name.
    ChangeAtom(TemplateAtom),
    RemoveAtom(String),
    AddBond(String, String),
    RemoveBond(String, String),
    AddExternalBond(String),
    RemoveExternalBond(String),
}

/// A named single-residue modification of a template.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Patch {
    pub name: String,
    pub operations: Vec<PatchOperation>,
    /// Templates the patch declares itself applicable to, besides those that
    /// allow it explicitly.
    pub apply_to: Vec<String>,
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("Patch '{patch}' cannot be applied to template '{template}': {reason}")]
pub struct PatchError {
    pub patch: String,
    pub template: String,
    pub reason: String,
}

impl Patch {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn can_apply_to(&self, template: &Template) -> bool {
        template.allowed_patches.iter().any(|p| *p == self.name)
            || self.apply_to.iter().any(|t| *t == template.name)
    }

    /// Produces the patched template, named `{template}-{patch}`.
    ///
    /// Added and changed atoms have no element yet; the library resolves
    /// them from the atom types.
    pub fn apply(&self, template: &Template) -> Result<Template, PatchError> {
        let fail = |reason: String| PatchError {
            patch: self.name.clone(),
            template: template.name.clone(),
            reason,
        };

        let mut patched = template.clone();
        patched.name = format!("{}-{}", template.name, self.name);
        patched.override_level = 0;
        patched.allowed_patches.clear();

        for op in &self.operations {
            match op {
                PatchOperation::AddAtom(atom) => {
                    if patched.atom_index(&atom.name).is_some() {
                        return Err(fail(format!("atom '{}' already exists", atom.name)));
                    }
                    patched.add_atom(atom.clone());
                }
                PatchOperation::ChangeAtom(atom) => {
                    let index = patched
                        .atom_index(&atom.name)
                        .ok_or_else(|| fail(format!("no atom named '{}'", atom.name)))?;
                    let target = &mut patched.atoms[index];
                    target.atom_type = atom.atom_type.clone();
                    target.attributes = atom.attributes.clone();
                    target.element = None;
                }
                PatchOperation::RemoveAtom(name) => {
                    let index = patched
                        .atom_index(name)
                        .ok_or_else(|| fail(format!("no atom named '{name}'")))?;
                    remove_atom(&mut patched, index).map_err(fail)?;
                }
                PatchOperation::AddBond(a, b) => {
                    if !patched.add_bond_by_name(a, b) {
                        return Err(fail(format!("cannot add bond {a}-{b}")));
                    }
                }
                PatchOperation::RemoveBond(a, b) => {
                    let (i, j) = patched
                        .atom_index(a)
                        .zip(patched.atom_index(b))
                        .ok_or_else(|| fail(format!("no bond {a}-{b}")))?;
                    let before = patched.bonds.len();
                    patched
                        .bonds
                        .retain(|&(x, y)| !((x == i && y == j) || (x == j && y == i)));
                    if patched.bonds.len() == before {
                        return Err(fail(format!("no bond {a}-{b}")));
                    }
                }
                PatchOperation::AddExternalBond(name) => {
                    let index = patched
                        .atom_index(name)
                        .ok_or_else(|| fail(format!("no atom named '{name}'")))?;
                    patched.add_external_bond(index);
                }
                PatchOperation::RemoveExternalBond(name) => {
                    let atom = patched
                        .atom_index(name)
                        .map(|i| &mut patched.atoms[i])
                        .filter(|a| a.external_bonds > 0)
                        .ok_or_else(|| fail(format!("atom '{name}' has no external bond")))?;
                    atom.external_bonds -= 1;
                }
            }
        }
        Ok(patched)
    }
}

fn remove_atom(template: &mut Template, index: usize) -> Result<(), String> {
    if template
        .virtual_sites
        .iter()
        .any(|vs| vs.site == index || vs.parents.contains(&index) || vs.exclude_with == index)
    {
        return Err(format!(
            "atom '{}' is referenced by a virtual site",
            template.atoms[index].name
        ));
    }
    template.atoms.remove(index);
    let shift = |i: usize| if i > index { i - 1 } else { i };
    template.bonds = template
        .bonds
        .iter()
        .filter(|&&(a, b)| a != index && b != index)
        .map(|&(a, b)| (shift(a), shift(b)))
        .collect();
    for site in &mut template.virtual_sites {
        site.site = shift(site.site);
        site.exclude_with = shift(site.exclude_with);
        for parent in &mut site.parents {
            *parent = shift(*parent);
        }
    }
    Ok(())
}
