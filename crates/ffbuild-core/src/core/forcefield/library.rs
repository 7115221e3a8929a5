use super::atom_type::AtomType;
use super::patch::Patch;
use super::signature::Signature;
use super::template::Template;
use crate::core::error::LoadError;
use std::collections::HashMap;
use tracing::{debug, info};

/// Registry of atom types, residue templates and patches.
///
/// Templates are kept in registration order and indexed by element
/// signature, so candidate lookup for a residue only visits templates with
/// the same element multiset.
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    atom_types: HashMap<String, AtomType>,
    templates: Vec<Template>,
    template_index: HashMap<String, usize>,
    signature_index: HashMap<Signature, Vec<usize>>,
    reduced_signature_index: HashMap<Signature, Vec<usize>>,
    patches: Vec<Patch>,
    patch_index: HashMap<String, usize>,
}

impl TemplateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an atom type.
    ///
    /// Registering a name twice is accepted only if both definitions agree
    /// on class, element and mass.
    pub fn register_atom_type(&mut self, atom_type: AtomType) -> Result<(), LoadError> {
        if let Some(existing) = self.atom_types.get(&atom_type.name) {
            return match existing.conflict_with(&atom_type) {
                None => Ok(()),
                Some(reason) => Err(LoadError::conflict("atom type", &atom_type.name, reason)),
            };
        }
        self.atom_types.insert(atom_type.name.clone(), atom_type);
        Ok(())
    }

    pub fn atom_type(&self, name: &str) -> Option<&AtomType> {
        self.atom_types.get(name)
    }

    pub fn atom_types(&self) -> impl Iterator<Item = &AtomType> {
        self.atom_types.values()
    }

    /// Fills in each template atom's element from its atom type.
    pub fn resolve_elements(&self, template: &mut Template) -> Result<(), LoadError> {
        for atom in &mut template.atoms {
            let atom_type =
                self.atom_types
                    .get(&atom.atom_type)
                    .ok_or_else(|| LoadError::UnknownType {
                        name: atom.atom_type.clone(),
                        context: format!("Atom '{}' of template '{}'", atom.name, template.name),
                    })?;
            atom.element = atom_type.element;
        }
        Ok(())
    }

    /// Registers a residue template.
    ///
    /// A template whose name is already taken replaces the existing one only
    /// if its override level is positive and at least the existing level.
    /// Re-registering an identical template is a no-op.
    pub fn register_residue_template(&mut self, mut template: Template) -> Result<(), LoadError> {
        self.resolve_elements(&mut template)?;
        validate_template(&template)?;

        match self.template_index.get(&template.name) {
            Some(&index) => {
                let existing = &self.templates[index];
                if *existing == template {
                    return Ok(());
                }
                if template.override_level == 0
                    || template.override_level < existing.override_level
                {
                    return Err(LoadError::conflict(
                        "residue template",
                        &template.name,
                        format!(
                            "a template with this name is already registered (override level {}, new level {})",
                            existing.override_level, template.override_level
                        ),
                    ));
                }
                info!(
                    "Template '{}' replaced (override level {} -> {}).",
                    template.name, existing.override_level, template.override_level
                );
                self.templates[index] = template;
                self.rebuild_signature_index();
            }
            None => {
                let index = self.templates.len();
                self.index_template(index, &template);
                self.template_index.insert(template.name.clone(), index);
                self.templates.push(template);
            }
        }
        Ok(())
    }

    fn index_template(&mut self, index: usize, template: &Template) {
        let signature = template.signature();
        self.reduced_signature_index
            .entry(signature.without_extra_particles())
            .or_default()
            .push(index);
        self.signature_index.entry(signature).or_default().push(index);
    }

    fn rebuild_signature_index(&mut self) {
        self.signature_index.clear();
        self.reduced_signature_index.clear();
        let templates = std::mem::take(&mut self.templates);
        for (index, template) in templates.iter().enumerate() {
            self.index_template(index, template);
        }
        self.templates = templates;
    }

    pub fn template(&self, name: &str) -> Option<&Template> {
        self.template_index.get(name).map(|&i| &self.templates[i])
    }

    /// All templates, in registration order.
    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Templates whose signature equals `signature`, in registration order.
    ///
    /// With `ignore_extra_particles`, extra particles are dropped from the
    /// template signatures before comparison; `signature` must already be free
    /// of them.
    pub fn candidates<'a>(
        &'a self,
        signature: &Signature,
        ignore_extra_particles: bool,
    ) -> impl Iterator<Item = &'a Template> + 'a {
        let index = if ignore_extra_particles {
            &self.reduced_signature_index
        } else {
            &self.signature_index
        };
        index
            .get(signature)
            .into_iter()
            .flatten()
            .map(move |&i| &self.templates[i])
    }

    pub fn register_patch(&mut self, patch: Patch) -> Result<(), LoadError> {
        if let Some(&index) = self.patch_index.get(&patch.name) {
            if self.patches[index] == patch {
                return Ok(());
            }
            return Err(LoadError::conflict(
                "patch",
                &patch.name,
                "a different patch with this name is already registered",
            ));
        }
        self.patch_index.insert(patch.name.clone(), self.patches.len());
        self.patches.push(patch);
        Ok(())
    }

    pub fn patch(&self, name: &str) -> Option<&Patch> {
        self.patch_index.get(name).map(|&i| &self.patches[i])
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// Every template obtainable by applying one applicable patch to a
    /// registered template. Patches that fail to apply are skipped.
    pub fn patched_templates(&self) -> Vec<Template> {
        let mut variants = Vec::new();
        for template in &self.templates {
            for patch in self.patches.iter().filter(|p| p.can_apply_to(template)) {
                let patched = patch.apply(template).map_err(|e| e.to_string()).and_then(
                    |mut t| {
                        self.resolve_elements(&mut t).map_err(|e| e.to_string())?;
                        Ok(t)
                    },
                );
                match patched {
                    Ok(t) => variants.push(t),
                    Err(reason) => debug!("Skipping patched template: {reason}"),
                }
            }
        }
        variants
    }
}

fn validate_template(template: &Template) -> Result<(), LoadError> {
    let n = template.atoms.len();
    for site in &template.virtual_sites {
        let in_range = site.site < n
            && site.exclude_with < n
            && site.parents.iter().all(|&p| p < n);
        if !in_range || site.parents.len() != site.kind.num_parents() {
            return Err(LoadError::invalid_value(
                "VirtualSite",
                "atoms",
                &template.name,
                "virtual site references atoms outside the template",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::patch::PatchOperation;
    use crate::core::forcefield::template::TemplateAtom;
    use crate::core::models::element::Element;

    fn library_with_water_types() -> TemplateLibrary {
        let mut lib = TemplateLibrary::new();
        lib.register_atom_type(AtomType::new("OW", "OW", Some(Element::OXYGEN), 15.99943))
            .unwrap();
        lib.register_atom_type(AtomType::new("HW", "HW", Some(Element::HYDROGEN), 1.007947))
            .unwrap();
        lib
    }

    fn water(name: &str, charge: f64) -> Template {
        let mut t = Template::new(name);
        t.add_atom(TemplateAtom::new("O", "OW").with_attribute("charge", charge));
        t.add_atom(TemplateAtom::new("H1", "HW"));
        t.add_atom(TemplateAtom::new("H2", "HW"));
        t.add_bond(0, 1);
        t.add_bond(0, 2);
        t
    }

    #[test]
    fn identical_atom_type_registration_is_a_no_op() {
        let mut lib = library_with_water_types();
        lib.register_atom_type(AtomType::new("OW", "OW", Some(Element::OXYGEN), 15.99943))
            .unwrap();
        assert_eq!(lib.atom_types().count(), 2);
    }

    #[test]
    fn conflicting_atom_type_registration_fails() {
        let mut lib = library_with_water_types();
        let err = lib
            .register_atom_type(AtomType::new("OW", "OW", Some(Element::OXYGEN), 16.0))
            .unwrap_err();
        assert!(matches!(err, LoadError::Conflict { kind: "atom type", .. }));
    }

    #[test]
    fn template_with_unknown_type_is_rejected() {
        let mut lib = library_with_water_types();
        let mut t = water("HOH", -0.834);
        t.atoms[1].atom_type = "HX".into();
        assert!(matches!(
            lib.register_residue_template(t),
            Err(LoadError::UnknownType { .. })
        ));
    }

    #[test]
    fn registration_resolves_elements_and_indexes_signature() {
        let mut lib = library_with_water_types();
        lib.register_residue_template(water("HOH", -0.834)).unwrap();
        let t = lib.template("HOH").unwrap();
        assert_eq!(t.atoms[0].element, Some(Element::OXYGEN));
        let found: Vec<_> = lib
            .candidates(&t.signature(), false)
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(found, vec!["HOH".to_string()]);
    }

    #[test]
    fn duplicate_template_needs_override() {
        let mut lib = library_with_water_types();
        lib.register_residue_template(water("HOH", -0.834)).unwrap();
        lib.register_residue_template(water("HOH", -0.834)).unwrap();
        assert!(matches!(
            lib.register_residue_template(water("HOH", -0.8)),
            Err(LoadError::Conflict { .. })
        ));

        let mut replacement = water("HOH", -0.8);
        replacement.override_level = 1;
        lib.register_residue_template(replacement).unwrap();
        assert_eq!(lib.templates().len(), 1);
        assert_eq!(
            lib.template("HOH").unwrap().atoms[0].attributes["charge"],
            -0.8
        );

        let mut weaker = water("HOH", -0.7);
        weaker.override_level = 0;
        assert!(lib.register_residue_template(weaker).is_err());
        let mut lower = water("HOH", -0.7);
        lower.override_level = 1;
        lib.register_residue_template(lower).unwrap();
        assert_eq!(
            lib.template("HOH").unwrap().atoms[0].attributes["charge"],
            -0.7
        );
    }

    #[test]
    fn patched_templates_are_synthesized_with_elements() {
        let mut lib = library_with_water_types();
        let mut t = water("HOH", -0.834);
        t.allowed_patches.push("STRIP".into());
        lib.register_residue_template(t).unwrap();
        let mut patch = Patch::new("STRIP");
        patch.operations = vec![PatchOperation::RemoveAtom("H2".into())];
        lib.register_patch(patch.clone()).unwrap();
        lib.register_patch(patch).unwrap();

        let variants = lib.patched_templates();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].name, "HOH-STRIP");
        assert_eq!(variants[0].signature().hydrogens(), 1);
    }
}
