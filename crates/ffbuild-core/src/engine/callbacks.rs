//! Caller-supplied extension points consulted while loading definitions and
//! matching residues.
//!
//! Every callback is `Send + Sync` so a `ForceField` holding them can be
//! shared across threads. Each trait is implemented for plain closures with
//! the matching signature.

use super::matcher::{MatchSettings, ResidueGraph};
use crate::core::forcefield::library::TemplateLibrary;
use crate::core::forcefield::template::Template;
use std::collections::BTreeMap;

/// Picks a template for a residue before signature matching runs.
///
/// Returning `None` defers to the next matcher and then to signature
/// matching. A returned name must exist and must match the residue.
pub trait TemplateMatcher: Send + Sync {
    fn select(
        &self,
        library: &TemplateLibrary,
        residue: &ResidueGraph<'_>,
        settings: MatchSettings,
    ) -> Option<String>;
}

impl<F> TemplateMatcher for F
where
    F: Fn(&TemplateLibrary, &ResidueGraph<'_>, MatchSettings) -> Option<String> + Send + Sync,
{
    fn select(
        &self,
        library: &TemplateLibrary,
        residue: &ResidueGraph<'_>,
        settings: MatchSettings,
    ) -> Option<String> {
        self(library, residue, settings)
    }
}

/// Produces a template for a residue nothing else could match.
///
/// Generated templates are used for the current call only. Their atom types
/// must already be registered in the library.
pub trait TemplateGenerator: Send + Sync {
    fn generate(&self, library: &TemplateLibrary, residue: &ResidueGraph<'_>) -> Option<Template>;
}

impl<F> TemplateGenerator for F
where
    F: Fn(&TemplateLibrary, &ResidueGraph<'_>) -> Option<Template> + Send + Sync,
{
    fn generate(&self, library: &TemplateLibrary, residue: &ResidueGraph<'_>) -> Option<Template> {
        self(library, residue)
    }
}

/// A named hook run for each `<InitializationScript name="...">` element.
///
/// The hook receives the element's text body and may only touch the force
/// field's [`ScriptNamespace`]. An `Err` aborts loading.
pub trait Initializer: Send + Sync {
    fn run(&self, namespace: &mut ScriptNamespace, body: &str) -> Result<(), String>;
}

impl<F> Initializer for F
where
    F: Fn(&mut ScriptNamespace, &str) -> Result<(), String> + Send + Sync,
{
    fn run(&self, namespace: &mut ScriptNamespace, body: &str) -> Result<(), String> {
        self(namespace, body)
    }
}

/// String key/value store shared by initializer hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptNamespace {
    values: BTreeMap<String, String>,
}

impl ScriptNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Stores `value` under `key`, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
