use super::config::ConfigError;
use crate::core::error::LoadError;
use thiserror::Error;

/// Errors raised while assembling a force model. No partial model is ever
/// returned alongside one of these.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("No template found for residue {number} ({name}).  {detail}", number = .residue + 1)]
    NoTemplate {
        residue: usize,
        name: String,
        detail: String,
    },

    #[error(
        "Multiple non-identical matching templates found for residue {number} ({name}): {}.",
        .candidates.join(", "),
        number = .residue + 1
    )]
    AmbiguousTemplate {
        residue: usize,
        name: String,
        candidates: Vec<String>,
    },

    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n"))]
    Unmatched(Vec<AssemblyError>),

    #[error("The argument '{name}' was specified to createSystem() but was never used.")]
    UnrecognizedOption { name: String },

    #[error("Invalid option: {source}")]
    InvalidOption {
        #[from]
        source: ConfigError,
    },

    #[error("Unsupported combination: {0}")]
    UnsupportedCombination(String),

    #[error("No {term} parameters for atom {atom} ({atom_name}) of type '{atom_type}' in residue {residue_name}")]
    MissingParameter {
        term: &'static str,
        atom: usize,
        atom_name: String,
        atom_type: String,
        residue_name: String,
    },

    #[error("Illegal nonbonded method {method} for {force}: {reason}")]
    IllegalNonbondedMethod {
        force: &'static str,
        method: String,
        reason: String,
    },

    #[error("{generator} failed: {reason}")]
    Generator {
        generator: &'static str,
        reason: String,
    },

    #[error("Template generator produced an invalid template: {source}")]
    GeneratedTemplate {
        #[from]
        source: LoadError,
    },
}

impl AssemblyError {
    /// Per-residue matching failures contained in this error, in residue order.
    pub fn residue_failures(&self) -> Vec<&AssemblyError> {
        match self {
            AssemblyError::Unmatched(list) => list.iter().collect(),
            AssemblyError::NoTemplate { .. } | AssemblyError::AmbiguousTemplate { .. } => {
                vec![self]
            }
            _ => Vec::new(),
        }
    }

    pub(crate) fn generator(generator: &'static str, reason: impl Into<String>) -> Self {
        AssemblyError::Generator {
            generator,
            reason: reason.into(),
        }
    }
}
