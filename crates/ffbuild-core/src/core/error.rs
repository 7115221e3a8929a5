use thiserror::Error;

/// Errors raised while reading definition sources or registering definitions.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("XML parsing error in '{origin}': {source}")]
    Xml {
        origin: String,
        source: quick_xml::Error,
    },
    #[error("Malformed definition source '{origin}': {reason}")]
    Malformed { origin: String, reason: String },
    #[error("Element <{element}> is missing required attribute '{attribute}'")]
    MissingAttribute { element: String, attribute: String },
    #[error("Invalid value '{value}' for attribute '{attribute}' of <{element}>: {reason}")]
    InvalidValue {
        element: String,
        attribute: String,
        value: String,
        reason: String,
    },
    #[error("Conflicting definitions for {kind} '{name}': {reason}")]
    Conflict {
        kind: &'static str,
        name: String,
        reason: String,
    },
    #[error("{context} references undefined atom type '{name}'")]
    UnknownType { name: String, context: String },
    #[error("Initialization script requests unknown initializer '{name}'")]
    UnknownInitializer { name: String },
    #[error("Initializer '{name}' failed: {reason}")]
    Initializer { name: String, reason: String },
    #[error("Unsupported combination of definition sources: {0}")]
    UnsupportedCombination(String),
    #[error("Could not resolve include '{file}' referenced from '{origin}'")]
    Include { file: String, origin: String },
}

impl LoadError {
    pub(crate) fn invalid_value(
        element: &str,
        attribute: &str,
        value: &str,
        reason: impl Into<String>,
    ) -> Self {
        LoadError::InvalidValue {
            element: element.to_string(),
            attribute: attribute.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn conflict(kind: &'static str, name: &str, reason: impl Into<String>) -> Self {
        LoadError::Conflict {
            kind,
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
