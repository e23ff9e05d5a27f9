//! Classified errors for the core pipeline.
//!
//! Only infrastructure-level failures are represented here. Advisory
//! conditions a model can recover from (missing file, bad pattern, empty
//! match set) are returned as plain tool output instead, so the agent
//! loop never aborts on them.

use thiserror::Error;

/// Core error with a stable wire tag and an optional actionable hint.
#[derive(Debug, Error)]
pub enum QuarryError {
    /// A virtual filesystem entry does not exist.
    #[error("no such path: {path}")]
    NotFound { path: String },

    /// The path exists but is not a directory.
    #[error("not a directory: {path}")]
    NotADirectory { path: String },

    /// A file operation was attempted on a directory.
    #[error("is a directory: {path}")]
    IsADirectory { path: String },

    /// A requested path resolved outside its sandbox root.
    #[error("path escapes the sandbox root: {path}")]
    PathEscape { path: String },

    /// The resource loader could not resolve a name.
    #[error("resource not found: {name}")]
    ResourceNotFound { name: String, hint: String },

    /// A collection load failed part-way through assembly.
    #[error("failed to load collection: {message}")]
    CollectionLoad {
        message: String,
        hint: Option<String>,
        #[source]
        source: Option<Box<QuarryError>>,
    },

    /// Configuration is missing or malformed.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The model provider failed or returned a malformed stream.
    #[error("provider error: {message}")]
    Provider { message: String },

    /// The agent loop reached an unrecoverable state.
    #[error("agent error: {message}")]
    Agent { message: String },

    /// An underlying filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuarryError {
    /// Stable tag used in wire `error` events and logs.
    pub fn tag(&self) -> &'static str {
        match self {
            QuarryError::NotFound { .. } => "not-found",
            QuarryError::NotADirectory { .. } => "not-a-directory",
            QuarryError::IsADirectory { .. } => "is-a-directory",
            QuarryError::PathEscape { .. } => "path-escape",
            QuarryError::ResourceNotFound { .. } => "resource-not-found",
            QuarryError::CollectionLoad { .. } => "collection-load",
            QuarryError::Config { .. } => "config",
            QuarryError::Provider { .. } => "provider",
            QuarryError::Agent { .. } => "agent",
            QuarryError::Io(_) => "io",
        }
    }

    /// Actionable hint for the user, when one exists.
    pub fn hint(&self) -> Option<String> {
        match self {
            QuarryError::ResourceNotFound { hint, .. } => Some(hint.clone()),
            QuarryError::CollectionLoad { hint, .. } => hint.clone(),
            QuarryError::Config { .. } => {
                Some("Check your resources.json (or the QUARRY_CONFIG path).".to_string())
            }
            QuarryError::Provider { .. } => Some(
                "Verify QUARRY_BASE_URL and QUARRY_API_KEY, and that the model id is valid."
                    .to_string(),
            ),
            _ => None,
        }
    }

    /// Shorthand for a provider failure.
    pub fn provider(message: impl Into<String>) -> Self {
        QuarryError::Provider {
            message: message.into(),
        }
    }

    /// Shorthand for an agent-loop failure.
    pub fn agent(message: impl Into<String>) -> Self {
        QuarryError::Agent {
            message: message.into(),
        }
    }
}

pub type Result<T, E = QuarryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_stable() {
        let err = QuarryError::NotFound {
            path: "/x".to_string(),
        };
        assert_eq!(err.tag(), "not-found");

        let err = QuarryError::CollectionLoad {
            message: "boom".to_string(),
            hint: Some("try again".to_string()),
            source: None,
        };
        assert_eq!(err.tag(), "collection-load");
        assert_eq!(err.hint().as_deref(), Some("try again"));
    }

    #[test]
    fn test_collection_load_preserves_source() {
        let inner = QuarryError::NotFound {
            path: "/missing".to_string(),
        };
        let err = QuarryError::CollectionLoad {
            message: "while importing".to_string(),
            hint: None,
            source: Some(Box::new(inner)),
        };
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("/missing"));
    }
}
