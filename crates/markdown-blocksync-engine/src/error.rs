use thiserror::Error;

/// Failures while turning host input into a `DocTree`.
///
/// The sync path itself never fails; these only occur at the loading edge.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("Invalid document JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Expected a `doc` root node, found `{0}`")]
    UnexpectedRoot(String),

    /// Logged per node by the JSON loader, which skips the heading.
    #[error("Heading level must be between 1 and 6, got {0}")]
    InvalidHeadingLevel(i64),
}
