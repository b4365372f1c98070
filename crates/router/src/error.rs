use thiserror::Error;

/// Registration-time failure.
///
/// Route and forward tables are built once during setup; anything wrong
/// with them is reported immediately instead of surfacing during request
/// serving.
#[derive(Debug, Error)]
pub enum RouterSetupError {
    #[error("a plug is overwriting an existing endpoint: {name}")]
    DuplicateEndpoint { name: String },

    #[error("cannot forward same prefix to different delegates: {prefix}")]
    DuplicateForward { prefix: String },

    #[error("invalid rule {pattern:?}: {reason}")]
    InvalidRule { pattern: String, reason: String },
}

impl RouterSetupError {
    pub fn invalid_rule<S: ToString>(pattern: &str, reason: S) -> Self {
        Self::InvalidRule { pattern: pattern.to_owned(), reason: reason.to_string() }
    }
}
