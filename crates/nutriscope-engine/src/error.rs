use thiserror::Error;

/// Everything that can turn an analysis into a `Failure`.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("{0}")]
    Configuration(String),

    /// Any error raised while talking to the remote model, rendered with its
    /// full cause chain.
    #[error("{0:#}")]
    Transport(anyhow::Error),
}

impl AnalysisError {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::InvalidImage(_) => "invalid_image",
            AnalysisError::Configuration(_) => "configuration",
            AnalysisError::Transport(_) => "transport",
        }
    }
}
