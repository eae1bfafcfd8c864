use std::path::PathBuf;

/// Configuration problems detected before any model is loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cross_attention_dim must be 768 or 384, got {0}")]
    UnsupportedCrossAttentionDim(u32),

    #[error("{what} not found at {}", path.display())]
    MissingFile { what: &'static str, path: PathBuf },

    #[error("seed must be -1 (random) or a non-negative integer, got {0}")]
    InvalidSeed(i64),

    #[error("scheduler config declares `{0}`, expected `DDIMScheduler`")]
    UnexpectedScheduler(String),

    #[error("inference command is empty")]
    EmptyCommand,

    #[error("unknown placeholder `{{{0}}}` in inference command")]
    UnknownPlaceholder(String),

    #[error("unterminated placeholder in inference command argument `{0}`")]
    UnterminatedPlaceholder(String),
}
