use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuarryError {
    #[error(transparent)]
    Storage(#[from] strata::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("schema file: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}
