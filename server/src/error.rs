use shared::{CodecError, SchemaLoadError};

/// Errors surfaced by the server library
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("No entity with net id {0}")]
    NotFound(u32),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Schema(#[from] SchemaLoadError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
