// core/error.rs
// Error taxonomy for indexing and extraction

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("empty file")]
    EmptyFile,

    #[error("empty header")]
    EmptyHeader,

    #[error("failed to parse header")]
    HeaderMalformed,

    #[error("unrecognized time format: {0:?}")]
    UnrecognizedTime(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
