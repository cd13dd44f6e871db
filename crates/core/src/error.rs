use thiserror::Error;

use crate::domain::WriteMode;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Refusing to write empty content to {field}")]
    EmptyWrite { field: String },

    #[error("Field {field} only accepts {expected:?} writes")]
    WriteModeMismatch { field: String, expected: WriteMode },

    #[error("Unknown task status: {0}")]
    UnknownStatus(String),
}
