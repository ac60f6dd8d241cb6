use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridFloatError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("malformed header {path}: {reason}")]
    MalformedHeader { path: PathBuf, reason: String },

    #[error("float is not 4 bytes on this platform")]
    UnsupportedPlatform,

    #[error("truncated data file {path}, expected {expected} bytes")]
    TruncatedData { path: PathBuf, expected: u64 },

    #[error("insufficient valid samples near {lat}, {lon}")]
    InsufficientData { lat: f64, lon: f64 },
}
