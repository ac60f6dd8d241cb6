use gridfloat::{GridFloatError, TileCode};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TerrainError {
    #[error("missing required parameters")]
    Builder,

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("no tile files in {0}")]
    Path(PathBuf),

    #[error("{0}")]
    GridFloat(#[from] GridFloatError),

    #[error("tile {0} could not be made available locally")]
    TileUnavailable(TileCode),

    #[error("tile {0} is not in this pass's cache")]
    TileNotFound(TileCode),

    #[error("no valid elevation at center {lat}, {lon}")]
    NoCenterElevation { lat: f64, lon: f64 },
}
