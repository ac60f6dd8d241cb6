//! The tile-acquisition seam.

use crate::TerrainError;
use gridfloat::TileCode;
use std::path::{Path, PathBuf};

/// Source of locally readable tile files.
///
/// `ensure` succeeding means both the header and data files for the
/// code exist at the paths `paths` reports and are non-empty. How
/// they get there (pre-seeded directory, download, unzip) is the
/// implementor's business.
pub trait TileStore: Send + Sync {
    fn ensure(&self, code: TileCode) -> Result<(), TerrainError>;

    /// (header, data) paths for `code`.
    fn paths(&self, code: TileCode) -> (PathBuf, PathBuf);
}

/// A directory of already-present tile files.
pub struct LocalStore {
    tile_dir: PathBuf,
}

impl LocalStore {
    pub fn new(tile_dir: PathBuf) -> Result<Self, TerrainError> {
        // Fail early by checking that tile_dir has at least one
        // `flt` file.
        let mut has_tile_files = false;
        for entry in std::fs::read_dir(&tile_dir)? {
            let path = entry?.path();
            if Some("flt") == path.extension().and_then(std::ffi::OsStr::to_str) {
                has_tile_files = true;
                break;
            }
        }

        if has_tile_files {
            Ok(Self { tile_dir })
        } else {
            Err(TerrainError::Path(tile_dir))
        }
    }
}

impl TileStore for LocalStore {
    fn ensure(&self, code: TileCode) -> Result<(), TerrainError> {
        fn non_empty(path: &Path) -> bool {
            std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
        }

        let (header_path, data_path) = self.paths(code);
        if non_empty(&header_path) && non_empty(&data_path) {
            Ok(())
        } else {
            Err(TerrainError::TileUnavailable(code))
        }
    }

    fn paths(&self, code: TileCode) -> (PathBuf, PathBuf) {
        (
            self.tile_dir.join(code.header_file_name()),
            self.tile_dir.join(code.data_file_name()),
        )
    }
}
