//! Per-pass tile discovery and the tile cache.

use crate::{store::TileStore, TerrainError};
use dashmap::{DashMap, DashSet};
use geo::geometry::Coord;
use gridfloat::{geodesy, Tile, TileCode};
use log::debug;
use rayon::prelude::*;
use std::sync::Arc;

/// How to hold a tile's samples.
///
/// The trade off between loading tile data into memory versus
/// seeking the backing file per lookup is not obvious, and you should
/// measure both before deciding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileMode {
    /// Parse the data file and hold the whole grid in memory.
    ///
    /// Note that this can consume gigabytes of RAM when loading many
    /// tiles.
    Resident,

    /// Keep an open handle and seek per lookup.
    OnDemand,
}

/// Tiles for one computation pass, keyed by tile code.
///
/// Built once at pass start and read-only afterwards; dropped with
/// the pass.
pub struct TileCache {
    tiles: DashMap<TileCode, Arc<Tile>>,
}

impl TileCache {
    /// Acquires and constructs every tile in `codes`, in parallel.
    ///
    /// Any acquisition or construction failure is fatal for the pass;
    /// tolerated misses are handled at `lookup` time instead.
    pub fn build<S>(
        codes: &DashSet<TileCode>,
        store: &S,
        mode: TileMode,
    ) -> Result<Self, TerrainError>
    where
        S: TileStore + ?Sized,
    {
        let codes: Vec<TileCode> = codes.iter().map(|code| *code).collect();
        let loaded = codes
            .into_par_iter()
            .map(|code| {
                store.ensure(code)?;
                let (header_path, data_path) = store.paths(code);
                debug!("loading tile {code} from {header_path:?}");
                let tile = match mode {
                    TileMode::Resident => Tile::load(header_path, data_path)?,
                    TileMode::OnDemand => Tile::open(header_path, data_path)?,
                };
                Ok((code, Arc::new(tile)))
            })
            .collect::<Result<Vec<_>, TerrainError>>()?;

        let tiles = DashMap::with_capacity(loaded.len());
        for (code, tile) in loaded {
            tiles.insert(code, tile);
        }
        Ok(Self { tiles })
    }

    /// Returns the tile containing `coord`.
    ///
    /// A miss is recoverable by design: the pre-scan that chose this
    /// cache's codes is a sampling approximation and may have skipped
    /// a tile that a later lookup lands in.
    pub fn lookup(&self, coord: Coord<f64>) -> Result<Arc<Tile>, TerrainError> {
        let code = TileCode::for_coord(coord);
        self.tiles
            .get(&code)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(TerrainError::TileNotFound(code))
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Pre-scan: the set of tile codes a grid pass will touch.
///
/// For each cell, the destination point's code; with `include_los`,
/// also intermediate points along the bearing to each cell. The scan
/// is a sampling approximation: a missed tile surfaces later as a
/// recoverable lookup failure, never an abort.
pub fn required_tiles(
    center: Coord<f64>,
    radius_m: f64,
    n_cells: i32,
    include_los: bool,
) -> DashSet<TileCode> {
    let codes = DashSet::new();
    codes.insert(TileCode::for_coord(center));

    let dpc = distance_per_cell(radius_m, n_cells);
    (-n_cells..=n_cells).into_par_iter().for_each(|dy| {
        for dx in -n_cells..=n_cells {
            let bearing = geodesy::bearing_for_offset(dx, dy);
            let distance = dpc * f64::from(dx * dx + dy * dy).sqrt();
            let target = geodesy::destination(center, bearing, distance);
            codes.insert(TileCode::for_coord(target));

            if include_los && (dx != 0 || dy != 0) {
                for pct in los_steps(distance) {
                    let sample =
                        geodesy::destination(center, bearing, distance * f64::from(pct) / 100.0);
                    codes.insert(TileCode::for_coord(sample));
                }
            }
        }
    });
    codes
}

/// Codes for the horizon sweep: 360 integer bearings, 100 samples
/// each, out to `limit_m`. Computed once per pass, not per cell.
pub fn horizon_tiles(center: Coord<f64>, limit_m: f64) -> DashSet<TileCode> {
    let codes = DashSet::new();
    for bearing in 0..360 {
        for pct in 1..=100 {
            let sample =
                geodesy::destination(center, f64::from(bearing), limit_m * f64::from(pct) / 100.0);
            codes.insert(TileCode::for_coord(sample));
        }
    }
    codes
}

pub(crate) fn distance_per_cell(radius_m: f64, n_cells: i32) -> f64 {
    if n_cells == 0 {
        0.0
    } else {
        radius_m / f64::from(n_cells)
    }
}

/// Intermediate sample percentages for one line-of-sight march, 95%
/// down to 5%. The ends are skipped to avoid rounding problems at
/// tile boundaries. Within 250 m the step grows to roughly a quarter
/// of the span; 1% of a short path repeatedly lands in the same cell.
pub(crate) fn los_steps(distance_m: f64) -> impl Iterator<Item = i32> {
    #[allow(clippy::cast_possible_truncation)]
    let step = if distance_m < 250.0 {
        ((distance_m / 4.0) as i32).max(1)
    } else {
        1
    };
    (0..).map(move |i| 95 - i * step).take_while(|&pct| pct >= 5)
}
