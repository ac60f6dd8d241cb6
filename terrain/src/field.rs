//! Concurrent computation of the per-cell output fields.

use crate::{
    math::elevation_angle,
    store::TileStore,
    tiles::{self, TileCache, TileMode},
    TerrainError,
};
use geo::geometry::Coord;
use gridfloat::{geodesy, GridFloatError, NO_DATA, NO_DATA_THRESHOLD};
use log::debug;
use rayon::prelude::*;

/// Gradient is a central difference over this span on either side of
/// the cell, in meters.
const GRADIENT_DELTA_M: f64 = 10.0;

/// Line-of-sight state of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Unknown,
    Visible,
    NotVisible,
}

/// Dense square grid of per-cell values, side `2 * n_cells + 1`.
///
/// Cells are addressed by grid offset from the center point: `dx`
/// cells east and `dy` cells north, each in `[-n_cells, n_cells]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Field<T> {
    n_cells: i32,
    side: usize,
    cells: Vec<T>,
}

impl<T: Copy> Field<T> {
    /// Rows ordered south to north.
    fn from_rows(n_cells: i32, rows: Vec<Vec<T>>) -> Self {
        let side = rows.len();
        let mut cells = Vec::with_capacity(side * side);
        for row in rows {
            cells.extend(row);
        }
        Self {
            n_cells,
            side,
            cells,
        }
    }

    pub fn side(&self) -> usize {
        self.side
    }

    /// Value at grid offset (`dx`, `dy`) from the center.
    #[allow(clippy::cast_sign_loss)]
    pub fn get(&self, dx: i32, dy: i32) -> T {
        let row = (dy + self.n_cells) as usize;
        let col = (dx + self.n_cells) as usize;
        self.cells[row * self.side + col]
    }

    /// All cells, southern row first, west to east within a row.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.cells.iter()
    }
}

/// Scalar results of one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    /// Interpolated elevation at the center point, meters, without
    /// the antenna.
    pub center_height_m: f32,

    /// Height-field extremes relative to the antenna top (center
    /// elevation plus antenna height). Cells without data are
    /// excluded.
    pub min_height_m: f32,
    pub max_height_m: f32,

    /// Mean height of the antenna top above the terrain within the
    /// requested radius, or `None` if no cell in radius had valid
    /// data.
    pub mean_height_above_terrain_m: Option<f32>,

    /// Horizon extremes, degrees, when the horizon sweep ran.
    pub min_horizon_deg: Option<f32>,
    pub max_horizon_deg: Option<f32>,
}

/// All outputs of one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSet {
    /// Curvature-corrected elevation, meters. The center cell
    /// includes the antenna height.
    pub height: Field<f32>,

    /// Elevation angle from the antenna top to each cell, degrees.
    pub angle: Option<Field<f32>>,

    /// Slope of the corrected height along each cell's bearing.
    pub gradient: Option<Field<f32>>,

    /// Per-cell visibility from the antenna top.
    pub los: Option<Field<Visibility>>,

    /// Maximum elevation angle per integer bearing degree, out to the
    /// horizon distance limit.
    pub horizon: Option<Box<[f32; 360]>>,

    pub summary: Summary,
}

/// One field-computation pass: a center point, a radius, a grid size
/// and the set of requested outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldComputer {
    center: Coord<f64>,
    radius_m: f64,
    n_cells: i32,
    antenna_height_m: f32,
    elevation: bool,
    gradient: bool,
    los: bool,
    horizon_limit_m: Option<f64>,
}

pub struct FieldComputerBuilder {
    center: Option<Coord<f64>>,
    radius_m: Option<f64>,
    n_cells: Option<i32>,
    antenna_height_m: f32,
    elevation: bool,
    gradient: bool,
    los: bool,
    horizon_limit_m: Option<f64>,
}

impl FieldComputerBuilder {
    pub fn center(mut self, coord: Coord<f64>) -> Self {
        self.center = Some(coord);
        self
    }

    /// Radius of the plot, meters.
    pub fn radius(mut self, meters: f64) -> Self {
        self.radius_m = Some(meters);
        self
    }

    /// Cells on each side of the center; the grid is
    /// `(2n + 1) x (2n + 1)`.
    pub fn n_cells(mut self, n: i32) -> Self {
        self.n_cells = Some(n);
        self
    }

    /// Antenna (or eye) height above ground at the center, meters.
    pub fn antenna_height(mut self, meters: f32) -> Self {
        self.antenna_height_m = meters;
        self
    }

    /// Also compute the elevation-angle field.
    pub fn elevation(mut self, enable: bool) -> Self {
        self.elevation = enable;
        self
    }

    /// Also compute the gradient field.
    pub fn gradient(mut self, enable: bool) -> Self {
        self.gradient = enable;
        self
    }

    /// Also compute the line-of-sight field.
    pub fn los(mut self, enable: bool) -> Self {
        self.los = enable;
        self
    }

    /// Also sweep the horizon out to `distance_limit_m`.
    pub fn horizon(mut self, distance_limit_m: f64) -> Self {
        self.horizon_limit_m = Some(distance_limit_m);
        self
    }

    pub fn build(self) -> Result<FieldComputer, TerrainError> {
        let (Some(center), Some(radius_m), Some(n_cells)) =
            (self.center, self.radius_m, self.n_cells)
        else {
            return Err(TerrainError::Builder);
        };
        if radius_m <= 0.0 || n_cells < 0 {
            return Err(TerrainError::Builder);
        }
        Ok(FieldComputer {
            center,
            radius_m,
            n_cells,
            antenna_height_m: self.antenna_height_m,
            elevation: self.elevation,
            gradient: self.gradient,
            los: self.los,
            horizon_limit_m: self.horizon_limit_m,
        })
    }
}

/// Per-row worker output, reduced after the join.
struct RowOutput {
    height: Vec<f32>,
    angle: Vec<f32>,
    gradient: Vec<f32>,
    los: Vec<Visibility>,
    sum_terrain: f64,
    n_terrain: u32,
}

impl FieldComputer {
    pub fn builder() -> FieldComputerBuilder {
        FieldComputerBuilder {
            center: None,
            radius_m: None,
            n_cells: None,
            antenna_height_m: 0.0,
            elevation: false,
            gradient: false,
            los: false,
            horizon_limit_m: None,
        }
    }

    /// Runs the whole pass: tile discovery, acquisition, per-cell
    /// population in parallel over rows, and the optional horizon
    /// sweep.
    ///
    /// Tile construction failures and a no-data center are fatal;
    /// per-cell interpolation failures and pre-scan misses degrade
    /// the affected cell to the no-data sentinel.
    pub fn compute<S>(&self, store: &S, mode: TileMode) -> Result<FieldSet, TerrainError>
    where
        S: TileStore + ?Sized,
    {
        let codes = tiles::required_tiles(self.center, self.radius_m, self.n_cells, self.los);
        if let Some(limit) = self.horizon_limit_m {
            for code in tiles::horizon_tiles(self.center, limit) {
                codes.insert(code);
            }
        }
        debug!("pass needs {} tiles", codes.len());

        let cache = TileCache::build(&codes, store, mode)?;

        // Nothing else in the pass is meaningful without a center
        // elevation.
        let center_height = match sample_height(&cache, self.center)? {
            Some(height) => height,
            None => {
                return Err(TerrainError::NoCenterElevation {
                    lat: self.center.y,
                    lon: self.center.x,
                })
            }
        };
        let eye_height = f64::from(center_height) + f64::from(self.antenna_height_m);

        let rows = (-self.n_cells..=self.n_cells)
            .into_par_iter()
            .map(|dy| self.populate_row(dy, eye_height, &cache))
            .collect::<Result<Vec<RowOutput>, TerrainError>>()?;

        let mut sum_terrain = 0.0_f64;
        let mut n_terrain = 0_u32;
        let mut height_rows = Vec::with_capacity(rows.len());
        let mut angle_rows = Vec::with_capacity(rows.len());
        let mut gradient_rows = Vec::with_capacity(rows.len());
        let mut los_rows = Vec::with_capacity(rows.len());
        for row in rows {
            sum_terrain += row.sum_terrain;
            n_terrain += row.n_terrain;
            height_rows.push(row.height);
            angle_rows.push(row.angle);
            gradient_rows.push(row.gradient);
            los_rows.push(row.los);
        }

        let height = Field::from_rows(self.n_cells, height_rows);
        let angle = self
            .elevation
            .then(|| Field::from_rows(self.n_cells, angle_rows));
        let gradient = self
            .gradient
            .then(|| Field::from_rows(self.n_cells, gradient_rows));
        let los = self.los.then(|| Field::from_rows(self.n_cells, los_rows));

        let horizon = match self.horizon_limit_m {
            Some(limit) => Some(self.sweep_horizon(&cache, limit, eye_height)?),
            None => None,
        };

        let summary = self.summarize(center_height, &height, sum_terrain, n_terrain, &horizon);

        Ok(FieldSet {
            height,
            angle,
            gradient,
            los,
            horizon,
            summary,
        })
    }
}

/// Private API.
impl FieldComputer {
    fn populate_row(
        &self,
        dy: i32,
        eye_height: f64,
        cache: &TileCache,
    ) -> Result<RowOutput, TerrainError> {
        #[allow(clippy::cast_sign_loss)]
        let side = (2 * self.n_cells + 1) as usize;
        let dpc = tiles::distance_per_cell(self.radius_m, self.n_cells);

        let mut out = RowOutput {
            height: Vec::with_capacity(side),
            angle: Vec::with_capacity(if self.elevation { side } else { 0 }),
            gradient: Vec::with_capacity(if self.gradient { side } else { 0 }),
            los: Vec::with_capacity(if self.los { side } else { 0 }),
            sum_terrain: 0.0,
            n_terrain: 0,
        };

        for dx in -self.n_cells..=self.n_cells {
            let at_center = dx == 0 && dy == 0;
            let bearing = geodesy::bearing_for_offset(dx, dy);
            let distance = dpc * f64::from(dx * dx + dy * dy).sqrt();
            let target = geodesy::destination(self.center, bearing, distance);

            let raw = sample_height(cache, target)?;

            let cell_height = match raw {
                Some(value) => {
                    let corrected = corrected_height(value, distance);
                    if at_center {
                        corrected + self.antenna_height_m
                    } else {
                        corrected
                    }
                }
                None => NO_DATA,
            };
            out.height.push(cell_height);

            if raw.is_some() && distance <= self.radius_m {
                // terrain only: the antenna on the center cell is a
                // structure, not ground
                let terrain = if at_center {
                    cell_height - self.antenna_height_m
                } else {
                    cell_height
                };
                out.sum_terrain += f64::from(terrain);
                out.n_terrain += 1;
            }

            // needed by both the angle field and the LOS march
            let target_angle = raw.map(|value| {
                elevation_angle(eye_height, distance, f64::from(value), geodesy::EARTH_RADIUS_M)
            });

            if self.elevation {
                #[allow(clippy::cast_possible_truncation)]
                out.angle.push(match target_angle {
                    Some(angle) => angle.to_degrees() as f32,
                    None => NO_DATA,
                });
            }

            if self.gradient {
                out.gradient.push(if at_center {
                    0.0
                } else {
                    self.gradient_at(cache, bearing, distance)?
                });
            }

            if self.los {
                out.los.push(if at_center {
                    // the center is visible by definition
                    Visibility::Visible
                } else {
                    match target_angle {
                        Some(angle) => {
                            self.visibility(cache, bearing, distance, eye_height, angle)?
                        }
                        None => Visibility::NotVisible,
                    }
                });
            }
        }
        Ok(out)
    }

    /// Central-difference slope of the corrected height over
    /// `[distance - 10 m, distance + 10 m]` along `bearing`.
    fn gradient_at(
        &self,
        cache: &TileCache,
        bearing: f64,
        distance: f64,
    ) -> Result<f32, TerrainError> {
        let near = distance - GRADIENT_DELTA_M;
        let far = distance + GRADIENT_DELTA_M;
        let raw_near = sample_height(cache, geodesy::destination(self.center, bearing, near))?;
        let raw_far = sample_height(cache, geodesy::destination(self.center, bearing, far))?;

        match (raw_near, raw_far) {
            (Some(raw_near), Some(raw_far)) => {
                let rise =
                    f64::from(corrected_height(raw_far, far) - corrected_height(raw_near, near));
                #[allow(clippy::cast_possible_truncation)]
                Ok((rise / (2.0 * GRADIENT_DELTA_M)) as f32)
            }
            _ => Ok(NO_DATA),
        }
    }

    /// Marches inward along `bearing` from 95% to 5% of `distance`,
    /// comparing each intermediate elevation angle with the angle to
    /// the target cell. Visible only if nothing along the path rises
    /// to the line of sight.
    fn visibility(
        &self,
        cache: &TileCache,
        bearing: f64,
        distance: f64,
        eye_height: f64,
        target_angle: f64,
    ) -> Result<Visibility, TerrainError> {
        for pct in tiles::los_steps(distance) {
            let sample_distance = distance * f64::from(pct) / 100.0;
            let coord = geodesy::destination(self.center, bearing, sample_distance);
            match sample_height(cache, coord)? {
                Some(value) => {
                    let angle = elevation_angle(
                        eye_height,
                        sample_distance,
                        f64::from(value),
                        geodesy::EARTH_RADIUS_M,
                    );
                    if angle >= target_angle {
                        return Ok(Visibility::NotVisible);
                    }
                }
                None => return Ok(Visibility::NotVisible),
            }
        }
        Ok(Visibility::Visible)
    }

    /// Maximum elevation angle per integer bearing degree, sampling
    /// 100 points out to `limit_m`. Samples without data are skipped;
    /// a bearing with no data at all reports the no-data sentinel.
    fn sweep_horizon(
        &self,
        cache: &TileCache,
        limit_m: f64,
        eye_height: f64,
    ) -> Result<Box<[f32; 360]>, TerrainError> {
        let mut horizon = Box::new([NO_DATA; 360]);
        for (bearing, out) in horizon.iter_mut().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let bearing = bearing as f64;
            let mut max_angle: Option<f32> = None;
            for pct in 1..=100 {
                let sample_distance = limit_m * f64::from(pct) / 100.0;
                let coord = geodesy::destination(self.center, bearing, sample_distance);
                if let Some(value) = sample_height(cache, coord)? {
                    #[allow(clippy::cast_possible_truncation)]
                    let angle = elevation_angle(
                        eye_height,
                        sample_distance,
                        f64::from(value),
                        geodesy::EARTH_RADIUS_M,
                    )
                    .to_degrees() as f32;
                    max_angle = Some(max_angle.map_or(angle, |max| max.max(angle)));
                }
            }
            if let Some(max) = max_angle {
                *out = max;
            }
        }
        Ok(horizon)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn summarize(
        &self,
        center_height: f32,
        height: &Field<f32>,
        sum_terrain: f64,
        n_terrain: u32,
        horizon: &Option<Box<[f32; 360]>>,
    ) -> Summary {
        let antenna_top = center_height + self.antenna_height_m;

        let mut min_height_m = f32::MAX;
        let mut max_height_m = f32::MIN;
        for &h in height.iter() {
            if h > NO_DATA_THRESHOLD {
                min_height_m = min_height_m.min(h - antenna_top);
                max_height_m = max_height_m.max(h - antenna_top);
            }
        }

        let mean_height_above_terrain_m = (n_terrain > 0)
            .then(|| (f64::from(antenna_top) - sum_terrain / f64::from(n_terrain)) as f32);

        let mut min_horizon_deg = None;
        let mut max_horizon_deg = None;
        if let Some(horizon) = horizon {
            for &angle in horizon.iter() {
                if angle > NO_DATA_THRESHOLD {
                    min_horizon_deg = Some(min_horizon_deg.map_or(angle, |min: f32| min.min(angle)));
                    max_horizon_deg = Some(max_horizon_deg.map_or(angle, |max: f32| max.max(angle)));
                }
            }
        }

        Summary {
            center_height_m: center_height,
            min_height_m,
            max_height_m,
            mean_height_above_terrain_m,
            min_horizon_deg,
            max_horizon_deg,
        }
    }
}

/// Raw elevation expressed relative to a level plane through the
/// center: foreshortened by the arc, then dropped by the curvature.
#[allow(clippy::cast_possible_truncation)]
fn corrected_height(raw: f32, distance_m: f64) -> f32 {
    (f64::from(raw) * (distance_m / geodesy::EARTH_RADIUS_M).cos()
        - geodesy::curvature_correction(distance_m)) as f32
}

/// Interpolated elevation at `coord`, or `None` when the failure is
/// the recoverable kind: a tile the pre-scan missed, or too little
/// valid data to interpolate.
fn sample_height(cache: &TileCache, coord: Coord<f64>) -> Result<Option<f32>, TerrainError> {
    match cache.lookup(coord) {
        Ok(tile) => match tile.interpolated_value(coord) {
            Ok(value) => Ok(Some(value)),
            Err(GridFloatError::InsufficientData { .. }) => {
                debug!("no interpolable data at {}, {}", coord.y, coord.x);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        },
        Err(TerrainError::TileNotFound(code)) => {
            debug!("tile {code} missed by the pre-scan");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
