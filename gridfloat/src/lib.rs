//! USGS NED GridFloat (`.hdr`/`.flt`) elevation tiles.
//!
//! # References
//!
//! 1. [GridFloat format description](https://www.loc.gov/preservation/digital/formats/fdd/fdd000422.shtml)
//! 1. [xllcorner and yllcorner](https://anuga.anu.edu.au/ticket/211)
//! 1. [USGS standards for the National Elevation Dataset](https://pubs.usgs.gov/tm/11b9/tm11B9.pdf)
//!
//! A tile is a pair of files: a small text header (`KEY VALUE` lines)
//! and a raw data file of little-endian IEEE-754 32-bit floats,
//! row-major, top row first, left-to-right within a row. Elevation
//! samples are meters; values at or below the header's no-data
//! sentinel mark cells with no valid measurement.

pub mod code;
mod error;
pub mod geodesy;

pub use crate::{code::TileCode, error::GridFloatError};
use byteorder::{LittleEndian as LE, ReadBytesExt};
use geo::geometry::Coord;
use log::debug;
use std::{
    fs::File,
    io::{BufReader, ErrorKind, Seek, SeekFrom},
    mem::size_of,
    path::Path,
    sync::{Mutex, PoisonError},
};

/// Sentinel stored in output fields when no valid elevation exists.
pub const NO_DATA: f32 = -9999.0;

/// Raw values below this are treated as "no data" wherever a single
/// cell value is consulted directly.
pub const NO_DATA_THRESHOLD: f32 = -9000.0;

/// Parsed tile header.
///
/// The `BYTEORDER` key is accepted but not validated; the data file
/// is assumed little-endian (`LSBFIRST`), which holds for the whole
/// USGS NED GridFloat distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct TileHeader {
    /// Number of columns in the tile.
    pub n_columns: usize,

    /// Number of rows in the tile.
    pub n_rows: usize,

    /// Longitude of the lower-left corner, degrees.
    pub xllcorner: f64,

    /// Latitude of the lower-left corner, degrees.
    pub yllcorner: f64,

    /// Cell size, degrees.
    pub cellsize: f64,

    /// No-data sentinel (`NODATA_VALUE` or `NODATA`).
    pub nodata: f32,
}

/// Which cell-center quadrant a query point falls in.
enum Quadrant {
    /// Within one meter of the cell center; interpolation degenerates
    /// to the single cell's value.
    Degenerate,
    NorthEast,
    NorthWest,
    SouthWest,
    SouthEast,
}

impl Quadrant {
    /// (row, column) step from the nearest cell toward this quadrant.
    /// Row indices increase southward.
    fn offsets(&self) -> (isize, isize) {
        match self {
            Quadrant::Degenerate => (0, 0),
            Quadrant::NorthEast => (-1, 1),
            Quadrant::NorthWest => (-1, -1),
            Quadrant::SouthWest => (1, -1),
            Quadrant::SouthEast => (1, 1),
        }
    }
}

enum SampleStore {
    /// Complete row-major grid held in memory.
    Resident(Box<[f32]>),

    /// Open handle into the backing file, seeked per lookup. The
    /// mutex serializes the seek cursor; concurrent readers take
    /// turns rather than sharing a bare cursor.
    OnDemand(Mutex<File>),
}

/// One GridFloat DEM tile.
pub struct Tile {
    header: TileHeader,

    /// Longitude of the western edge.
    xl: f64,
    /// Longitude of the eastern edge.
    xr: f64,
    /// Latitude of the southern edge.
    yb: f64,
    /// Latitude of the northern edge.
    yt: f64,

    /// Count of no-data cells seen while loading. Diagnostic only.
    n_invalid: usize,

    samples: SampleStore,
}

impl Tile {
    /// Returns a tile with its samples read into memory.
    pub fn load<H, D>(header_path: H, data_path: D) -> Result<Self, GridFloatError>
    where
        H: AsRef<Path>,
        D: AsRef<Path>,
    {
        let header = parse_header(header_path.as_ref())?;
        let expected = header.n_rows * header.n_columns;

        let mut samples = vec![0.0_f32; expected];
        let mut reader = BufReader::new(File::open(data_path.as_ref())?);
        reader
            .read_f32_into::<LE>(&mut samples)
            .map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => GridFloatError::TruncatedData {
                    path: data_path.as_ref().to_owned(),
                    expected: (expected * size_of::<f32>()) as u64,
                },
                _ => GridFloatError::Io(e),
            })?;

        let n_invalid = samples
            .iter()
            .filter(|&&v| v < header.nodata + 1.0)
            .count();
        debug!(
            "loaded {:?}: {n_invalid} invalid of {expected} samples",
            data_path.as_ref()
        );

        Ok(Self::from_parts(
            header,
            n_invalid,
            SampleStore::Resident(samples.into_boxed_slice()),
        ))
    }

    /// Returns a tile that seeks the backing file per lookup instead
    /// of materializing the grid.
    ///
    /// Lookups against the single handle are serialized internally,
    /// so a shared on-demand tile is safe, just slower, under
    /// concurrent readers.
    pub fn open<H, D>(header_path: H, data_path: D) -> Result<Self, GridFloatError>
    where
        H: AsRef<Path>,
        D: AsRef<Path>,
    {
        let header = parse_header(header_path.as_ref())?;
        let file = File::open(data_path.as_ref())?;
        Ok(Self::from_parts(header, 0, SampleStore::OnDemand(Mutex::new(file))))
    }

    pub fn header(&self) -> &TileHeader {
        &self.header
    }

    /// Count of no-data cells seen while loading. Always 0 for
    /// on-demand tiles, which are never scanned in full.
    pub fn invalid_samples(&self) -> usize {
        self.n_invalid
    }

    /// Is `coord` within this tile (edges inclusive)?
    pub fn is_in_tile(&self, coord: Coord<f64>) -> bool {
        (self.yb..=self.yt).contains(&coord.y) && (self.xl..=self.xr).contains(&coord.x)
    }

    /// Is `height` a real measurement rather than a no-data marker?
    pub fn valid_height(&self, height: f32) -> bool {
        height > self.header.nodata + 1.0
    }

    /// The value of the cell containing `coord`, without
    /// interpolation. Returns the no-data sentinel if the point is
    /// outside the tile.
    pub fn cell_value(&self, coord: Coord<f64>) -> Result<f32, GridFloatError> {
        if !self.is_in_tile(coord) {
            return Ok(self.header.nodata);
        }
        let (row, col) = self.index_pair(coord);
        self.sample(row, col)
    }

    /// The inverse-distance-weighted average of the 2x2 cell-center
    /// neighborhood on the side of the nearest cell where `coord`
    /// actually lies.
    ///
    /// Cells without valid data are dropped from both the weighted
    /// sum and the weight total; averaging over fewer cells beats
    /// letting a sentinel poison the result near tile edges and data
    /// gaps. Fails with [`GridFloatError::InsufficientData`] only
    /// when no candidate cell has valid data.
    pub fn interpolated_value(&self, coord: Coord<f64>) -> Result<f32, GridFloatError> {
        let insufficient = || GridFloatError::InsufficientData {
            lat: coord.y,
            lon: coord.x,
        };

        let (row, col) = self.index_pair(coord);
        match self.quadrant(coord) {
            Quadrant::Degenerate => {
                let value = self.cell_value(coord)?;
                if value < NO_DATA_THRESHOLD {
                    Err(insufficient())
                } else {
                    Ok(value)
                }
            }
            quadrant => {
                let (d_row, d_col) = quadrant.offsets();
                let candidates = [
                    (row, col),
                    (row, col + d_col),
                    (row + d_row, col),
                    (row + d_row, col + d_col),
                ];

                let mut weighted_sum = 0.0_f64;
                let mut weight_total = 0.0_f64;
                for (r, c) in candidates {
                    let value = self.sample(r, c)?;
                    if self.valid_height(value) {
                        let d = geodesy::distance(self.cell_centre(r, c), coord);
                        weighted_sum += f64::from(value) / d;
                        weight_total += 1.0 / d;
                    }
                }

                if weight_total == 0.0 {
                    Err(insufficient())
                } else {
                    #[allow(clippy::cast_possible_truncation)]
                    Ok((weighted_sum / weight_total) as f32)
                }
            }
        }
    }

    /// Maps `coord` to (row, column) indices. Row 0 is the northern
    /// edge. No bounds checking; points outside the tile map to
    /// out-of-range indices.
    #[allow(clippy::cast_possible_truncation)]
    pub fn index_pair(&self, coord: Coord<f64>) -> (isize, isize) {
        let row = ((self.yt - coord.y) / self.header.cellsize) as isize;
        let col = ((coord.x - self.xl) / self.header.cellsize) as isize;
        (row, col)
    }

    /// The center coordinate of the cell at (row, column). No bounds
    /// checking; indices outside the grid yield the center the cell
    /// would have if the grid extended that far.
    #[allow(clippy::cast_precision_loss)]
    pub fn cell_centre(&self, row: isize, col: isize) -> Coord<f64> {
        let half = self.header.cellsize / 2.0;
        Coord {
            y: (self.yt - half) - row as f64 * self.header.cellsize,
            x: (self.xl + half) + col as f64 * self.header.cellsize,
        }
    }
}

/// Private API.
impl Tile {
    fn from_parts(header: TileHeader, n_invalid: usize, samples: SampleStore) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let (xr, yt) = (
            header.xllcorner + header.cellsize * header.n_columns as f64,
            header.yllcorner + header.cellsize * header.n_rows as f64,
        );
        Self {
            xl: header.xllcorner,
            xr,
            yb: header.yllcorner,
            yt,
            n_invalid,
            samples,
            header,
        }
    }

    /// The raw sample at (row, column). Out-of-range indices yield
    /// the header's no-data value: neighbor gathering near a tile
    /// edge never crosses into the adjacent tile, it just loses those
    /// candidates from the weighted average.
    fn sample(&self, row: isize, col: isize) -> Result<f32, GridFloatError> {
        #[allow(clippy::cast_possible_wrap)]
        let (n_rows, n_columns) = (self.header.n_rows as isize, self.header.n_columns as isize);
        if row < 0 || col < 0 || row >= n_rows || col >= n_columns {
            return Ok(self.header.nodata);
        }

        #[allow(clippy::cast_sign_loss)]
        let index = row as usize * self.header.n_columns + col as usize;
        match &self.samples {
            SampleStore::Resident(samples) => Ok(samples[index]),
            SampleStore::OnDemand(file) => {
                let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
                file.seek(SeekFrom::Start((index * size_of::<f32>()) as u64))?;
                Ok(file.read_f32::<LE>()?)
            }
        }
    }

    fn quadrant(&self, coord: Coord<f64>) -> Quadrant {
        let (row, col) = self.index_pair(coord);
        let centre = self.cell_centre(row, col);

        if geodesy::distance(centre, coord) < 1.0 {
            return Quadrant::Degenerate;
        }

        if coord.y >= centre.y && coord.x >= centre.x {
            Quadrant::NorthEast
        } else if coord.y >= centre.y && coord.x <= centre.x {
            Quadrant::NorthWest
        } else if coord.y <= centre.y && coord.x <= centre.x {
            Quadrant::SouthWest
        } else {
            Quadrant::SouthEast
        }
    }
}

fn parse_header(path: &Path) -> Result<TileHeader, GridFloatError> {
    // The data format is defined in terms of 4-byte IEEE floats.
    if size_of::<f32>() != 4 {
        return Err(GridFloatError::UnsupportedPlatform);
    }

    let malformed = |reason: String| GridFloatError::MalformedHeader {
        path: path.to_owned(),
        reason,
    };

    let text = std::fs::read_to_string(path)?;

    let mut n_columns: Option<usize> = None;
    let mut n_rows: Option<usize> = None;
    let mut xllcorner: Option<f64> = None;
    let mut yllcorner: Option<f64> = None;
    let mut cellsize: Option<f64> = None;
    let mut nodata_value: Option<f32> = None;
    let mut nodata: Option<f32> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [key, value] = fields[..] else {
            return Err(malformed(format!("expected KEY VALUE, got {line:?}")));
        };

        let bad_value = || malformed(format!("bad value in {line:?}"));
        match key.to_ascii_uppercase().as_str() {
            "NCOLS" => n_columns = Some(value.parse().map_err(|_| bad_value())?),
            "NROWS" => n_rows = Some(value.parse().map_err(|_| bad_value())?),
            "XLLCORNER" => xllcorner = Some(value.parse().map_err(|_| bad_value())?),
            "YLLCORNER" => yllcorner = Some(value.parse().map_err(|_| bad_value())?),
            "CELLSIZE" => cellsize = Some(value.parse().map_err(|_| bad_value())?),
            "NODATA_VALUE" => nodata_value = Some(value.parse().map_err(|_| bad_value())?),
            "NODATA" => nodata = Some(value.parse().map_err(|_| bad_value())?),
            // assumed LSBFIRST; not validated
            "BYTEORDER" => (),
            // unrecognized keys are ignored
            _ => (),
        }
    }

    let require = |name: &str, v: Option<f64>| v.ok_or_else(|| malformed(format!("missing {name}")));

    let header = TileHeader {
        n_columns: n_columns.ok_or_else(|| malformed("missing NCOLS".into()))?,
        n_rows: n_rows.ok_or_else(|| malformed("missing NROWS".into()))?,
        xllcorner: require("XLLCORNER", xllcorner)?,
        yllcorner: require("YLLCORNER", yllcorner)?,
        cellsize: require("CELLSIZE", cellsize)?,
        nodata: nodata_value
            .or(nodata)
            .ok_or_else(|| malformed("missing NODATA_VALUE".into()))?,
    };

    if header.n_columns == 0 || header.n_rows == 0 || header.cellsize <= 0.0 {
        return Err(malformed("non-positive grid dimensions".into()));
    }

    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::{geodesy, Coord, GridFloatError, Tile};
    use approx::assert_relative_eq;
    use byteorder::{LittleEndian as LE, WriteBytesExt};
    use std::path::PathBuf;

    const HEADER_3X3: &str = "\
ncols         3
nrows         3
xllcorner     -105.0
yllcorner     40.0
cellsize      0.25
NODATA_value  -9999
byteorder     LSBFIRST
";

    /// 3x3 grid, distinct values, row-major from the top row.
    const SAMPLES_3X3: [f32; 9] = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0];

    fn write_tile(tag: &str, header: &str, samples: &[f32]) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("gridfloat-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let hdr = dir.join("tile.hdr");
        let flt = dir.join("tile.flt");
        std::fs::write(&hdr, header).unwrap();
        let mut raw = Vec::with_capacity(samples.len() * 4);
        for s in samples {
            raw.write_f32::<LE>(*s).unwrap();
        }
        std::fs::write(&flt, raw).unwrap();
        (hdr, flt)
    }

    #[test]
    fn test_header_parse() {
        let (hdr, flt) = write_tile("header", HEADER_3X3, &SAMPLES_3X3);
        let tile = Tile::load(&hdr, &flt).unwrap();
        let header = tile.header();
        assert_eq!(header.n_columns, 3);
        assert_eq!(header.n_rows, 3);
        assert_relative_eq!(header.xllcorner, -105.0);
        assert_relative_eq!(header.yllcorner, 40.0);
        assert_relative_eq!(header.cellsize, 0.25);
        assert_eq!(header.nodata, -9999.0);
        assert_eq!(tile.invalid_samples(), 0);
    }

    #[test]
    fn test_header_missing_cellsize() {
        let header = "\
ncols 3
nrows 3
xllcorner -105.0
yllcorner 40.0
NODATA_value -9999
";
        let (hdr, flt) = write_tile("nocellsize", header, &SAMPLES_3X3);
        assert!(matches!(
            Tile::load(&hdr, &flt),
            Err(GridFloatError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn test_truncated_data() {
        let (hdr, flt) = write_tile("truncated", HEADER_3X3, &SAMPLES_3X3[..7]);
        assert!(matches!(
            Tile::load(&hdr, &flt),
            Err(GridFloatError::TruncatedData { expected: 36, .. })
        ));
    }

    #[test]
    fn test_bounds() {
        let (hdr, flt) = write_tile("bounds", HEADER_3X3, &SAMPLES_3X3);
        let tile = Tile::load(&hdr, &flt).unwrap();
        assert!(tile.is_in_tile(Coord { x: -105.0, y: 40.0 }));
        assert!(tile.is_in_tile(Coord { x: -104.25, y: 40.75 }));
        assert!(tile.is_in_tile(Coord { x: -104.6, y: 40.4 }));
        assert!(!tile.is_in_tile(Coord { x: -105.1, y: 40.4 }));
        assert!(!tile.is_in_tile(Coord { x: -104.6, y: 39.9 }));
    }

    #[test]
    fn test_index_conversions() {
        let (hdr, flt) = write_tile("index", HEADER_3X3, &SAMPLES_3X3);
        let tile = Tile::load(&hdr, &flt).unwrap();
        for row in 0..3 {
            for col in 0..3 {
                let centre = tile.cell_centre(row, col);
                assert_eq!(tile.index_pair(centre), (row, col));
            }
        }
        // top-left cell center
        let centre = tile.cell_centre(0, 0);
        assert_relative_eq!(centre.y, 40.75 - 0.125);
        assert_relative_eq!(centre.x, -105.0 + 0.125);
    }

    #[test]
    fn test_cell_value() {
        let (hdr, flt) = write_tile("cellvalue", HEADER_3X3, &SAMPLES_3X3);
        let tile = Tile::load(&hdr, &flt).unwrap();
        // row-major from the top: cell (0, 0) is the NW corner
        assert_eq!(tile.cell_value(tile.cell_centre(0, 0)).unwrap(), 10.0);
        assert_eq!(tile.cell_value(tile.cell_centre(1, 1)).unwrap(), 50.0);
        assert_eq!(tile.cell_value(tile.cell_centre(2, 2)).unwrap(), 90.0);
        // outside the tile
        assert_eq!(
            tile.cell_value(Coord { x: -103.0, y: 40.4 }).unwrap(),
            -9999.0
        );
    }

    #[test]
    fn test_interpolation_degenerate_at_cell_centre() {
        let (hdr, flt) = write_tile("degenerate", HEADER_3X3, &SAMPLES_3X3);
        let tile = Tile::load(&hdr, &flt).unwrap();
        for row in 0..3 {
            for col in 0..3 {
                let centre = tile.cell_centre(row, col);
                assert_eq!(
                    tile.interpolated_value(centre).unwrap(),
                    tile.cell_value(centre).unwrap()
                );
            }
        }
    }

    /// Query point in the NE quadrant of cell (1, 1); candidates are
    /// (1,1), (1,2), (0,1) and (0,2).
    fn ne_of_centre(tile: &Tile) -> Coord<f64> {
        let centre = tile.cell_centre(1, 1);
        Coord {
            x: centre.x + 0.3 * 0.25,
            y: centre.y + 0.3 * 0.25,
        }
    }

    fn expected_weighted(tile: &Tile, point: Coord<f64>, cells: &[(isize, isize, f32)]) -> f32 {
        let mut num = 0.0_f64;
        let mut den = 0.0_f64;
        for &(row, col, value) in cells {
            let d = geodesy::distance(tile.cell_centre(row, col), point);
            num += f64::from(value) / d;
            den += 1.0 / d;
        }
        #[allow(clippy::cast_possible_truncation)]
        let expected = (num / den) as f32;
        expected
    }

    #[test]
    fn test_interpolation_quadrant_weighting() {
        let (hdr, flt) = write_tile("quadrant", HEADER_3X3, &SAMPLES_3X3);
        let tile = Tile::load(&hdr, &flt).unwrap();
        let point = ne_of_centre(&tile);
        let expected = expected_weighted(
            &tile,
            point,
            &[(1, 1, 50.0), (1, 2, 60.0), (0, 1, 20.0), (0, 2, 30.0)],
        );
        assert_relative_eq!(tile.interpolated_value(point).unwrap(), expected);
    }

    #[test]
    fn test_interpolation_drops_nodata_neighbor() {
        let mut samples = SAMPLES_3X3;
        samples[2] = -9999.0; // cell (0, 2)
        let (hdr, flt) = write_tile("dropnodata", HEADER_3X3, &samples);
        let tile = Tile::load(&hdr, &flt).unwrap();
        let point = ne_of_centre(&tile);
        // the no-data cell's weight is dropped, not zeroed-and-kept
        let expected =
            expected_weighted(&tile, point, &[(1, 1, 50.0), (1, 2, 60.0), (0, 1, 20.0)]);
        assert_relative_eq!(tile.interpolated_value(point).unwrap(), expected);
        assert_eq!(tile.invalid_samples(), 1);
    }

    #[test]
    fn test_interpolation_all_nodata_fails() {
        let samples = [-9999.0_f32; 9];
        let (hdr, flt) = write_tile("allnodata", HEADER_3X3, &samples);
        let tile = Tile::load(&hdr, &flt).unwrap();
        let point = ne_of_centre(&tile);
        assert!(matches!(
            tile.interpolated_value(point),
            Err(GridFloatError::InsufficientData { .. })
        ));
        // degenerate path fails the same way
        assert!(matches!(
            tile.interpolated_value(tile.cell_centre(1, 1)),
            Err(GridFloatError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_on_demand_matches_resident() {
        let (hdr, flt) = write_tile("ondemand", HEADER_3X3, &SAMPLES_3X3);
        let resident = Tile::load(&hdr, &flt).unwrap();
        let on_demand = Tile::open(&hdr, &flt).unwrap();
        for row in 0..3 {
            for col in 0..3 {
                let centre = resident.cell_centre(row, col);
                assert_eq!(
                    resident.cell_value(centre).unwrap(),
                    on_demand.cell_value(centre).unwrap()
                );
            }
        }
        let point = ne_of_centre(&resident);
        assert_eq!(
            resident.interpolated_value(point).unwrap(),
            on_demand.interpolated_value(point).unwrap()
        );
    }
}
