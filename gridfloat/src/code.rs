//! Lat-long tile codes.
//!
//! USGS 1/3 arc-second tiles are named for the *northwest* corner of
//! the one-degree square they cover, `nLLwLLL`. The code packs that
//! corner into a single integer, `(floor(lat) + 1) * 1000 +
//! floor(-lon + 1)`, so tile `n41w106` (covering latitudes 40..41 and
//! longitudes -106..-105) has code 41106.
//!
//! The dataset covers only the US, so latitude is always north and
//! longitude is always treated as west (negated if given positive).
//! A point exactly on a tile boundary may legitimately code to either
//! adjacent tile; that ambiguity is inherent in the naming scheme.

use geo::geometry::Coord;
use std::fmt;

/// Compact identifier for the tile containing a point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCode(u32);

impl TileCode {
    /// Returns the code of the tile containing `coord`.
    pub fn for_coord(coord: Coord<f64>) -> Self {
        let lon = -coord.x.abs();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let code = ((coord.y.floor() as i32 + 1) * 1000 + (1.0 - lon).floor() as i32) as u32;
        Self(code)
    }

    /// Parses a `nLLwLLL` base name back into a code.
    pub fn from_base_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix('n')?;
        if rest.len() != 6 {
            return None;
        }
        let lat: u32 = rest[..2].parse().ok()?;
        let lon: u32 = rest[2..].strip_prefix('w')?.parse().ok()?;
        Some(Self(lat * 1000 + lon))
    }

    /// Canonical `nLLwLLL` base filename for this tile.
    pub fn base_name(&self) -> String {
        format!("n{:02}w{:03}", self.0 / 1000, self.0 % 1000)
    }

    /// Local header filename for this tile, e.g.
    /// `usgs_ned_13_n41w106_gridfloat.hdr`.
    pub fn header_file_name(&self) -> String {
        format!("usgs_ned_13_{}_gridfloat.hdr", self.base_name())
    }

    /// Local data filename for this tile, e.g.
    /// `usgs_ned_13_n41w106_gridfloat.flt`.
    pub fn data_file_name(&self) -> String {
        format!("usgs_ned_13_{}_gridfloat.flt", self.base_name())
    }
}

impl fmt::Display for TileCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_name())
    }
}

#[cfg(test)]
mod tests {
    use super::{Coord, TileCode};

    #[test]
    fn test_for_coord() {
        let code = TileCode::for_coord(Coord {
            y: 40.108_016,
            x: -105.051_7,
        });
        assert_eq!(code, TileCode(41106));
        assert_eq!(code.base_name(), "n41w106");
        assert_eq!(code.header_file_name(), "usgs_ned_13_n41w106_gridfloat.hdr");
        assert_eq!(code.data_file_name(), "usgs_ned_13_n41w106_gridfloat.flt");
    }

    #[test]
    fn test_positive_longitude_is_treated_as_west() {
        let west = TileCode::for_coord(Coord {
            y: 40.5,
            x: -105.5,
        });
        let east = TileCode::for_coord(Coord { y: 40.5, x: 105.5 });
        assert_eq!(west, east);
    }

    #[test]
    fn test_base_name_round_trip() {
        let code = TileCode::for_coord(Coord { y: 38.4693, x: -109.739_254 });
        assert_eq!(TileCode::from_base_name(&code.base_name()), Some(code));
    }

    #[test]
    fn test_interior_points_share_the_tile_of_its_nw_corner() {
        // Tile n41w106 nominally covers lats 40..41, lons -106..-105.
        for (lat, lon) in [
            (40.000_1, -105.999_9),
            (40.5, -105.5),
            (40.999_9, -105.000_1),
        ] {
            assert_eq!(
                TileCode::for_coord(Coord { y: lat, x: lon }).base_name(),
                "n41w106"
            );
        }
    }
}
