//! Terrain visibility and elevation fields around a geographic point,
//! computed from USGS NED GridFloat DEM tiles.

mod error;
mod field;
mod math;
mod store;
mod tiles;
mod value_map;

pub use crate::{
    error::TerrainError,
    field::{Field, FieldComputer, FieldComputerBuilder, FieldSet, Summary, Visibility},
    store::{LocalStore, TileStore},
    tiles::{horizon_tiles, required_tiles, TileCache, TileMode},
    value_map::{ValueMap, ZeroValueMap},
};
