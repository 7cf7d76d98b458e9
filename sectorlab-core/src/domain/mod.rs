//! Domain types for SectorLab

pub mod bar;

pub use bar::{flatten_prices, validate_bars, Bar, TIMESTAMP_FORMAT};
