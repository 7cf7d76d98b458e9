//! SectorLab Core: price sectors, density statistics and signal decisions.
//!
//! This crate contains the synchronous analytics:
//! - Domain types (bars) and bar-sequence validation
//! - Elbow/curvature selection of the sector count over 1-D k-means
//! - Contiguous sector construction from cluster centroids
//! - Per-sector kernel density estimation (expected value, median, curve)
//! - The BUY/SELL/HOLD decision for the latest price
//! - The per-symbol pipeline tying these together
//! - Structured, validated configuration

pub mod analysis;
pub mod cluster;
pub mod config;
pub mod density;
pub mod domain;
pub mod error;
pub mod rng;
pub mod sector;
pub mod signal;

pub use analysis::{analyze, Analysis, AnalysisResult};
pub use config::{AppConfig, ConfigError, StrategyConfig};
pub use domain::Bar;
pub use error::AnalysisError;
pub use sector::{Sector, SectorSet};
pub use signal::{decide, Action};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything crossing into worker threads is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<Bar>();
        require_sync::<Bar>();
        require_send::<Sector>();
        require_sync::<Sector>();
        require_send::<SectorSet>();
        require_sync::<SectorSet>();
        require_send::<AnalysisResult>();
        require_sync::<AnalysisResult>();
        require_send::<AnalysisError>();
        require_sync::<AnalysisError>();
        require_send::<AppConfig>();
        require_sync::<AppConfig>();
        require_send::<rng::RngHierarchy>();
        require_sync::<rng::RngHierarchy>();
    }
}
