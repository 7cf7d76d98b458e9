//! Per-symbol analysis pipeline.
//!
//! bars → flattened OHLC prices → elbow K → final k-means fit → sectors →
//! per-sector density → decision for the latest close.
//!
//! Everything here is synchronous and CPU-bound; callers serving many
//! symbols should run it on a worker pool.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cluster;
use crate::config::StrategyConfig;
use crate::density;
use crate::domain::{flatten_prices, validate_bars, Bar};
use crate::error::AnalysisError;
use crate::sector::{self, Sector, SectorSet};
use crate::signal::{decide, Action};

/// Successful output of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    /// Number of sectors actually built (after any degenerate-centroid retries).
    pub k: usize,
    pub sectors: SectorSet,
    pub current_price: f64,
    pub current_sector_index: usize,
    pub action: Action,
}

impl Analysis {
    pub fn current_sector(&self) -> Option<&Sector> {
        self.sectors.get(self.current_sector_index)
    }
}

/// Run the full pipeline over `bars`.
pub fn analyze(bars: &[Bar], config: &StrategyConfig) -> Result<Analysis, AnalysisError> {
    validate_bars(bars)?;
    let prices = flatten_prices(bars);

    let selected = cluster::select_k(
        &prices,
        config.clustering.max_clusters,
        config.min_data_points,
        &config.clustering,
    )?;
    debug!(k = selected, samples = prices.len(), "selected sector count");

    let mut k = selected;
    let mut sectors = loop {
        let fit = cluster::fit(&prices, k, &config.clustering);
        match sector::build(
            &prices,
            &fit.centroids,
            config.sectors.epsilon_factor,
            config.sectors.threshold_factor,
        ) {
            Ok(set) => {
                debug!(k, centroids = ?fit.centroids, "built sectors");
                break set;
            }
            Err(AnalysisError::DegenerateCluster { expected, distinct }) if k > 1 => {
                warn!(expected, distinct, "centroids collapsed, retrying with fewer sectors");
                k -= 1;
            }
            Err(e) => return Err(e),
        }
    };

    density::annotate(&mut sectors, &prices, &config.density);

    let current_price = bars
        .last()
        .map(|b| b.close)
        .ok_or_else(|| AnalysisError::InvalidBars("no bars received".into()))?;
    let current_sector_index = sectors.locate(current_price).ok_or_else(|| {
        AnalysisError::InvalidBars(format!("current price {current_price} is not in any sector"))
    })?;
    let action = decide(current_price, &sectors.sectors()[current_sector_index]);
    debug!(current_price, sector = current_sector_index, %action, "decision");

    Ok(Analysis {
        k,
        sectors,
        current_price,
        current_sector_index,
        action,
    })
}

/// Immutable per-symbol result handed to the rendering collaborator.
///
/// A failed symbol carries `error` and no analytical fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub symbol: String,
    pub bars: Vec<Bar>,
    pub sectors: Vec<Sector>,
    pub current_price: Option<f64>,
    pub current_sector_index: Option<usize>,
    pub action: Option<Action>,
    pub error: Option<String>,
}

impl AnalysisResult {
    /// Run the pipeline and capture any error into the result.
    pub fn run(symbol: &str, bars: Vec<Bar>, config: &StrategyConfig) -> Self {
        let outcome = analyze(&bars, config);
        Self::from_outcome(symbol, bars, outcome)
    }

    pub fn from_outcome(
        symbol: &str,
        bars: Vec<Bar>,
        outcome: Result<Analysis, AnalysisError>,
    ) -> Self {
        match outcome {
            Ok(analysis) => Self {
                symbol: symbol.to_string(),
                bars,
                current_price: Some(analysis.current_price),
                current_sector_index: Some(analysis.current_sector_index),
                action: Some(analysis.action),
                sectors: analysis.sectors.into_sectors(),
                error: None,
            },
            Err(e) => {
                warn!(symbol, error = %e, "analysis failed");
                Self::failed(symbol, e)
            }
        }
    }

    pub fn failed(symbol: &str, error: impl std::fmt::Display) -> Self {
        Self {
            symbol: symbol.to_string(),
            bars: Vec::new(),
            sectors: Vec::new(),
            current_price: None,
            current_sector_index: None,
            action: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(i: usize) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::Duration::days(i as i64)
    }

    fn flat_bar(i: usize, price: f64) -> Bar {
        Bar {
            timestamp: ts(i),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 100.0,
        }
    }

    fn config() -> StrategyConfig {
        let mut config = StrategyConfig::default();
        config.min_data_points = 8;
        config
    }

    #[test]
    fn two_regimes_produce_two_sectors() {
        let mut bars: Vec<Bar> = (0..10).map(|i| flat_bar(i, 10.0 + (i % 2) as f64)).collect();
        bars.extend((10..20).map(|i| flat_bar(i, 50.0 + (i % 3) as f64)));
        let analysis = analyze(&bars, &config()).unwrap();
        assert_eq!(analysis.k, 2);
        assert_eq!(analysis.current_sector_index, 1);
        assert_eq!(analysis.current_price, bars.last().unwrap().close);
    }

    #[test]
    fn constant_prices_yield_single_sector_hold() {
        let bars: Vec<Bar> = (0..10).map(|i| flat_bar(i, 42.0)).collect();
        let analysis = analyze(&bars, &config()).unwrap();
        assert_eq!(analysis.k, 1);
        assert_eq!(analysis.action, Action::Hold);
        let s = analysis.current_sector().unwrap();
        assert_eq!(s.expected_value, 42.0);
    }

    #[test]
    fn too_few_samples_fail() {
        let bars = vec![flat_bar(0, 10.0)];
        assert!(matches!(
            analyze(&bars, &config()),
            Err(AnalysisError::InsufficientData { .. })
        ));
    }

    #[test]
    fn unordered_bars_fail() {
        let bars = vec![flat_bar(1, 10.0), flat_bar(0, 11.0)];
        assert!(matches!(
            analyze(&bars, &config()),
            Err(AnalysisError::InvalidBars(_))
        ));
    }

    #[test]
    fn failed_result_carries_only_symbol_and_error() {
        let result = AnalysisResult::run("XYZ", vec![flat_bar(0, 1.0)], &config());
        assert!(!result.is_ok());
        assert_eq!(result.symbol, "XYZ");
        assert!(result.action.is_none());
        assert!(result.sectors.is_empty());
        assert!(result.bars.is_empty());
        assert!(result.error.unwrap().contains("insufficient data"));
    }

    #[test]
    fn successful_result_keeps_bars_and_sectors() {
        let bars: Vec<Bar> = (0..12).map(|i| flat_bar(i, 10.0 + i as f64)).collect();
        let result = AnalysisResult::run("ABC", bars.clone(), &config());
        assert!(result.is_ok());
        assert_eq!(result.bars, bars);
        assert!(!result.sectors.is_empty());
        assert!(result.action.is_some());
        let idx = result.current_sector_index.unwrap();
        assert!(result.sectors[idx].contains(bars.last().unwrap().close));
    }
}
