//! JSON message shapes exchanged with the presentation layer.
//!
//! ```json
//! {"type": "get_historical_data", "tickers": ["AAPL"], "barSize": "1 day",
//!  "duration": "1 M", "rth": true}
//! ```
//!
//! The response carries one report per ticker, keyed by the ticker itself,
//! next to the `type` and `tickers` fields.

use std::collections::BTreeMap;

use sectorlab_core::config::DataRequestConfig;
use sectorlab_core::domain::Bar;
use sectorlab_core::{AnalysisResult, Sector};
use serde::{Deserialize, Serialize};

use crate::source::BarRequest;

/// Every message a client may send, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    GetHistoricalData(HistoricalDataRequest),
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalDataRequest {
    pub tickers: Vec<String>,
    #[serde(rename = "barSize", default, skip_serializing_if = "Option::is_none")]
    pub bar_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rth: Option<bool>,
}

impl HistoricalDataRequest {
    pub fn new(tickers: Vec<String>) -> Self {
        Self {
            tickers,
            bar_size: None,
            duration: None,
            rth: None,
        }
    }

    /// Tickers with blanks dropped and duplicates removed, first occurrence
    /// kept.
    pub fn unique_tickers(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.tickers
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .filter(|t| seen.insert(t.to_string()))
            .map(str::to_string)
            .collect()
    }

    /// Per-symbol request, falling back to `defaults` for absent fields.
    pub fn bar_request(&self, symbol: &str, defaults: &DataRequestConfig) -> BarRequest {
        BarRequest::new(
            symbol,
            self.bar_size.as_deref().unwrap_or(&defaults.default_bar_size),
            self.duration.as_deref().unwrap_or(&defaults.default_duration),
            self.rth.unwrap_or(defaults.default_rth),
        )
    }
}

/// One sector as rendered on the chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorReport {
    /// 1-based, as the chart labels sectors.
    pub num: usize,
    pub min_bound: f64,
    pub max_bound: f64,
    pub centroid: f64,
    pub expected_value: f64,
    pub median: f64,
    pub epsilon: f64,
    pub threshold: f64,
    #[serde(rename = "kdeX")]
    pub kde_x: Vec<f64>,
    #[serde(rename = "kdeY")]
    pub kde_y: Vec<f64>,
}

impl From<&Sector> for SectorReport {
    fn from(s: &Sector) -> Self {
        Self {
            num: s.index + 1,
            min_bound: s.lower_bound,
            max_bound: s.upper_bound,
            centroid: s.centroid,
            expected_value: s.expected_value,
            median: s.median,
            epsilon: s.epsilon,
            threshold: s.threshold,
            kde_x: s.density_curve.x.clone(),
            kde_y: s.density_curve.y.clone(),
        }
    }
}

/// Per-symbol payload. A failed symbol serializes as `{symbol, error}` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SymbolReport {
    Ok(SymbolData),
    Failed { symbol: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolData {
    pub symbol: String,
    pub dates: Vec<String>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    pub sectors: Vec<SectorReport>,
    /// 1-based number of the sector holding the latest close.
    pub current_sector: usize,
    pub action: sectorlab_core::Action,
}

impl SymbolReport {
    pub fn symbol(&self) -> &str {
        match self {
            SymbolReport::Ok(data) => &data.symbol,
            SymbolReport::Failed { symbol, .. } => symbol,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            SymbolReport::Ok(_) => None,
            SymbolReport::Failed { error, .. } => Some(error),
        }
    }
}

impl From<&AnalysisResult> for SymbolReport {
    fn from(result: &AnalysisResult) -> Self {
        let (Some(action), Some(current), None) = (
            result.action,
            result.current_sector_index,
            result.error.as_ref(),
        ) else {
            return SymbolReport::Failed {
                symbol: result.symbol.clone(),
                error: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "analysis produced no decision".to_string()),
            };
        };

        let bars = &result.bars;
        SymbolReport::Ok(SymbolData {
            symbol: result.symbol.clone(),
            dates: bars.iter().map(Bar::formatted_timestamp).collect(),
            open: bars.iter().map(|b| b.open).collect(),
            high: bars.iter().map(|b| b.high).collect(),
            low: bars.iter().map(|b| b.low).collect(),
            close: bars.iter().map(|b| b.close).collect(),
            volume: bars.iter().map(|b| b.volume).collect(),
            sectors: result.sectors.iter().map(SectorReport::from).collect(),
            current_sector: current + 1,
            action,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "historical_data")]
pub struct HistoricalDataResponse {
    pub tickers: Vec<String>,
    #[serde(flatten)]
    pub reports: BTreeMap<String, SymbolReport>,
}

impl HistoricalDataResponse {
    pub fn new(tickers: Vec<String>) -> Self {
        Self {
            tickers,
            reports: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, report: SymbolReport) {
        self.reports.insert(report.symbol().to_string(), report);
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolReport> {
        self.reports.get(symbol)
    }
}
