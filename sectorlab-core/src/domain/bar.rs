//! Bar: the fundamental market data unit.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Timestamp format used when bars are rendered for clients.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// OHLCV bar for a single symbol at a single timestamp.
///
/// Bars are immutable once received from a data source. A sequence of bars
/// is expected in strictly increasing timestamp order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Returns true if any OHLCV field is NaN (void bar).
    pub fn is_void(&self) -> bool {
        self.open.is_nan()
            || self.high.is_nan()
            || self.low.is_nan()
            || self.close.is_nan()
            || self.volume.is_nan()
    }

    /// Basic OHLCV sanity check: high >= low, high >= open, high >= close, etc.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
            && self.volume >= 0.0
    }

    /// The four price observations of this bar, in OHLC order.
    pub fn ohlc(&self) -> [f64; 4] {
        [self.open, self.high, self.low, self.close]
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Flatten every bar's open, high, low and close into one price dataset.
///
/// Intrabar extremes are first-class observations, not just closes.
pub fn flatten_prices(bars: &[Bar]) -> Vec<f64> {
    bars.iter().flat_map(|b| b.ohlc()).collect()
}

/// Check that a bar sequence is non-empty, sane, and strictly chronological.
pub fn validate_bars(bars: &[Bar]) -> Result<(), AnalysisError> {
    if bars.is_empty() {
        return Err(AnalysisError::InvalidBars("no bars received".into()));
    }
    for (i, bar) in bars.iter().enumerate() {
        if !bar.is_sane() {
            return Err(AnalysisError::InvalidBars(format!(
                "bar {i} at {} failed OHLCV sanity check",
                bar.formatted_timestamp()
            )));
        }
    }
    for pair in bars.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(AnalysisError::InvalidBars(format!(
                "timestamps out of order or duplicated at {}",
                pair[1].formatted_timestamp()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn sample_bar() -> Bar {
        Bar {
            timestamp: ts(2),
            open: 100.0,
            high: 105.0,
            low: 98.0,
            close: 103.0,
            volume: 50_000.0,
        }
    }

    #[test]
    fn bar_is_sane() {
        assert!(sample_bar().is_sane());
    }

    #[test]
    fn bar_detects_void() {
        let mut bar = sample_bar();
        bar.open = f64::NAN;
        assert!(bar.is_void());
        assert!(!bar.is_sane());
    }

    #[test]
    fn bar_detects_insane_high_low() {
        let mut bar = sample_bar();
        bar.high = 97.0; // below low
        assert!(!bar.is_sane());
    }

    #[test]
    fn negative_volume_is_insane() {
        let mut bar = sample_bar();
        bar.volume = -1.0;
        assert!(!bar.is_sane());
    }

    #[test]
    fn flatten_keeps_ohlc_order() {
        let mut second = sample_bar();
        second.timestamp = ts(3);
        second.open = 103.0;
        let prices = flatten_prices(&[sample_bar(), second]);
        assert_eq!(prices, vec![100.0, 105.0, 98.0, 103.0, 103.0, 105.0, 98.0, 103.0]);
    }

    #[test]
    fn validate_rejects_empty() {
        assert!(matches!(validate_bars(&[]), Err(AnalysisError::InvalidBars(_))));
    }

    #[test]
    fn validate_rejects_duplicate_timestamps() {
        let bars = vec![sample_bar(), sample_bar()];
        assert!(matches!(validate_bars(&bars), Err(AnalysisError::InvalidBars(_))));
    }

    #[test]
    fn validate_accepts_chronological_bars() {
        let mut later = sample_bar();
        later.timestamp = ts(3);
        assert!(validate_bars(&[sample_bar(), later]).is_ok());
    }

    #[test]
    fn formatted_timestamp_is_stable() {
        assert_eq!(sample_bar().formatted_timestamp(), "2024-01-02 00:00:00");
    }
}
