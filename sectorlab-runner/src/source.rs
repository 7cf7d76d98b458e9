//! Bar sources: the external collaborators that actually produce bars.
//!
//! A source accepts a request, returns immediately and later delivers
//! through a [`BridgeHandle`] from its own thread. Two implementations:
//! - `SyntheticSource`: deterministic random walk per symbol
//! - `CsvSource`: one `<SYMBOL>.csv` file per symbol in a directory

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use parking_lot::Mutex;
use sectorlab_core::domain::{Bar, TIMESTAMP_FORMAT};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::bridge::{BridgeHandle, RequestId};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("data source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed data: {0}")]
    Malformed(String),
}

/// Parameters of one historical-data request.
#[derive(Debug, Clone, PartialEq)]
pub struct BarRequest {
    pub symbol: String,
    /// Bar size, e.g. `"1 day"`, `"1 hour"`, `"5 mins"`.
    pub bar_size: String,
    /// Lookback window, e.g. `"1 M"`, `"10 D"`, `"1 Y"`.
    pub duration: String,
    pub regular_trading_hours: bool,
}

impl BarRequest {
    pub fn new(symbol: impl Into<String>, bar_size: &str, duration: &str, rth: bool) -> Self {
        Self {
            symbol: symbol.into(),
            bar_size: bar_size.to_string(),
            duration: duration.to_string(),
            regular_trading_hours: rth,
        }
    }

    /// Spacing between consecutive bars.
    pub fn bar_step(&self) -> Result<chrono::Duration, SourceError> {
        let (n, unit) = split_amount(&self.bar_size)?;
        let unit_secs = match unit.to_ascii_lowercase().trim_end_matches('s') {
            "sec" => 1,
            "min" => MINUTE,
            "hour" => HOUR,
            "day" => DAY,
            "week" => 7 * DAY,
            "month" => 30 * DAY,
            _ => {
                return Err(SourceError::Malformed(format!(
                    "unsupported bar size '{}'",
                    self.bar_size
                )))
            }
        };
        scaled(n, unit_secs, &self.bar_size)
    }

    /// Length of the lookback window.
    pub fn lookback(&self) -> Result<chrono::Duration, SourceError> {
        let (n, unit) = split_amount(&self.duration)?;
        let unit_secs = match unit {
            "S" => 1,
            "D" => DAY,
            "W" => 7 * DAY,
            "M" => 30 * DAY,
            "Y" => 365 * DAY,
            _ => {
                return Err(SourceError::Malformed(format!(
                    "unsupported duration '{}'",
                    self.duration
                )))
            }
        };
        scaled(n, unit_secs, &self.duration)
    }

    /// Earliest timestamp of a window that ends at `end`.
    pub fn window_start(&self, end: NaiveDateTime) -> Result<NaiveDateTime, SourceError> {
        end.checked_sub_signed(self.lookback()?).ok_or_else(|| {
            SourceError::Malformed(format!(
                "duration '{}' reaches past the supported calendar range",
                self.duration
            ))
        })
    }
}

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

fn scaled(n: i64, unit_secs: i64, text: &str) -> Result<chrono::Duration, SourceError> {
    n.checked_mul(unit_secs)
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| SourceError::Malformed(format!("'{text}' is out of range")))
}

fn split_amount(text: &str) -> Result<(i64, &str), SourceError> {
    let malformed = || SourceError::Malformed(format!("expected '<count> <unit>', got '{text}'"));
    let mut parts = text.split_whitespace();
    let n: i64 = parts
        .next()
        .and_then(|n| n.parse().ok())
        .filter(|n| *n > 0)
        .ok_or_else(malformed)?;
    let unit = parts.next().ok_or_else(malformed)?;
    if parts.next().is_some() {
        return Err(malformed());
    }
    Ok((n, unit))
}

/// Interface to a bar producer.
///
/// `submit` must not block on delivery; bars arrive later through `handle`,
/// either as `append`* + `complete` or as a single `fulfill`, or the request
/// is resolved with `fail`.
pub trait BarSource: Send + Sync {
    fn name(&self) -> &str;

    fn submit(
        &self,
        id: RequestId,
        request: &BarRequest,
        handle: BridgeHandle,
    ) -> Result<(), SourceError>;

    /// Best-effort cancellation of an outstanding request.
    fn cancel(&self, id: RequestId);
}

/// Ids the bridge withdrew; producer threads poll it to stop early.
#[derive(Debug, Clone, Default)]
struct CancelSet(Arc<Mutex<HashSet<RequestId>>>);

impl CancelSet {
    fn insert(&self, id: RequestId) {
        self.0.lock().insert(id);
    }

    /// True (and forgets the id) if `id` was cancelled.
    fn take(&self, id: RequestId) -> bool {
        self.0.lock().remove(&id)
    }
}

// ── Synthetic ────────────────────────────────────────────────────────

const RTH_OPEN: (u32, u32) = (9, 30);
const RTH_CLOSE: (u32, u32) = (16, 0);
const MAX_SYNTHETIC_BARS: usize = 10_000;
/// Bar slots walked back from the window end. Covers the cap even when only
/// regular-hours weekday slots produce bars.
const MAX_SYNTHETIC_SLOTS: usize = 8 * MAX_SYNTHETIC_BARS;

/// Deterministic random-walk bars. The same symbol and request always
/// produce the same bars.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    end: NaiveDateTime,
    bar_delay: Duration,
    cancelled: CancelSet,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        let end = NaiveDate::from_ymd_opt(2024, 6, 28)
            .and_then(|d| d.and_hms_opt(16, 0, 0))
            .unwrap_or_default();
        Self::ending_at(end)
    }
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate windows that end at `end` instead of the default anchor.
    pub fn ending_at(end: NaiveDateTime) -> Self {
        Self {
            end,
            bar_delay: Duration::ZERO,
            cancelled: CancelSet::default(),
        }
    }

    /// Sleep between streamed bars, to mimic a slow upstream.
    pub fn with_bar_delay(mut self, delay: Duration) -> Self {
        self.bar_delay = delay;
        self
    }

    /// Produce the bars for `request` synchronously.
    pub fn generate(&self, request: &BarRequest) -> Result<Vec<Bar>, SourceError> {
        if !is_plausible_symbol(&request.symbol) {
            return Err(SourceError::SymbolNotFound(request.symbol.clone()));
        }
        let step = request.bar_step()?;
        let mut start = request.window_start(self.end)?;
        // Only the newest bars survive the cap; skip walking the rest.
        let earliest = i32::try_from(MAX_SYNTHETIC_SLOTS)
            .ok()
            .and_then(|slots| step.checked_mul(slots))
            .and_then(|span| self.end.checked_sub_signed(span));
        if let Some(earliest) = earliest {
            start = start.max(earliest);
        }
        let intraday = step < chrono::Duration::days(1);
        let rth_open = NaiveTime::from_hms_opt(RTH_OPEN.0, RTH_OPEN.1, 0).unwrap_or_default();
        let rth_close = NaiveTime::from_hms_opt(RTH_CLOSE.0, RTH_CLOSE.1, 0).unwrap_or_default();

        let mut rng = symbol_rng(&request.symbol);
        let mut bars = Vec::new();
        let mut price = 100.0_f64;
        let mut current = start;

        while current <= self.end {
            let weekday = current.weekday();
            let weekend = weekday == Weekday::Sat || weekday == Weekday::Sun;
            let outside_rth = intraday
                && request.regular_trading_hours
                && (current.time() < rth_open || current.time() >= rth_close);
            if !weekend && !outside_rth {
                let bar = random_walk_bar(&mut rng, current, price);
                price = bar.close;
                bars.push(bar);
            }
            match current.checked_add_signed(step) {
                Some(next) => current = next,
                None => break,
            }
        }

        if bars.len() > MAX_SYNTHETIC_BARS {
            bars.drain(..bars.len() - MAX_SYNTHETIC_BARS);
        }
        Ok(bars)
    }
}

fn is_plausible_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

fn symbol_rng(symbol: &str) -> rand::rngs::StdRng {
    use rand::SeedableRng;

    let seed: [u8; 32] = *blake3::hash(symbol.as_bytes()).as_bytes();
    rand::rngs::StdRng::from_seed(seed)
}

fn random_walk_bar(rng: &mut rand::rngs::StdRng, timestamp: NaiveDateTime, price: f64) -> Bar {
    use rand::Rng;

    let ret: f64 = rng.gen_range(-0.03..0.03);
    let open = price;
    let close = price * (1.0 + ret);
    let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
    let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
    let volume = rng.gen_range(500_000..5_000_000u64) as f64;
    Bar {
        timestamp,
        open,
        high,
        low,
        close,
        volume,
    }
}

impl BarSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn submit(
        &self,
        id: RequestId,
        request: &BarRequest,
        handle: BridgeHandle,
    ) -> Result<(), SourceError> {
        let bars = self.generate(request)?;
        let delay = self.bar_delay;
        let cancelled = self.cancelled.clone();
        let symbol = request.symbol.clone();

        std::thread::Builder::new()
            .name(format!("synthetic-{id}"))
            .spawn(move || {
                for bar in bars {
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    if cancelled.take(id) || !handle.append(id, bar) {
                        debug!(id, %symbol, "synthetic delivery abandoned");
                        return;
                    }
                }
                handle.complete(id);
            })
            .map_err(|e| SourceError::Unavailable(format!("cannot spawn producer: {e}")))?;
        Ok(())
    }

    fn cancel(&self, id: RequestId) {
        self.cancelled.insert(id);
    }
}

// ── CSV ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Reads `<dir>/<SYMBOL>.csv` with header
/// `timestamp,open,high,low,close,volume`.
///
/// Timestamps are `YYYY-MM-DD HH:MM:SS` or plain `YYYY-MM-DD`. Only rows
/// within the request's lookback of the last row are delivered.
#[derive(Debug, Clone)]
pub struct CsvSource {
    dir: PathBuf,
}

impl CsvSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.csv"))
    }

    /// Read and window the bars for `request` synchronously.
    pub fn read(&self, request: &BarRequest) -> Result<Vec<Bar>, SourceError> {
        let path = self.path_for(&request.symbol);
        let bars = read_csv(&path)?;
        let Some(last) = bars.last().map(|b| b.timestamp) else {
            return Ok(bars);
        };
        let cutoff = request.window_start(last)?;
        Ok(bars.into_iter().filter(|b| b.timestamp >= cutoff).collect())
    }
}

fn read_csv(path: &Path) -> Result<Vec<Bar>, SourceError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| SourceError::Unavailable(format!("{}: {e}", path.display())))?;
    let mut bars = Vec::new();
    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.map_err(|e| SourceError::Malformed(format!("{}: {e}", path.display())))?;
        let timestamp = parse_timestamp(row.timestamp.trim()).ok_or_else(|| {
            SourceError::Malformed(format!(
                "{} row {}: bad timestamp '{}'",
                path.display(),
                line + 1,
                row.timestamp
            ))
        })?;
        bars.push(Bar {
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }
    Ok(bars)
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl BarSource for CsvSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn submit(
        &self,
        id: RequestId,
        request: &BarRequest,
        handle: BridgeHandle,
    ) -> Result<(), SourceError> {
        if !is_plausible_symbol(&request.symbol) || !self.path_for(&request.symbol).is_file() {
            return Err(SourceError::SymbolNotFound(request.symbol.clone()));
        }
        let source = self.clone();
        let request = request.clone();

        std::thread::Builder::new()
            .name(format!("csv-{id}"))
            .spawn(move || {
                let delivered = match source.read(&request) {
                    Ok(bars) => handle.fulfill(id, bars),
                    Err(e) => handle.fail(id, e),
                };
                if !delivered {
                    warn!(id, symbol = %request.symbol, "csv delivery arrived after the request ended");
                }
            })
            .map_err(|e| SourceError::Unavailable(format!("cannot spawn producer: {e}")))?;
        Ok(())
    }

    fn cancel(&self, _id: RequestId) {
        // Reads are short and delivered in one piece; a late delivery is
        // discarded by the bridge.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn daily(duration: &str) -> BarRequest {
        BarRequest::new("AAPL", "1 day", duration, true)
    }

    #[test]
    fn parses_bar_sizes() {
        assert_eq!(daily("1 M").bar_step().unwrap(), chrono::Duration::days(1));
        let mut r = daily("1 M");
        r.bar_size = "5 mins".into();
        assert_eq!(r.bar_step().unwrap(), chrono::Duration::minutes(5));
        r.bar_size = "1 hour".into();
        assert_eq!(r.bar_step().unwrap(), chrono::Duration::hours(1));
        r.bar_size = "1 fortnight".into();
        assert!(matches!(r.bar_step(), Err(SourceError::Malformed(_))));
    }

    #[test]
    fn parses_durations() {
        assert_eq!(daily("1 M").lookback().unwrap(), chrono::Duration::days(30));
        assert_eq!(daily("2 W").lookback().unwrap(), chrono::Duration::days(14));
        assert_eq!(daily("1 Y").lookback().unwrap(), chrono::Duration::days(365));
        assert!(daily("0 D").lookback().is_err());
        assert!(daily("M").lookback().is_err());
        assert!(daily("1 M extra").lookback().is_err());
    }

    #[test]
    fn synthetic_is_deterministic_per_symbol() {
        let source = SyntheticSource::new();
        let a = source.generate(&daily("1 M")).unwrap();
        let b = source.generate(&daily("1 M")).unwrap();
        assert_eq!(a, b);
        let other = source
            .generate(&BarRequest::new("MSFT", "1 day", "1 M", true))
            .unwrap();
        assert_ne!(a[0].close, other[0].close);
    }

    #[test]
    fn synthetic_skips_weekends_and_stays_sane() {
        let bars = SyntheticSource::new().generate(&daily("1 M")).unwrap();
        assert!(bars.len() >= 20 && bars.len() <= 23, "got {}", bars.len());
        for b in &bars {
            assert!(!matches!(b.timestamp.weekday(), Weekday::Sat | Weekday::Sun));
            assert!(b.is_sane());
        }
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn synthetic_intraday_respects_regular_hours() {
        let request = BarRequest::new("AAPL", "1 hour", "5 D", true);
        let bars = SyntheticSource::new().generate(&request).unwrap();
        assert!(!bars.is_empty());
        for b in &bars {
            let t = b.timestamp.time();
            assert!(t >= NaiveTime::from_hms_opt(9, 30, 0).unwrap());
            assert!(t < NaiveTime::from_hms_opt(16, 0, 0).unwrap());
        }
    }

    #[test]
    fn synthetic_rejects_garbage_symbols() {
        let request = BarRequest::new("NOT A SYMBOL", "1 day", "1 M", true);
        assert!(matches!(
            SyntheticSource::new().generate(&request),
            Err(SourceError::SymbolNotFound(_))
        ));
    }

    #[test]
    fn parses_both_timestamp_shapes() {
        assert!(parse_timestamp("2024-01-02 09:30:00").is_some());
        assert!(parse_timestamp("2024-01-02").is_some());
        assert!(parse_timestamp("02/01/2024").is_none());
    }

    proptest! {
        #[test]
        fn day_counts_scale_linearly(n in 1i64..2000) {
            let request = daily(&format!("{n} D"));
            prop_assert_eq!(request.lookback().unwrap(), chrono::Duration::days(n));
            let request = daily(&format!("{n} W"));
            prop_assert_eq!(request.lookback().unwrap(), chrono::Duration::weeks(n));
        }

        #[test]
        fn synthetic_bars_are_sane_for_any_symbol(symbol in "[A-Z]{1,5}") {
            let bars = SyntheticSource::new()
                .generate(&BarRequest::new(symbol, "1 day", "3 M", true))
                .unwrap();
            prop_assert!(!bars.is_empty());
            prop_assert!(bars.iter().all(Bar::is_sane));
        }
    }

    #[test]
    fn oversized_counts_are_malformed_not_panics() {
        for duration in ["1000000 Y", "9223372036854775807 S", "999999999999 D"] {
            assert!(matches!(
                daily(duration).window_start(SyntheticSource::new().end),
                Err(SourceError::Malformed(_))
            ));
            assert!(matches!(
                SyntheticSource::new().generate(&daily(duration)),
                Err(SourceError::Malformed(_))
            ));
        }
        let mut r = daily("1 M");
        r.bar_size = "9223372036854775807 months".into();
        assert!(matches!(r.bar_step(), Err(SourceError::Malformed(_))));
    }

    #[test]
    fn huge_bar_size_yields_at_most_one_bar() {
        let request = BarRequest::new("AAPL", "100000000 weeks", "1 M", true);
        let bars = SyntheticSource::new().generate(&request).unwrap();
        assert!(bars.len() <= 1);
    }

    #[test]
    fn capped_window_keeps_the_newest_bars() {
        let source = SyntheticSource::new();
        let request = BarRequest::new("AAPL", "1 secs", "1 D", false);
        let bars = source.generate(&request).unwrap();
        assert_eq!(bars.len(), MAX_SYNTHETIC_BARS);
        let last = bars.last().unwrap().timestamp;
        assert_eq!(last, source.end);
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn cancel_set_forgets_after_take() {
        let set = CancelSet::default();
        set.insert(4);
        assert!(set.take(4));
        assert!(!set.take(4));
    }
}
