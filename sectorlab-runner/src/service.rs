//! Analysis service: one historical-data request in, one response out.
//!
//! Symbols are fetched concurrently through the [`DataBridge`]; the
//! CPU-bound pipeline for each symbol runs on a private rayon pool so the
//! async scheduler never blocks on clustering or density work.

use std::sync::Arc;

use futures::future::join_all;
use sectorlab_core::config::{AppConfig, DataRequestConfig};
use sectorlab_core::{AnalysisError, AnalysisResult, StrategyConfig};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeError, DataBridge};
use crate::protocol::{HistoricalDataRequest, HistoricalDataResponse, SymbolReport};
use crate::source::{BarRequest, BarSource};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("no valid data received for {symbol}")]
    NoData { symbol: String },

    #[error("worker pool: {0}")]
    WorkerPool(String),

    #[error("analysis worker for {symbol} exited without a result")]
    WorkerLost { symbol: String },
}

pub struct AnalysisService {
    bridge: DataBridge,
    pool: rayon::ThreadPool,
    strategy: Arc<StrategyConfig>,
    defaults: DataRequestConfig,
}

impl AnalysisService {
    /// Build a service over `source` using an already validated config.
    pub fn new(source: Arc<dyn BarSource>, config: &AppConfig) -> Result<Self, ServiceError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.threads)
            .thread_name(|i| format!("sectorlab-pool-{i}"))
            .build()
            .map_err(|e| ServiceError::WorkerPool(e.to_string()))?;

        Ok(Self {
            bridge: DataBridge::new(source, config.data_request.request_timeout()),
            pool,
            strategy: Arc::new(config.strategy.clone()),
            defaults: config.data_request.clone(),
        })
    }

    pub fn bridge(&self) -> &DataBridge {
        &self.bridge
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Analyze every ticker in `request`. Per-symbol failures are reported in
    /// that symbol's entry; the response itself always succeeds.
    pub async fn handle(&self, request: &HistoricalDataRequest) -> HistoricalDataResponse {
        let symbols = request.unique_tickers();
        info!(
            symbols = symbols.len(),
            source = self.bridge.source_name(),
            "handling historical data request"
        );

        let results = join_all(symbols.iter().map(|symbol| {
            let bar_request = request.bar_request(symbol, &self.defaults);
            async move {
                match self.analyze_symbol(&bar_request).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(symbol = %bar_request.symbol, error = %e, "symbol failed");
                        AnalysisResult::failed(&bar_request.symbol, e)
                    }
                }
            }
        }))
        .await;

        let mut response = HistoricalDataResponse::new(request.tickers.clone());
        for result in &results {
            response.insert(SymbolReport::from(result));
        }
        response
    }

    /// Fetch and analyze one symbol.
    ///
    /// Analysis errors are folded into the returned result; only data
    /// acquisition and worker failures surface as `Err`.
    pub async fn analyze_symbol(&self, request: &BarRequest) -> Result<AnalysisResult, ServiceError> {
        let bars = self.bridge.request(request).await?;
        if bars.is_empty() {
            return Err(ServiceError::NoData {
                symbol: request.symbol.clone(),
            });
        }
        debug!(symbol = %request.symbol, bars = bars.len(), "bars received");

        let (tx, rx) = oneshot::channel();
        let strategy = Arc::clone(&self.strategy);
        let symbol = request.symbol.clone();
        self.pool.spawn(move || {
            let result = AnalysisResult::run(&symbol, bars, &strategy);
            // The caller may have been dropped meanwhile.
            let _ = tx.send(result);
        });

        rx.await.map_err(|_| ServiceError::WorkerLost {
            symbol: request.symbol.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SyntheticSource;

    #[test]
    fn pool_size_follows_config() {
        let mut config = AppConfig::default();
        config.workers.threads = 3;
        let service = AnalysisService::new(Arc::new(SyntheticSource::new()), &config).unwrap();
        assert_eq!(service.worker_threads(), 3);
    }

    #[test]
    fn private_pool_leaves_global_pool_alone() {
        let before = rayon::current_num_threads();
        let _service =
            AnalysisService::new(Arc::new(SyntheticSource::new()), &AppConfig::default()).unwrap();
        assert_eq!(rayon::current_num_threads(), before);
    }

    #[tokio::test]
    async fn empty_delivery_is_reported_as_no_data() {
        // Saturday noon back to Sunday noon: nothing but weekend.
        let sunday = chrono::NaiveDate::from_ymd_opt(2024, 6, 30)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let source = SyntheticSource::ending_at(sunday);
        let service = AnalysisService::new(Arc::new(source), &AppConfig::default()).unwrap();
        let request = BarRequest::new("AAPL", "1 day", "1 D", true);
        let err = service.analyze_symbol(&request).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoData { .. }), "got {err:?}");
    }
}
