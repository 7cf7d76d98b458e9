//! DataBridge: turns a callback-style bar source into awaitable requests.
//!
//! The source delivers on its own OS thread, one bar at a time or all at
//! once. Each request is registered in a single mutex-guarded correlation
//! table, keyed by request id with a per-symbol index, and resolved through
//! a one-shot completion slot. The lock is only held for table mutations,
//! never across an await point and never while calling into the source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sectorlab_core::domain::Bar;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::source::{BarRequest, BarSource, SourceError};

/// Correlation key shared with the source.
pub type RequestId = u64;

type Delivery = Result<Vec<Bar>, SourceError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("a request for {symbol} is already outstanding")]
    ConcurrentRequest { symbol: String },

    #[error("no data received for {symbol} within {after:?}")]
    Timeout { symbol: String, after: Duration },

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// One outstanding request: its symbol, the bars received so far and the
/// slot that resolves the awaiting caller.
#[derive(Debug)]
pub struct PendingRequest {
    id: RequestId,
    symbol: String,
    bars: Vec<Bar>,
    completion: oneshot::Sender<Delivery>,
    submitted_at: Instant,
}

impl PendingRequest {
    fn new(id: RequestId, symbol: String, completion: oneshot::Sender<Delivery>) -> Self {
        Self {
            id,
            symbol,
            bars: Vec::new(),
            completion,
            submitted_at: Instant::now(),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars_received(&self) -> usize {
        self.bars.len()
    }

    pub fn age(&self) -> Duration {
        self.submitted_at.elapsed()
    }

    /// Resolve the caller. Returns false when the caller has already gone.
    fn resolve(self, delivery: Delivery) -> bool {
        self.completion.send(delivery).is_ok()
    }
}

#[derive(Debug, Default)]
struct Table {
    by_id: HashMap<RequestId, PendingRequest>,
    by_symbol: HashMap<String, RequestId>,
}

impl Table {
    fn remove(&mut self, id: RequestId) -> Option<PendingRequest> {
        let entry = self.by_id.remove(&id)?;
        if self.by_symbol.get(&entry.symbol) == Some(&id) {
            self.by_symbol.remove(&entry.symbol);
        }
        Some(entry)
    }
}

/// Producer-side handle. Cheap to clone and safe to use from any thread.
///
/// Every method returns `false` when `id` is no longer pending (timed out,
/// cancelled or already completed); the delivery is discarded.
#[derive(Debug, Clone, Default)]
pub struct BridgeHandle {
    table: Arc<Mutex<Table>>,
}

impl BridgeHandle {
    /// Deliver a complete bar sequence, appended after any bars already
    /// streamed for this request.
    pub fn fulfill(&self, id: RequestId, bars: Vec<Bar>) -> bool {
        let entry = self.table.lock().remove(id);
        match entry {
            Some(mut entry) => {
                entry.bars.extend(bars);
                let bars = std::mem::take(&mut entry.bars);
                debug!(id, symbol = %entry.symbol, bars = bars.len(), "request fulfilled");
                entry.resolve(Ok(bars))
            }
            None => {
                warn!(id, "discarding late delivery");
                false
            }
        }
    }

    /// Resolve the request with a source error.
    pub fn fail(&self, id: RequestId, error: SourceError) -> bool {
        let entry = self.table.lock().remove(id);
        match entry {
            Some(entry) => {
                debug!(id, symbol = %entry.symbol, %error, "request failed");
                entry.resolve(Err(error))
            }
            None => {
                warn!(id, %error, "discarding late failure");
                false
            }
        }
    }

    /// Buffer one bar for a streaming delivery.
    pub fn append(&self, id: RequestId, bar: Bar) -> bool {
        match self.table.lock().by_id.get_mut(&id) {
            Some(entry) => {
                entry.bars.push(bar);
                true
            }
            None => false,
        }
    }

    /// End marker of a streaming delivery: hands the buffered bars over.
    pub fn complete(&self, id: RequestId) -> bool {
        self.fulfill(id, Vec::new())
    }

    pub fn pending_count(&self) -> usize {
        self.table.lock().by_id.len()
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.table.lock().by_id.contains_key(&id)
    }

    fn register(&self, entry: PendingRequest) -> Result<(), BridgeError> {
        let mut table = self.table.lock();
        if table.by_symbol.contains_key(&entry.symbol) {
            return Err(BridgeError::ConcurrentRequest {
                symbol: entry.symbol,
            });
        }
        table.by_symbol.insert(entry.symbol.clone(), entry.id);
        table.by_id.insert(entry.id, entry);
        Ok(())
    }

    fn remove(&self, id: RequestId) -> Option<PendingRequest> {
        self.table.lock().remove(id)
    }
}

/// Awaitable front of a [`BarSource`].
pub struct DataBridge {
    source: Arc<dyn BarSource>,
    handle: BridgeHandle,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl DataBridge {
    pub fn new(source: Arc<dyn BarSource>, request_timeout: Duration) -> Self {
        Self {
            source,
            handle: BridgeHandle::default(),
            next_id: AtomicU64::new(1),
            request_timeout,
        }
    }

    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn pending_count(&self) -> usize {
        self.handle.pending_count()
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.handle.is_pending(id)
    }

    /// Fetch the bars described by `request`.
    ///
    /// Fails fast with [`BridgeError::ConcurrentRequest`] when the symbol
    /// already has a request in flight. Dropping the returned future
    /// withdraws the request and asks the source to cancel it.
    pub async fn request(&self, request: &BarRequest) -> Result<Vec<Bar>, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.handle
            .register(PendingRequest::new(id, request.symbol.clone(), tx))?;

        let _guard = PendingGuard { bridge: self, id };
        debug!(id, symbol = %request.symbol, source = self.source.name(), "submitting request");
        self.source.submit(id, request, self.handle.clone())?;

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(delivery)) => Ok(delivery?),
            Ok(Err(_)) => Err(SourceError::Unavailable(format!(
                "delivery channel for {} closed",
                request.symbol
            ))
            .into()),
            Err(_) => {
                warn!(id, symbol = %request.symbol, after = ?self.request_timeout, "request timed out");
                Err(BridgeError::Timeout {
                    symbol: request.symbol.clone(),
                    after: self.request_timeout,
                })
            }
        }
    }
}

/// Removes the table entry on every exit path from `request`, including the
/// future being dropped. The source is only asked to cancel when the entry
/// was still pending.
struct PendingGuard<'a> {
    bridge: &'a DataBridge,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.bridge.handle.remove(self.id) {
            debug!(id = self.id, symbol = %entry.symbol, "withdrawing request");
            drop(entry);
            self.bridge.source.cancel(self.id);
        }
    }
}
