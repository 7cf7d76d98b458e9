//! SectorLab Runner: request orchestration around `sectorlab-core`.
//!
//! This crate provides:
//! - The data bridge correlating async requests with threaded bar delivery
//! - Bar sources (synthetic random walk, CSV directory)
//! - The analysis service running symbols concurrently on a bounded pool
//! - JSON request/response message types

pub mod bridge;
pub mod protocol;
pub mod service;
pub mod source;

pub use bridge::{BridgeError, BridgeHandle, DataBridge, PendingRequest, RequestId};
pub use protocol::{
    ClientMessage, HistoricalDataRequest, HistoricalDataResponse, SectorReport, SymbolData,
    SymbolReport,
};
pub use service::{AnalysisService, ServiceError};
pub use source::{BarRequest, BarSource, CsvSource, SourceError, SyntheticSource};
