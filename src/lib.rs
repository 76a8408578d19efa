pub mod config;
pub mod deployment;
pub mod error;
pub mod events;
pub mod query;
pub mod rpc;
pub mod scanner;
pub mod state;

#[cfg(test)]
mod test_utils;

pub use error::{ScanError, ScanResult};
pub use events::{EventArgs, EventKind, RawEvent, TransactionDetails};
pub use scanner::{
    ChainSource, ChunkSizeEstimator, EventFilter, EventScanner, RetryingRangeFetcher,
    ScanProgress, ScannerConfig,
};
pub use state::ScanStateStore;
