use alloy_primitives::B256;
use thiserror::Error;

/// Phase of a chunk in which the state store failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePhase {
    StartChunk,
    ProcessEvent,
    EndChunk,
    DeleteData,
    ReadCursor,
}

impl std::fmt::Display for StorePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StorePhase::StartChunk => "start_chunk",
            StorePhase::ProcessEvent => "process_event",
            StorePhase::EndChunk => "end_chunk",
            StorePhase::DeleteData => "delete_data",
            StorePhase::ReadCursor => "get_last_scanned_block",
        };
        f.write_str(name)
    }
}

/// Errors returned by the event scanner.
///
/// Every variant is terminal for the running scan. The cursor of the state store is left at
/// the last committed chunk, so a new scan resumes from there.
#[derive(Error, Debug)]
pub enum ScanError {
    /// `start_block` is past `end_block`.
    #[error("Invalid block range: start {start} is after end {end}")]
    InvalidRange { start: u64, end: u64 },

    /// A scanner parameter is out of bounds.
    #[error("Invalid scanner configuration: {0}")]
    InvalidConfig(String),

    /// Every attempt of a range query failed. `start..=end` is the narrowest window tried.
    #[error("Log query for blocks {start}-{end} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        start: u64,
        end: u64,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The node returned a log without a log index, i.e. from a block that is not mined yet.
    #[error("Pending log in block {block_number} (tx {transaction_hash}) returned for a confirmed range")]
    PendingLog {
        block_number: u64,
        transaction_hash: B256,
    },

    /// The state store failed. Not retried, the write may have partially applied.
    #[error("State store failed in {phase} for blocks {start}-{end}: {source}")]
    Store {
        phase: StorePhase,
        start: u64,
        end: u64,
        #[source]
        source: anyhow::Error,
    },

    /// A chain head or block timestamp lookup failed.
    #[error("RPC error: {0}")]
    Rpc(#[source] anyhow::Error),
}

pub type ScanResult<T> = Result<T, ScanError>;
