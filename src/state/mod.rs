//! Durable scan state: the cursor and the recorded transfer events.

pub mod cursor_repository;
pub mod database;
pub mod json_store;
pub mod models;
pub mod sqlite_store;
pub mod transfer_repository;

pub use cursor_repository::CursorRepository;
pub use database::Database;
pub use json_store::JsonStateStore;
pub use models::{Contract, EventKey, TransferRecord, records_from_event};
pub use sqlite_store::SqliteStateStore;
pub use transfer_repository::{TransferFilter, TransferRepository, TransferStats};

use crate::events::RawEvent;
use anyhow::Result;
use chrono::{DateTime, Utc};

/// What the scanner needs from persistent storage.
///
/// Implementations must:
/// - overwrite, never duplicate, when the same `(block, tx, log_index)` is processed again;
/// - not return from `end_chunk` before the new cursor survives a crash;
/// - make `delete_data(n)` drop every record at block `n` or later and lower the cursor
///   below `n`.
pub trait ScanStateStore {
    /// Last block recorded by a previous scan, 0 if nothing was scanned yet.
    fn get_last_scanned_block(&self) -> Result<u64>;

    /// The scanner is about to fetch a chunk starting at `block_number`.
    fn start_chunk(&mut self, block_number: u64, chunk_size: u64) -> Result<()>;

    /// All events up to and including `block_number` were processed.
    fn end_chunk(&mut self, block_number: u64) -> Result<()>;

    /// Records one event and returns a reference to it.
    fn process_event(&mut self, timestamp: Option<DateTime<Utc>>, event: &RawEvent) -> Result<String>;

    /// Purges data of possibly reorganised blocks. Returns the number of records removed.
    fn delete_data(&mut self, since_block: u64) -> Result<usize>;
}

impl<T: ScanStateStore + ?Sized> ScanStateStore for Box<T> {
    fn get_last_scanned_block(&self) -> Result<u64> {
        (**self).get_last_scanned_block()
    }

    fn start_chunk(&mut self, block_number: u64, chunk_size: u64) -> Result<()> {
        (**self).start_chunk(block_number, chunk_size)
    }

    fn end_chunk(&mut self, block_number: u64) -> Result<()> {
        (**self).end_chunk(block_number)
    }

    fn process_event(&mut self, timestamp: Option<DateTime<Utc>>, event: &RawEvent) -> Result<String> {
        (**self).process_event(timestamp, event)
    }

    fn delete_data(&mut self, since_block: u64) -> Result<usize> {
        (**self).delete_data(since_block)
    }
}
