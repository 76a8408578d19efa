use super::ScanStateStore;
use super::cursor_repository::CursorRepository;
use super::database::Database;
use super::models::{TransferRecord, records_from_event};
use super::transfer_repository::TransferRepository;
use crate::events::RawEvent;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Scan state in SQLite, one cursor row per partition.
///
/// Records of the open chunk are held in memory and written by `end_chunk` in the same
/// transaction that moves the cursor, so records and cursor land together or not at all.
/// No write lock is held while the chunk is being fetched, which lets several partitions
/// share one database file.
pub struct SqliteStateStore {
    db: Database,
    partition: String,
    pending: Vec<TransferRecord>,
}

impl SqliteStateStore {
    pub fn new(db: Database, partition: impl Into<String>) -> Self {
        Self {
            db,
            partition: partition.into(),
            pending: Vec::new(),
        }
    }

    pub fn open(database_url: &str, partition: impl Into<String>) -> Result<Self> {
        Ok(Self::new(Database::new(database_url)?, partition))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Committed records of this partition.
    pub fn transfers(&self) -> Result<Vec<TransferRecord>> {
        TransferRepository::new(&self.db.conn).all_transfers(&self.partition)
    }

    fn discard_open_chunk(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                "Discarding {} uncommitted records of partition {}",
                self.pending.len(),
                self.partition
            );
            self.pending.clear();
        }
    }
}

impl ScanStateStore for SqliteStateStore {
    fn get_last_scanned_block(&self) -> Result<u64> {
        let block = CursorRepository::new(&self.db.conn).get_last_scanned_block(&self.partition)?;
        Ok(block.unwrap_or(0))
    }

    fn start_chunk(&mut self, block_number: u64, chunk_size: u64) -> Result<()> {
        self.discard_open_chunk();
        debug!(
            "Opening chunk at block {} ({} blocks) for partition {}",
            block_number, chunk_size, self.partition
        );
        Ok(())
    }

    fn end_chunk(&mut self, block_number: u64) -> Result<()> {
        let tx = self
            .db
            .conn
            .unchecked_transaction()
            .context("Failed to open chunk transaction")?;
        TransferRepository::new(&tx).upsert(&self.partition, &self.pending)?;
        CursorRepository::new(&tx).advance_last_scanned_block(&self.partition, block_number)?;
        tx.commit().context("Failed to commit chunk")?;

        self.pending.clear();
        Ok(())
    }

    fn process_event(&mut self, timestamp: Option<DateTime<Utc>>, event: &RawEvent) -> Result<String> {
        let (key, records) = records_from_event(timestamp, event)?;
        self.pending.extend(records);
        Ok(key.to_string())
    }

    fn delete_data(&mut self, since_block: u64) -> Result<usize> {
        self.discard_open_chunk();

        let tx = self.db.conn.unchecked_transaction()?;
        let deleted = TransferRepository::new(&tx).delete_since(&self.partition, since_block)?;
        CursorRepository::new(&tx)
            .lower_last_scanned_block(&self.partition, since_block.saturating_sub(1))?;
        tx.commit()?;

        info!(
            "Deleted {} records at or after block {} from partition {}",
            deleted, since_block, self.partition
        );
        Ok(deleted)
    }
}
