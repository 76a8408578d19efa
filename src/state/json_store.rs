use super::ScanStateStore;
use super::models::{TransferRecord, records_from_event};
use crate::events::RawEvent;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Records of one block, by transaction hash, then log index.
type BlockRecords = BTreeMap<String, BTreeMap<u64, Vec<TransferRecord>>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct JsonState {
    last_scanned_block: u64,
    blocks: BTreeMap<u64, BlockRecords>,
}

/// Whole scan state kept in memory and mirrored to a JSON file.
///
/// The file is rewritten on `end_chunk` once `save_interval` has passed since the last save.
/// With the default interval of zero every chunk is saved before `end_chunk` returns.
pub struct JsonStateStore {
    path: PathBuf,
    state: JsonState,
    save_interval: Duration,
    last_save: Option<Instant>,
}

impl JsonStateStore {
    /// Restores the state from `path`, or starts empty if the file is missing or unreadable.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match Self::restore(&path) {
            Ok(state) => {
                info!(
                    "Restored scan state from {}, previously scanned up to block {}",
                    path.display(),
                    state.last_scanned_block
                );
                state
            }
            Err(e) => {
                warn!(
                    "Starting scan state from scratch, could not restore {}: {:#}",
                    path.display(),
                    e
                );
                JsonState::default()
            }
        };

        Self {
            path,
            state,
            save_interval: Duration::ZERO,
            last_save: None,
        }
    }

    pub fn with_save_interval(mut self, save_interval: Duration) -> Self {
        self.save_interval = save_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn restore(path: &Path) -> Result<JsonState> {
        let contents = fs::read_to_string(path)?;
        let state = serde_json::from_str(&contents)?;
        Ok(state)
    }

    /// Writes the state to a sibling temp file, then renames it over the target.
    pub fn save(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let contents = serde_json::to_vec(&self.state)?;
        fs::write(&tmp_path, contents)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        self.last_save = Some(Instant::now());
        Ok(())
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.state
            .blocks
            .values()
            .flat_map(|block| block.values())
            .flat_map(|tx| tx.values())
            .flatten()
            .cloned()
            .collect()
    }

    fn save_due(&self) -> bool {
        match self.last_save {
            Some(at) => at.elapsed() >= self.save_interval,
            None => true,
        }
    }
}

impl ScanStateStore for JsonStateStore {
    fn get_last_scanned_block(&self) -> Result<u64> {
        Ok(self.state.last_scanned_block)
    }

    fn start_chunk(&mut self, _block_number: u64, _chunk_size: u64) -> Result<()> {
        Ok(())
    }

    fn end_chunk(&mut self, block_number: u64) -> Result<()> {
        self.state.last_scanned_block = self.state.last_scanned_block.max(block_number);

        if self.save_due() {
            self.save()?;
        }
        Ok(())
    }

    fn process_event(&mut self, timestamp: Option<DateTime<Utc>>, event: &RawEvent) -> Result<String> {
        let (key, records) = records_from_event(timestamp, event)?;

        self.state
            .blocks
            .entry(key.block_number)
            .or_default()
            .entry(format!("{:?}", key.transaction_hash))
            .or_default()
            .insert(key.log_index, records);

        Ok(key.to_string())
    }

    fn delete_data(&mut self, since_block: u64) -> Result<usize> {
        let removed = self.state.blocks.split_off(&since_block);
        let deleted = removed
            .values()
            .flat_map(|block| block.values())
            .flat_map(|tx| tx.values())
            .map(Vec::len)
            .sum();

        let floor = since_block.saturating_sub(1);
        if self.state.last_scanned_block > floor {
            self.state.last_scanned_block = floor;
        }

        // The lowered cursor must be on disk before rescanning starts
        self.save()?;
        Ok(deleted)
    }
}
