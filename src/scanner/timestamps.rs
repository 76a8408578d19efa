use crate::error::{ScanError, ScanResult};
use crate::scanner::source::ChainSource;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Block timestamps looked up during one chunk.
///
/// Several events usually share a block, so each block is requested at most once. Unknown
/// blocks are cached as `None` too. Dropped when the chunk ends.
#[derive(Debug, Default)]
pub struct BlockTimestampCache {
    timestamps: HashMap<u64, Option<DateTime<Utc>>>,
}

impl BlockTimestampCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get<S: ChainSource + ?Sized>(
        &mut self,
        source: &S,
        block_number: u64,
    ) -> ScanResult<Option<DateTime<Utc>>> {
        if let Some(cached) = self.timestamps.get(&block_number) {
            return Ok(*cached);
        }

        let timestamp = source
            .block_timestamp(block_number)
            .await
            .map_err(ScanError::Rpc)?;
        self.timestamps.insert(block_number, timestamp);
        Ok(timestamp)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
