//! Chunked, resumable scanning of historical event logs.
//!
//! [`EventScanner`] walks a block range in windows sized by [`ChunkSizeEstimator`], fetches
//! each window through [`RetryingRangeFetcher`] and records events in a [`ScanStateStore`],
//! committing the store's cursor after every window.

pub mod chunk;
pub mod partition;
pub mod retry;
pub mod source;
pub mod timestamps;
pub mod transactions;

pub use chunk::ChunkSizeEstimator;
pub use partition::{Partition, PartitionReport, scan_partitions};
pub use retry::RetryingRangeFetcher;
pub use source::{ChainSource, EventFilter};
pub use timestamps::BlockTimestampCache;
pub use transactions::TransactionCache;

use crate::error::{ScanError, ScanResult, StorePhase};
use crate::events::RawEvent;
use crate::state::ScanStateStore;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const DEFAULT_REORG_SAFETY_BLOCKS: u64 = 10;
pub const DEFAULT_INITIAL_CHUNK_SIZE: u64 = 20;
pub const DEFAULT_START_BLOCK_FLOOR: u64 = 1;

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub min_chunk_size: u64,
    pub max_chunk_size: u64,
    pub chunk_size_increase_factor: f64,
    pub max_request_retries: u32,
    pub request_retry_delay: Duration,
    pub reorg_safety_blocks: u64,
    pub initial_chunk_size: u64,
    /// Lowest block a resumed scan starts from, e.g. the contract's deployment block.
    pub start_block_floor: u64,
    /// Look up value, gas and gas price of every transaction that emitted an event.
    pub fetch_transaction_details: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: chunk::DEFAULT_MIN_CHUNK_SIZE,
            max_chunk_size: chunk::DEFAULT_MAX_CHUNK_SIZE,
            chunk_size_increase_factor: chunk::DEFAULT_CHUNK_SIZE_INCREASE_FACTOR,
            max_request_retries: retry::DEFAULT_MAX_REQUEST_RETRIES,
            request_retry_delay: retry::DEFAULT_REQUEST_RETRY_DELAY,
            reorg_safety_blocks: DEFAULT_REORG_SAFETY_BLOCKS,
            initial_chunk_size: DEFAULT_INITIAL_CHUNK_SIZE,
            start_block_floor: DEFAULT_START_BLOCK_FLOOR,
            fetch_transaction_details: true,
        }
    }
}

/// Reported once per chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanProgress {
    pub scan_start: u64,
    pub scan_end: u64,
    pub chunk_start: u64,
    pub chunk_end: u64,
    pub chunk_end_timestamp: Option<DateTime<Utc>>,
    pub chunk_size: u64,
    pub events_in_chunk: usize,
}

impl ScanProgress {
    /// Blocks of the overall range covered so far.
    pub fn blocks_done(&self) -> u64 {
        self.chunk_end.saturating_sub(self.scan_start) + 1
    }

    pub fn blocks_total(&self) -> u64 {
        self.scan_end - self.scan_start + 1
    }

    pub fn describe(&self) -> String {
        let block_time = match self.chunk_end_timestamp {
            Some(ts) => ts.format("%d-%m-%Y").to_string(),
            None => "no block time available".to_string(),
        };
        format!(
            "Current block: {} ({}), blocks in a scan batch: {}, events processed in a batch {}, {}/{} blocks",
            self.chunk_start,
            block_time,
            self.chunk_size,
            self.events_in_chunk,
            self.blocks_done(),
            self.blocks_total()
        )
    }
}

/// Result of scanning one chunk.
#[derive(Debug)]
pub struct ChunkOutcome {
    pub end_block: u64,
    pub end_block_timestamp: Option<DateTime<Utc>>,
    pub processed: Vec<String>,
}

pub type ProgressCallback<'a> = &'a mut (dyn FnMut(&ScanProgress) + Send);

pub struct EventScanner<C, S> {
    chain: C,
    store: S,
    filters: Vec<EventFilter>,
    fetcher: RetryingRangeFetcher,
    estimator: ChunkSizeEstimator,
    reorg_safety_blocks: u64,
    initial_chunk_size: u64,
    start_block_floor: u64,
    fetch_transaction_details: bool,
}

impl<C, S> EventScanner<C, S>
where
    C: ChainSource,
    S: ScanStateStore,
{
    pub fn new(
        chain: C,
        store: S,
        filters: Vec<EventFilter>,
        config: &ScannerConfig,
    ) -> ScanResult<Self> {
        if filters.is_empty() {
            return Err(ScanError::InvalidConfig(
                "at least one event filter is required".to_string(),
            ));
        }

        let estimator = ChunkSizeEstimator::new(
            config.min_chunk_size,
            config.max_chunk_size,
            config.chunk_size_increase_factor,
        )?;

        Ok(EventScanner {
            chain,
            store,
            filters,
            fetcher: RetryingRangeFetcher::new(
                config.max_request_retries,
                config.request_retry_delay,
            ),
            estimator,
            reorg_safety_blocks: config.reorg_safety_blocks,
            initial_chunk_size: config.initial_chunk_size,
            start_block_floor: config.start_block_floor,
            fetch_transaction_details: config.fetch_transaction_details,
        })
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn initial_chunk_size(&self) -> u64 {
        self.initial_chunk_size
    }

    pub fn get_last_scanned_block(&self) -> ScanResult<u64> {
        self.store
            .get_last_scanned_block()
            .map_err(|source| ScanError::Store {
                phase: StorePhase::ReadCursor,
                start: 0,
                end: 0,
                source,
            })
    }

    /// Where a resumed scan should start.
    ///
    /// The last `reorg_safety_blocks` already scanned are scanned again, so data of blocks
    /// replaced by a shallow reorg gets overwritten. Never below `start_block_floor`.
    pub fn get_suggested_scan_start_block(&self) -> ScanResult<u64> {
        let last_scanned = self.get_last_scanned_block()?;
        if last_scanned == 0 {
            return Ok(self.start_block_floor);
        }
        Ok(last_scanned
            .saturating_sub(self.reorg_safety_blocks)
            .max(self.start_block_floor))
    }

    /// The head block may not be final yet, so scanning stops one block short of it.
    pub async fn get_suggested_scan_end_block(&self) -> ScanResult<u64> {
        let latest = self.chain.latest_block().await.map_err(ScanError::Rpc)?;
        Ok(latest.saturating_sub(1))
    }

    pub fn delete_potentially_forked_block_data(&mut self, since_block: u64) -> ScanResult<usize> {
        self.store
            .delete_data(since_block)
            .map_err(|source| ScanError::Store {
                phase: StorePhase::DeleteData,
                start: since_block,
                end: since_block,
                source,
            })
    }

    /// Purges the reorg-unsafe tail and returns the range still to scan, if any.
    pub async fn prepare_resume(&mut self) -> ScanResult<Option<(u64, u64)>> {
        let last_scanned = self.get_last_scanned_block()?;
        let start = self.get_suggested_scan_start_block()?;
        let end = self.get_suggested_scan_end_block().await?;

        if last_scanned > 0 && start <= last_scanned {
            self.delete_potentially_forked_block_data(start)?;
        }

        if start > end {
            debug!("Nothing to scan, start {} is past end {}", start, end);
            return Ok(None);
        }
        Ok(Some((start, end)))
    }

    /// Fetches and records every filter's events in `start_block..=end_block`.
    ///
    /// If a filter's query had to be narrowed, the whole chunk ends where that query ended.
    pub async fn scan_chunk(&mut self, start_block: u64, end_block: u64) -> ScanResult<ChunkOutcome> {
        let mut end_block = end_block;
        let mut events: Vec<RawEvent> = Vec::new();

        for filter in &self.filters {
            let (actual_end, found) = self
                .fetcher
                .fetch(&self.chain, filter, start_block, end_block)
                .await?;

            if actual_end < end_block {
                debug!(
                    "Chunk narrowed from {}-{} to {}-{} by {} query",
                    start_block,
                    end_block,
                    start_block,
                    actual_end,
                    filter.name()
                );
                end_block = actual_end;
                events.retain(|e| e.block_number <= end_block);
            }
            events.extend(found);
        }

        let mut timestamps = BlockTimestampCache::new();
        let mut transactions = TransactionCache::new();
        let mut processed = Vec::with_capacity(events.len());

        for event in &mut events {
            // We cannot avoid minor reorgs, but logs of blocks not mined yet must never get in
            if event.is_pending() {
                return Err(ScanError::PendingLog {
                    block_number: event.block_number,
                    transaction_hash: event.transaction_hash,
                });
            }

            let block_when = timestamps.get(&self.chain, event.block_number).await?;
            if self.fetch_transaction_details {
                event.transaction = transactions.get(&self.chain, event.transaction_hash).await?;
            }

            debug!(
                "Processing event {}, block: {} log index: {:?}",
                event.event_name, event.block_number, event.log_index
            );
            let reference = self
                .store
                .process_event(block_when, &*event)
                .map_err(|source| ScanError::Store {
                    phase: StorePhase::ProcessEvent,
                    start: start_block,
                    end: end_block,
                    source,
                })?;
            processed.push(reference);
        }

        let end_block_timestamp = timestamps.get(&self.chain, end_block).await?;

        Ok(ChunkOutcome {
            end_block,
            end_block_timestamp,
            processed,
        })
    }

    /// Scans `start_block..=end_block` chunk by chunk.
    ///
    /// Returns the references of all processed events and the number of chunks scanned. The
    /// store's cursor is committed after each chunk, so a failed scan can be resumed.
    pub async fn scan(
        &mut self,
        start_block: u64,
        end_block: u64,
        initial_chunk_size: u64,
        mut progress: Option<ProgressCallback<'_>>,
    ) -> ScanResult<(Vec<String>, u64)> {
        if start_block > end_block {
            return Err(ScanError::InvalidRange {
                start: start_block,
                end: end_block,
            });
        }

        let mut current_block = start_block;
        let mut chunk_size = self.estimator.clamp(initial_chunk_size);
        let mut last_scan_duration = Duration::ZERO;
        let mut last_logs_found = 0;
        let mut total_chunks_scanned = 0;
        let mut all_processed = Vec::new();

        while current_block <= end_block {
            let estimated_end_block = current_block.saturating_add(chunk_size).min(end_block);

            self.store
                .start_chunk(current_block, chunk_size)
                .map_err(|source| ScanError::Store {
                    phase: StorePhase::StartChunk,
                    start: current_block,
                    end: estimated_end_block,
                    source,
                })?;

            debug!(
                "Scanning events for blocks: {} - {}, chunk size {}, last chunk scan took {:?}, last logs found {}",
                current_block, estimated_end_block, chunk_size, last_scan_duration, last_logs_found
            );

            let started = Instant::now();
            let chunk = self.scan_chunk(current_block, estimated_end_block).await?;
            last_scan_duration = started.elapsed();
            last_logs_found = chunk.processed.len();

            if let Some(callback) = progress.as_deref_mut() {
                callback(&ScanProgress {
                    scan_start: start_block,
                    scan_end: end_block,
                    chunk_start: current_block,
                    chunk_end: chunk.end_block,
                    chunk_end_timestamp: chunk.end_block_timestamp,
                    chunk_size,
                    events_in_chunk: chunk.processed.len(),
                });
            }

            chunk_size = self.estimator.next_size(chunk_size, chunk.processed.len());

            let chunk_start = current_block;
            current_block = chunk.end_block + 1;
            all_processed.extend(chunk.processed);
            total_chunks_scanned += 1;

            self.store
                .end_chunk(chunk.end_block)
                .map_err(|source| ScanError::Store {
                    phase: StorePhase::EndChunk,
                    start: chunk_start,
                    end: chunk.end_block,
                    source,
                })?;
        }

        info!(
            "Scanned blocks {}-{}: {} events in {} chunks",
            start_block,
            end_block,
            all_processed.len(),
            total_chunks_scanned
        );

        Ok((all_processed, total_chunks_scanned))
    }

    /// Resumes from the stored cursor up to the chain head, rescanning the reorg-unsafe tail.
    pub async fn scan_to_head(
        &mut self,
        progress: Option<ProgressCallback<'_>>,
    ) -> ScanResult<Option<(u64, u64, Vec<String>, u64)>> {
        let Some((start, end)) = self.prepare_resume().await? else {
            return Ok(None);
        };

        info!("Scanning events from blocks {} - {}", start, end);
        let (processed, chunks) = self.scan(start, end, self.initial_chunk_size, progress).await?;
        Ok(Some((start, end, processed, chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Database, JsonStateStore, SqliteStateStore};
    use crate::test_utils::{
        MockChain, batch_event, block_hash, block_time, contract, transfer_event, tx_details,
        tx_hash,
    };

    fn config() -> ScannerConfig {
        ScannerConfig {
            request_retry_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn scanner(chain: MockChain) -> EventScanner<MockChain, SqliteStateStore> {
        scanner_with(chain, config())
    }

    fn scanner_with(
        chain: MockChain,
        config: ScannerConfig,
    ) -> EventScanner<MockChain, SqliteStateStore> {
        let store = SqliteStateStore::new(Database::in_memory().unwrap(), "test");
        EventScanner::new(
            chain,
            store,
            vec![EventFilter::erc721_transfer(vec![contract()])],
            &config,
        )
        .unwrap()
    }

    /// Blocks covered by the recorded fetch windows, in request order.
    fn covered_blocks(chain: &MockChain) -> Vec<u64> {
        chain
            .requested_ranges()
            .iter()
            .flat_map(|(from, to)| *from..=*to)
            .collect()
    }

    #[tokio::test]
    async fn single_empty_block() {
        let mut scanner = scanner(MockChain::new(1_000));

        let (processed, chunks) = scanner.scan(100, 100, 20, None).await.unwrap();

        assert!(processed.is_empty());
        assert_eq!(chunks, 1);
        assert_eq!(scanner.get_last_scanned_block().unwrap(), 100);
    }

    #[tokio::test]
    async fn chunk_size_resets_on_hits() {
        let chain = MockChain::new(1_000)
            .with_events([transfer_event(5, 0), transfer_event(40, 0)]);
        let mut scanner = scanner(chain);

        let mut sizes = Vec::new();
        let mut record = |p: &ScanProgress| sizes.push((p.chunk_start, p.chunk_end, p.chunk_size));
        let (processed, chunks) = scanner.scan(1, 50, 10, Some(&mut record)).await.unwrap();

        assert_eq!(processed.len(), 2);
        assert_eq!(chunks, 4);
        assert_eq!(
            sizes,
            vec![(1, 11, 10), (12, 22, 10), (23, 43, 20), (44, 50, 10)]
        );
        assert_eq!(scanner.get_last_scanned_block().unwrap(), 50);
    }

    #[tokio::test]
    async fn covers_every_block_exactly_once() {
        let events = (1..=30).map(|i| transfer_event(i * 97, 0));
        let chain = MockChain::new(10_000).with_events(events);
        let mut scanner = scanner(chain);

        let (processed, _) = scanner.scan(17, 3_001, 20, None).await.unwrap();

        assert_eq!(covered_blocks(scanner.chain()), (17..=3_001).collect::<Vec<_>>());
        assert_eq!(processed.len(), 30);
        assert_eq!(scanner.store().transfers().unwrap().len(), 30);
    }

    #[tokio::test]
    async fn narrowed_windows_still_cover_range_once() {
        let chain = MockChain::new(100_000).with_max_span(300);
        let mut scanner = scanner(chain);

        let (_, chunks) = scanner.scan(1, 20_000, 20, None).await.unwrap();

        let scanned: Vec<u64> = {
            // only successful windows count; failed ones were retried from the same start
            let ranges = scanner.chain().requested_ranges();
            ranges
                .iter()
                .filter(|(from, to)| to - from + 1 <= 300)
                .flat_map(|(from, to)| *from..=*to)
                .collect()
        };
        assert_eq!(scanned, (1..=20_000).collect::<Vec<_>>());
        assert!(chunks > 1);
        assert_eq!(scanner.get_last_scanned_block().unwrap(), 20_000);
    }

    #[tokio::test]
    async fn rejects_inverted_range_before_any_query() {
        let mut scanner = scanner(MockChain::new(100));

        let err = scanner.scan(50, 10, 20, None).await.unwrap_err();

        assert!(matches!(err, ScanError::InvalidRange { start: 50, end: 10 }));
        assert!(scanner.chain().requested_ranges().is_empty());
    }

    #[tokio::test]
    async fn pending_log_fails_loudly() {
        let mut pending = transfer_event(8, 0);
        pending.log_index = None;
        let mut scanner = scanner(MockChain::new(100).with_event(pending));

        let err = scanner.scan(1, 20, 10, None).await.unwrap_err();

        assert!(matches!(err, ScanError::PendingLog { block_number: 8, .. }));
        assert_eq!(scanner.get_last_scanned_block().unwrap(), 0);
    }

    #[tokio::test]
    async fn retry_exhaustion_stops_scan_at_last_commit() {
        let chain = MockChain::new(1_000).with_max_span(5);
        let config = ScannerConfig {
            max_request_retries: 2,
            ..config()
        };
        let mut scanner = scanner_with(chain, config);

        let err = scanner.scan(1, 100, 10, None).await.unwrap_err();

        match err {
            ScanError::RetryExhausted { start, end, .. } => assert_eq!((start, end), (1, 6)),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(scanner.get_last_scanned_block().unwrap(), 0);
    }

    #[tokio::test]
    async fn timestamps_looked_up_once_per_block() {
        let chain = MockChain::new(1_000).with_events([
            transfer_event(5, 0),
            transfer_event(5, 1),
            transfer_event(5, 2),
        ]);
        let mut scanner = scanner(chain);

        scanner.scan(1, 10, 10, None).await.unwrap();

        assert_eq!(scanner.chain().timestamp_requests(), vec![5, 10]);
        let transfers = scanner.store().transfers().unwrap();
        assert!(transfers.iter().all(|t| t.timestamp == Some(block_time(5))));
    }

    #[tokio::test]
    async fn transactions_looked_up_once_per_chunk() {
        let chain = MockChain::new(1_000).with_events([
            transfer_event(5, 0),
            transfer_event(5, 1),
            batch_event(7, 2, &[1, 2]),
        ]);
        let store = SqliteStateStore::new(Database::in_memory().unwrap(), "test");
        let mut scanner = EventScanner::new(
            chain,
            store,
            vec![
                EventFilter::erc721_transfer(vec![contract()]),
                EventFilter::erc1155_transfer_batch(vec![contract()]),
            ],
            &config(),
        )
        .unwrap();

        scanner.scan(1, 10, 10, None).await.unwrap();

        assert_eq!(
            scanner.chain().transaction_requests(),
            vec![tx_hash(5), tx_hash(7)]
        );

        let transfers = scanner.store().transfers().unwrap();
        assert_eq!(transfers.len(), 4);
        for transfer in &transfers {
            let details = tx_details(transfer.block_number);
            assert_eq!(transfer.block_hash, Some(block_hash(transfer.block_number)));
            assert_eq!(transfer.tx_value, Some(details.value));
            assert_eq!(transfer.gas, Some(details.gas));
            assert_eq!(transfer.gas_price, details.gas_price);
        }
    }

    #[tokio::test]
    async fn transaction_lookup_can_be_disabled() {
        let chain = MockChain::new(1_000).with_event(transfer_event(5, 0));
        let config = ScannerConfig {
            fetch_transaction_details: false,
            ..config()
        };
        let mut scanner = scanner_with(chain, config);

        scanner.scan(1, 10, 10, None).await.unwrap();

        assert!(scanner.chain().transaction_requests().is_empty());
        let transfers = scanner.store().transfers().unwrap();
        assert_eq!(transfers[0].tx_value, None);
        assert_eq!(transfers[0].gas, None);
        assert_eq!(transfers[0].block_hash, Some(block_hash(5)));
    }

    #[tokio::test]
    async fn missing_end_block_time_is_reported_as_absent() {
        let mut scanner = scanner(MockChain::new(50));

        let mut reports = Vec::new();
        let mut record = |p: &ScanProgress| reports.push(p.clone());
        scanner.scan(45, 60, 100, Some(&mut record)).await.unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].chunk_end, 60);
        assert_eq!(reports[0].chunk_end_timestamp, None);
        assert!(reports[0].describe().contains("no block time available"));
    }

    #[tokio::test]
    async fn filters_are_scanned_in_order() {
        let chain = MockChain::new(1_000)
            .with_events([batch_event(3, 1, &[7, 8]), transfer_event(9, 0)]);
        let store = SqliteStateStore::new(Database::in_memory().unwrap(), "test");
        let mut scanner = EventScanner::new(
            chain,
            store,
            vec![
                EventFilter::erc721_transfer(vec![contract()]),
                EventFilter::erc1155_transfer_batch(vec![contract()]),
            ],
            &config(),
        )
        .unwrap();

        let (processed, _) = scanner.scan(1, 10, 10, None).await.unwrap();

        assert_eq!(processed.len(), 2);
        assert!(processed[0].starts_with("9-"));
        assert!(processed[1].starts_with("3-"));
        assert_eq!(scanner.store().transfers().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn resume_rescans_reorg_tail() {
        let chain = MockChain::new(1_001)
            .with_events([transfer_event(500, 0), transfer_event(995, 0)]);
        let mut scanner = scanner(chain);

        scanner.scan(1, 1_000, 20, None).await.unwrap();
        assert_eq!(scanner.get_last_scanned_block().unwrap(), 1_000);
        assert_eq!(scanner.get_suggested_scan_start_block().unwrap(), 990);

        let (start, end, processed, _) = scanner.scan_to_head(None).await.unwrap().unwrap();

        assert_eq!((start, end), (990, 1_000));
        assert_eq!(processed.len(), 1);
        let blocks: Vec<u64> = scanner
            .store()
            .transfers()
            .unwrap()
            .iter()
            .map(|t| t.block_number)
            .collect();
        assert_eq!(blocks, vec![500, 995]);
    }

    #[tokio::test]
    async fn fresh_scan_starts_at_floor() {
        let config = ScannerConfig {
            start_block_floor: 900,
            ..config()
        };
        let mut scanner = scanner_with(MockChain::new(1_000), config);

        assert_eq!(scanner.get_suggested_scan_start_block().unwrap(), 900);
        assert_eq!(scanner.get_suggested_scan_end_block().await.unwrap(), 999);

        let (start, end, _, _) = scanner.scan_to_head(None).await.unwrap().unwrap();
        assert_eq!((start, end), (900, 999));
    }

    #[tokio::test]
    async fn caught_up_scanner_has_nothing_to_do() {
        let mut scanner = scanner(MockChain::new(1));
        assert!(scanner.scan_to_head(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn works_with_json_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let chain = MockChain::new(1_000).with_event(transfer_event(42, 0));

        let mut scanner = EventScanner::new(
            chain,
            JsonStateStore::open(&path),
            vec![EventFilter::erc721_transfer(vec![])],
            &config(),
        )
        .unwrap();
        scanner.scan(1, 100, 20, None).await.unwrap();

        let restored = JsonStateStore::open(&path);
        assert_eq!(restored.get_last_scanned_block().unwrap(), 100);
        assert_eq!(restored.transfers().len(), 1);
    }
}
