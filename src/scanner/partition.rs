use super::{ChainSource, EventFilter, EventScanner, ScanProgress, ScannerConfig};
use crate::error::{ScanError, ScanResult};
use crate::state::ScanStateStore;
use futures::future::try_join_all;
use tracing::info;

/// An independent slice of the scan: its own filters and its own cursor.
///
/// Partitions are scanned concurrently. A single contract's block range is never split across
/// partitions, since out-of-order commits of one cursor could skip data.
pub struct Partition<S> {
    pub name: String,
    pub filters: Vec<EventFilter>,
    pub store: S,
    /// Overrides the configured floor, e.g. with the contract's deployment block.
    pub start_block_floor: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionReport {
    pub name: String,
    pub range: Option<(u64, u64)>,
    pub events: usize,
    pub chunks: u64,
}

/// Brings every partition up to the chain head, each resuming from its own cursor.
pub async fn scan_partitions<C, S>(
    chain: C,
    partitions: Vec<Partition<S>>,
    config: &ScannerConfig,
) -> ScanResult<Vec<(PartitionReport, S)>>
where
    C: ChainSource + Clone,
    S: ScanStateStore,
{
    let scans = partitions.into_iter().map(|partition| {
        let chain = chain.clone();
        async move {
            let mut config = config.clone();
            if let Some(floor) = partition.start_block_floor {
                config.start_block_floor = floor;
            }

            let name = partition.name;
            let mut scanner =
                EventScanner::new(chain, partition.store, partition.filters, &config)?;

            let mut log_progress = |progress: &ScanProgress| {
                info!("[{}] {}", name, progress.describe());
            };
            let outcome = scanner.scan_to_head(Some(&mut log_progress)).await?;

            let report = match outcome {
                Some((start, end, processed, chunks)) => {
                    info!(
                        "[{}] Scanned total {} events, in {} chunk scans",
                        name,
                        processed.len(),
                        chunks
                    );
                    PartitionReport {
                        name,
                        range: Some((start, end)),
                        events: processed.len(),
                        chunks,
                    }
                }
                None => {
                    info!("[{}] Already at chain head", name);
                    PartitionReport {
                        name,
                        range: None,
                        events: 0,
                        chunks: 0,
                    }
                }
            };

            Ok::<_, ScanError>((report, scanner.into_store()))
        }
    });

    try_join_all(scans).await
}
