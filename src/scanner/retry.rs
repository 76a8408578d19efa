use crate::error::{ScanError, ScanResult};
use crate::events::RawEvent;
use crate::scanner::source::{ChainSource, EventFilter};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

pub const DEFAULT_MAX_REQUEST_RETRIES: u32 = 30;
pub const DEFAULT_REQUEST_RETRY_DELAY: Duration = Duration::from_secs(3);

// Some providers name an acceptable range in their "too many results" error
static SUGGESTED_RANGE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"retry with the range (\d+)-(\d+)").ok());

/// Runs one log query and narrows the block range on every failure.
///
/// Nodes reject oversized `eth_getLogs` requests (timeouts, result caps) without saying which
/// size would work, so each failed attempt halves the window and waits before trying again.
#[derive(Debug, Clone, Copy)]
pub struct RetryingRangeFetcher {
    max_retries: u32,
    retry_delay: Duration,
}

impl Default for RetryingRangeFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUEST_RETRIES, DEFAULT_REQUEST_RETRY_DELAY)
    }
}

impl RetryingRangeFetcher {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    /// Fetches `filter` logs for `start..=end`.
    ///
    /// Returns the end block actually covered (`<= end`) with the logs of `start..=actual_end`.
    pub async fn fetch<S: ChainSource + ?Sized>(
        &self,
        source: &S,
        filter: &EventFilter,
        start: u64,
        end: u64,
    ) -> ScanResult<(u64, Vec<RawEvent>)> {
        if start > end {
            return Err(ScanError::InvalidRange { start, end });
        }

        let mut end = end;
        let mut attempt = 1;

        loop {
            match source.fetch_logs(filter, start, end).await {
                Ok(events) => {
                    debug!(
                        "Fetched {} {} logs for blocks {}-{}",
                        events.len(),
                        filter.name(),
                        start,
                        end
                    );
                    return Ok((end, events));
                }
                Err(e) if attempt < self.max_retries => {
                    warn!(
                        "Fetching {} logs for blocks {}-{} ({}) failed with {}, retrying in {:?}",
                        filter.name(),
                        start,
                        end,
                        end - start,
                        e,
                        self.retry_delay
                    );
                    end = narrowed_end(start, end, &e.to_string());
                    attempt += 1;
                    sleep(self.retry_delay).await;
                }
                Err(e) => {
                    warn!("Out of retries for blocks {}-{}", start, end);
                    return Err(ScanError::RetryExhausted {
                        start,
                        end,
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}

/// End block of the next attempt after `start..=end` failed.
///
/// The window is halved. A range suggested by the node is taken instead only when it narrows
/// at least as far.
fn narrowed_end(start: u64, end: u64, error: &str) -> u64 {
    let halved = start + (end - start) / 2;

    if let Some((from, to)) = parse_suggested_range(error)
        && from == start
        && (start..halved).contains(&to)
    {
        debug!("Node suggested blocks {}-{}", from, to);
        return to;
    }

    halved
}

fn parse_suggested_range(error: &str) -> Option<(u64, u64)> {
    let captures = SUGGESTED_RANGE.as_ref()?.captures(error)?;

    let from = captures.get(1)?.as_str().parse().ok()?;
    let to = captures.get(2)?.as_str().parse().ok()?;

    Some((from, to))
}
