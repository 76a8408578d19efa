use crate::events::{RawEvent, TransactionDetails, decode_event};
use crate::scanner::{ChainSource, EventFilter};
use alloy::consensus::Transaction as _;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Filter};
use alloy::transports::TransportResult;
use alloy_primitives::{Address, B256, Bytes};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_LOOKUP_RETRIES: usize = 5;

/// JSON-RPC client over one or more HTTP endpoints.
///
/// Any failed request rotates to the next endpoint. Point lookups (head, timestamps, code, tx)
/// retry with exponential backoff; `eth_getLogs` is attempted once so the scanner can narrow
/// the block range itself.
#[derive(Clone)]
pub struct RpcClient {
    endpoints: Vec<(String, DynProvider)>,
    current: Arc<AtomicUsize>,
    request_timeout: Duration,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String], request_timeout: Duration) -> Result<Self> {
        if rpc_urls.is_empty() {
            anyhow::bail!("At least one RPC URL must be provided");
        }

        let endpoints = rpc_urls
            .iter()
            .map(|url| {
                let parsed = url
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", url))?;
                let provider = ProviderBuilder::new().connect_http(parsed).erased();
                Ok((url.clone(), provider))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RpcClient {
            endpoints,
            current: Arc::new(AtomicUsize::new(0)),
            request_timeout,
        })
    }

    fn endpoint(&self) -> &(String, DynProvider) {
        &self.endpoints[self.current.load(Ordering::Relaxed) % self.endpoints.len()]
    }

    pub fn rotate_provider(&self) {
        if self.endpoints.len() > 1 {
            let next = (self.current.fetch_add(1, Ordering::Relaxed) + 1) % self.endpoints.len();
            debug!("Rotating to RPC provider #{}", next);
        }
    }

    /// Sends `request` once to the current endpoint; on error or timeout moves to the next one.
    async fn attempt<T, F, Fut>(&self, what: &str, request: &F) -> Result<T>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let (url, provider) = self.endpoint();
        let url = url.clone();

        match timeout(self.request_timeout, request(provider.clone())).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!("{} failed on {}: {}, rotating provider", what, url, e);
                self.rotate_provider();
                Err(anyhow::anyhow!("{} failed: {}", what, e))
            }
            Err(_) => {
                warn!(
                    "{} timed out after {}s on {}, rotating provider",
                    what,
                    self.request_timeout.as_secs(),
                    url
                );
                self.rotate_provider();
                Err(anyhow::anyhow!(
                    "{} timed out after {}s",
                    what,
                    self.request_timeout.as_secs()
                ))
            }
        }
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, request: F) -> Result<T>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let strategy = ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(MAX_LOOKUP_RETRIES);

        Retry::spawn(strategy, || self.attempt(what, &request)).await
    }

    pub async fn get_latest_block(&self) -> Result<u64> {
        self.with_retry("eth_blockNumber", |provider| async move {
            provider.get_block_number().await
        })
        .await
    }

    /// `None` when the node does not have the block.
    pub async fn get_block_timestamp(&self, block_number: u64) -> Result<Option<DateTime<Utc>>> {
        let block = self
            .with_retry("eth_getBlockByNumber", |provider| async move {
                provider
                    .get_block_by_number(BlockNumberOrTag::Number(block_number))
                    .await
            })
            .await?;

        match block {
            Some(block) => {
                let seconds = i64::try_from(block.header.timestamp)?;
                Ok(DateTime::from_timestamp(seconds, 0))
            }
            None => Ok(None),
        }
    }

    /// `None` when the node does not know the transaction.
    pub async fn get_transaction_details(&self, hash: B256) -> Result<Option<TransactionDetails>> {
        let tx = self
            .with_retry("eth_getTransactionByHash", |provider| async move {
                provider.get_transaction_by_hash(hash).await
            })
            .await?;

        Ok(tx.map(|tx| TransactionDetails {
            value: tx.value(),
            gas: tx.gas_limit(),
            gas_price: tx.effective_gas_price.or_else(|| tx.gas_price()),
        }))
    }

    pub async fn get_code_at_block(&self, address: Address, block_number: u64) -> Result<Bytes> {
        self.with_retry("eth_getCode", |provider| async move {
            provider
                .get_code_at(address)
                .block_id(BlockNumberOrTag::Number(block_number).into())
                .await
        })
        .await
    }

    /// One `eth_getLogs` call for `filter` over `from_block..=to_block`, decoded.
    pub async fn get_logs(
        &self,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>> {
        let query = Filter::new()
            .address(filter.addresses.clone())
            .event_signature(filter.topic0())
            .from_block(from_block)
            .to_block(to_block);

        debug!(
            "eth_getLogs {} on {} contract(s), blocks {}-{}",
            filter.name(),
            filter.addresses.len(),
            from_block,
            to_block
        );

        let request = |provider: DynProvider| {
            let query = query.clone();
            async move { provider.get_logs(&query).await }
        };
        let logs = self.attempt("eth_getLogs", &request).await?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            match decode_event(filter.kind, &log) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    "Skipping undecodable {} log in tx {:?}: {}",
                    filter.name(),
                    log.transaction_hash,
                    e
                ),
            }
        }

        Ok(events)
    }
}

#[async_trait]
impl ChainSource for RpcClient {
    async fn latest_block(&self) -> Result<u64> {
        self.get_latest_block().await
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<DateTime<Utc>>> {
        self.get_block_timestamp(block_number).await
    }

    async fn transaction_details(&self, hash: B256) -> Result<Option<TransactionDetails>> {
        self.get_transaction_details(hash).await
    }

    async fn fetch_logs(
        &self,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>> {
        self.get_logs(filter, from_block, to_block).await
    }
}
