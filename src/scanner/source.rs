use crate::events::{EventKind, RawEvent, TransactionDetails};
use alloy_primitives::{Address, B256};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A log query descriptor: which contracts and which event signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub kind: EventKind,
    pub addresses: Vec<Address>,
}

impl EventFilter {
    pub fn new(kind: EventKind, addresses: Vec<Address>) -> Self {
        Self { kind, addresses }
    }

    pub fn erc721_transfer(addresses: Vec<Address>) -> Self {
        Self::new(EventKind::Erc721Transfer, addresses)
    }

    pub fn erc1155_transfer_single(addresses: Vec<Address>) -> Self {
        Self::new(EventKind::Erc1155TransferSingle, addresses)
    }

    pub fn erc1155_transfer_batch(addresses: Vec<Address>) -> Self {
        Self::new(EventKind::Erc1155TransferBatch, addresses)
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn topic0(&self) -> B256 {
        self.kind.signature_hash()
    }
}

/// The node operations the scanner needs.
///
/// `fetch_logs` is a single bounded query. Implementations must not retry it themselves,
/// range narrowing on failure is done by the caller.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn latest_block(&self) -> Result<u64>;

    /// `Ok(None)` when the node does not know the block (not mined yet, or reorged away).
    async fn block_timestamp(&self, block_number: u64) -> Result<Option<DateTime<Utc>>>;

    /// `Ok(None)` when the node does not know the transaction.
    async fn transaction_details(&self, hash: B256) -> Result<Option<TransactionDetails>>;

    async fn fetch_logs(
        &self,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>>;
}

#[async_trait]
impl<T: ChainSource + ?Sized> ChainSource for std::sync::Arc<T> {
    async fn latest_block(&self) -> Result<u64> {
        (**self).latest_block().await
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<DateTime<Utc>>> {
        (**self).block_timestamp(block_number).await
    }

    async fn transaction_details(&self, hash: B256) -> Result<Option<TransactionDetails>> {
        (**self).transaction_details(hash).await
    }

    async fn fetch_logs(
        &self,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>> {
        (**self).fetch_logs(filter, from_block, to_block).await
    }
}
