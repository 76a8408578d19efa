use crate::events::{EventArgs, RawEvent, TransactionDetails};
use crate::scanner::source::{ChainSource, EventFilter};
use alloy_primitives::{Address, B256, U256, keccak256};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

pub const GENESIS_TIMESTAMP: i64 = 1_600_000_000;
pub const GAS_PRICE: u128 = 30_000_000_000;

pub fn contract() -> Address {
    Address::repeat_byte(0x11)
}

pub fn tx_hash(block_number: u64) -> B256 {
    B256::from(U256::from(block_number).to_be_bytes::<32>())
}

pub fn block_hash(block_number: u64) -> B256 {
    keccak256(block_number.to_be_bytes())
}

/// Details of the transaction `tx_hash(block_number)`; the value is the block number in wei.
pub fn tx_details(block_number: u64) -> TransactionDetails {
    TransactionDetails {
        value: U256::from(block_number),
        gas: 90_000,
        gas_price: Some(GAS_PRICE),
    }
}

pub fn block_time(block_number: u64) -> DateTime<Utc> {
    DateTime::from_timestamp(GENESIS_TIMESTAMP + block_number as i64 * 12, 0).unwrap()
}

/// An ERC-721 transfer of token `block_number` in block `block_number`.
pub fn transfer_event(block_number: u64, log_index: u64) -> RawEvent {
    RawEvent {
        event_name: "Transfer",
        address: contract(),
        block_number,
        block_hash: Some(block_hash(block_number)),
        transaction_hash: tx_hash(block_number),
        log_index: Some(log_index),
        args: EventArgs::Erc721Transfer {
            from: Address::repeat_byte(0xaa),
            to: Address::repeat_byte(0xbb),
            token_id: U256::from(block_number),
        },
        transaction: None,
    }
}

pub fn batch_event(block_number: u64, log_index: u64, ids: &[u64]) -> RawEvent {
    RawEvent {
        event_name: "TransferBatch",
        address: contract(),
        block_number,
        block_hash: Some(block_hash(block_number)),
        transaction_hash: tx_hash(block_number),
        log_index: Some(log_index),
        args: EventArgs::Erc1155TransferBatch {
            operator: Address::repeat_byte(0xcc),
            from: Address::ZERO,
            to: Address::repeat_byte(0xbb),
            ids: ids.iter().map(|id| U256::from(*id)).collect(),
            values: ids.iter().map(|_| U256::from(5)).collect(),
        },
        transaction: None,
    }
}

/// In-memory chain answering log queries from a fixed event list.
pub struct MockChain {
    head: u64,
    events: Vec<RawEvent>,
    max_span: Option<u64>,
    failures_left: Mutex<u32>,
    requests: Mutex<Vec<(u64, u64)>>,
    timestamp_requests: Mutex<Vec<u64>>,
    transaction_requests: Mutex<Vec<B256>>,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        Self {
            head,
            events: Vec::new(),
            max_span: None,
            failures_left: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
            timestamp_requests: Mutex::new(Vec::new()),
            transaction_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_event(mut self, event: RawEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_events(mut self, events: impl IntoIterator<Item = RawEvent>) -> Self {
        self.events.extend(events);
        self
    }

    /// Rejects queries covering more than `span` blocks.
    pub fn with_max_span(mut self, span: u64) -> Self {
        self.max_span = Some(span);
        self
    }

    pub fn fail_next(&self, count: u32) {
        *self.failures_left.lock().unwrap() = count;
    }

    pub fn requested_ranges(&self) -> Vec<(u64, u64)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn timestamp_requests(&self) -> Vec<u64> {
        self.timestamp_requests.lock().unwrap().clone()
    }

    pub fn transaction_requests(&self) -> Vec<B256> {
        self.transaction_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn latest_block(&self) -> Result<u64> {
        Ok(self.head)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<Option<DateTime<Utc>>> {
        self.timestamp_requests.lock().unwrap().push(block_number);
        if block_number > self.head {
            return Ok(None);
        }
        Ok(Some(block_time(block_number)))
    }

    async fn transaction_details(&self, hash: B256) -> Result<Option<TransactionDetails>> {
        self.transaction_requests.lock().unwrap().push(hash);
        let block_number = U256::from_be_bytes(hash.0);
        if block_number > U256::from(self.head) {
            return Ok(None);
        }
        Ok(Some(tx_details(block_number.to::<u64>())))
    }

    async fn fetch_logs(
        &self,
        filter: &EventFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawEvent>> {
        self.requests.lock().unwrap().push((from_block, to_block));

        {
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("context deadline exceeded");
            }
        }

        if let Some(span) = self.max_span
            && to_block - from_block + 1 > span
        {
            anyhow::bail!("query returned more than 10000 results");
        }

        Ok(self
            .events
            .iter()
            .filter(|e| (from_block..=to_block).contains(&e.block_number))
            .filter(|e| e.event_name == filter.name())
            .filter(|e| filter.addresses.is_empty() || filter.addresses.contains(&e.address))
            .cloned()
            .collect())
    }
}
