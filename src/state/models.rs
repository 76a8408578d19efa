use crate::events::{EventArgs, RawEvent};
use alloy_primitives::{Address, B256, U256};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a log: unique across the chain for confirmed blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
}

impl EventKey {
    pub fn from_event(event: &RawEvent) -> Result<Self> {
        let log_index = event.log_index.ok_or_else(|| {
            anyhow::anyhow!(
                "Refusing to record pending log in block {} (tx {:?})",
                event.block_number,
                event.transaction_hash
            )
        })?;

        Ok(Self {
            block_number: event.block_number,
            transaction_hash: event.transaction_hash,
            log_index,
        })
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:?}-{}",
            self.block_number, self.transaction_hash, self.log_index
        )
    }
}

#[derive(Debug, Clone)]
pub struct Contract {
    pub address: Address,
    pub deployment_block: u64,
}

/// One token movement, as persisted.
///
/// ERC-1155 batch logs expand to one record per `(id, value)` pair, told apart by
/// `batch_index`. The transaction fields are `None` when the lookup was disabled or the
/// node did not know the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub batch_index: u32,
    pub contract_address: Address,
    pub event_name: String,
    pub operator: Option<Address>,
    pub from_address: Address,
    pub to_address: Address,
    pub token_id: U256,
    pub amount: U256,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub block_hash: Option<B256>,
    #[serde(default)]
    pub tx_value: Option<U256>,
    #[serde(default)]
    pub gas: Option<u64>,
    #[serde(default)]
    pub gas_price: Option<u128>,
}

impl TransferRecord {
    pub fn is_mint(&self) -> bool {
        self.from_address == Address::ZERO
    }

    pub fn is_burn(&self) -> bool {
        self.to_address == Address::ZERO
    }

    pub fn movement(&self) -> &'static str {
        if self.is_mint() {
            "mint"
        } else if self.is_burn() {
            "burn"
        } else {
            "transfer"
        }
    }
}

/// Turns a decoded log into the records to persist.
pub fn records_from_event(
    timestamp: Option<DateTime<Utc>>,
    event: &RawEvent,
) -> Result<(EventKey, Vec<TransferRecord>)> {
    let key = EventKey::from_event(event)?;

    let record = |batch_index: u32,
                  operator: Option<Address>,
                  from: Address,
                  to: Address,
                  token_id: U256,
                  amount: U256| TransferRecord {
        block_number: key.block_number,
        transaction_hash: key.transaction_hash,
        log_index: key.log_index,
        batch_index,
        contract_address: event.address,
        event_name: event.event_name.to_string(),
        operator,
        from_address: from,
        to_address: to,
        token_id,
        amount,
        timestamp,
        block_hash: event.block_hash,
        tx_value: event.transaction.map(|tx| tx.value),
        gas: event.transaction.map(|tx| tx.gas),
        gas_price: event.transaction.and_then(|tx| tx.gas_price),
    };

    let records = match &event.args {
        EventArgs::Erc721Transfer { from, to, token_id } => {
            vec![record(0, None, *from, *to, *token_id, U256::from(1))]
        }
        EventArgs::Erc1155TransferSingle {
            operator,
            from,
            to,
            id,
            value,
        } => vec![record(0, Some(*operator), *from, *to, *id, *value)],
        EventArgs::Erc1155TransferBatch {
            operator,
            from,
            to,
            ids,
            values,
        } => ids
            .iter()
            .zip(values)
            .enumerate()
            .map(|(i, (id, value))| record(i as u32, Some(*operator), *from, *to, *id, *value))
            .collect(),
    };

    Ok((key, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{batch_event, block_hash, transfer_event, tx_details};

    #[test]
    fn erc721_transfer_is_one_token() {
        let (key, records) = records_from_event(None, &transfer_event(7, 2)).unwrap();

        assert_eq!(key.block_number, 7);
        assert_eq!(key.log_index, 2);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].amount, U256::from(1));
        assert_eq!(records[0].token_id, U256::from(7));
        assert!(records[0].operator.is_none());
        assert_eq!(records[0].block_hash, Some(block_hash(7)));
        assert_eq!(records[0].tx_value, None);
        assert_eq!(records[0].movement(), "transfer");
    }

    #[test]
    fn transaction_details_are_copied_to_every_record() {
        let mut event = batch_event(9, 0, &[1, 2]);
        event.transaction = Some(tx_details(9));

        let (_, records) = records_from_event(None, &event).unwrap();

        for record in &records {
            assert_eq!(record.tx_value, Some(U256::from(9)));
            assert_eq!(record.gas, Some(90_000));
            assert_eq!(record.gas_price, tx_details(9).gas_price);
        }
    }

    #[test]
    fn records_saved_before_transaction_fields_still_load() {
        let (_, records) = records_from_event(None, &transfer_event(3, 0)).unwrap();
        let mut value = serde_json::to_value(&records[0]).unwrap();
        let fields = value.as_object_mut().unwrap();
        for field in ["block_hash", "tx_value", "gas", "gas_price"] {
            fields.remove(field);
        }

        let record: TransferRecord = serde_json::from_value(value).unwrap();

        assert_eq!(record.block_number, 3);
        assert_eq!(record.block_hash, None);
        assert_eq!(record.gas, None);
    }

    #[test]
    fn batch_expands_per_token() {
        let (_, records) = records_from_event(None, &batch_event(9, 0, &[1, 2, 3])).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| r.batch_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(records.iter().all(|r| r.is_mint()));
    }

    #[test]
    fn pending_event_is_rejected() {
        let mut event = transfer_event(7, 0);
        event.log_index = None;
        assert!(records_from_event(None, &event).is_err());
    }

    #[test]
    fn key_display_is_block_tx_index() {
        let key = EventKey::from_event(&transfer_event(5, 1)).unwrap();
        let text = key.to_string();
        assert!(text.starts_with("5-0x"));
        assert!(text.ends_with("-1"));
    }
}
