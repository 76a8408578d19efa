use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

sol! {
    event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);

    event TransferSingle(
        address indexed operator,
        address indexed from,
        address indexed to,
        uint256 id,
        uint256 value
    );

    event TransferBatch(
        address indexed operator,
        address indexed from,
        address indexed to,
        uint256[] ids,
        uint256[] values
    );
}

/// Token transfer events the scanner knows how to query and decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Erc721Transfer,
    Erc1155TransferSingle,
    Erc1155TransferBatch,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Erc721Transfer => "Transfer",
            EventKind::Erc1155TransferSingle => "TransferSingle",
            EventKind::Erc1155TransferBatch => "TransferBatch",
        }
    }

    pub fn signature_hash(&self) -> B256 {
        match self {
            EventKind::Erc721Transfer => Transfer::SIGNATURE_HASH,
            EventKind::Erc1155TransferSingle => TransferSingle::SIGNATURE_HASH,
            EventKind::Erc1155TransferBatch => TransferBatch::SIGNATURE_HASH,
        }
    }
}

/// Decoded arguments of a transfer event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventArgs {
    Erc721Transfer {
        from: Address,
        to: Address,
        token_id: U256,
    },
    Erc1155TransferSingle {
        operator: Address,
        from: Address,
        to: Address,
        id: U256,
        value: U256,
    },
    Erc1155TransferBatch {
        operator: Address,
        from: Address,
        to: Address,
        ids: Vec<U256>,
        values: Vec<U256>,
    },
}

/// Fields of the transaction that emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub value: U256,
    pub gas: u64,
    /// Effective price once mined, otherwise the legacy gas price if the tx has one.
    pub gas_price: Option<u128>,
}

/// One decoded log entry returned by a range query.
///
/// `log_index` is `None` only for pending logs. Pending logs also lack a block number and
/// transaction hash; those fall back to zero values and the scanner rejects the event before
/// reading them.
///
/// `transaction` is filled in by the scanner, the log itself does not carry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub event_name: &'static str,
    pub address: Address,
    pub block_number: u64,
    pub block_hash: Option<B256>,
    pub transaction_hash: B256,
    pub log_index: Option<u64>,
    pub args: EventArgs,
    pub transaction: Option<TransactionDetails>,
}

impl RawEvent {
    pub fn is_pending(&self) -> bool {
        self.log_index.is_none()
    }
}

pub fn decode_event(kind: EventKind, log: &Log) -> anyhow::Result<RawEvent> {
    let topics = log.topics();
    let data = &log.data().data;

    let args = match kind {
        EventKind::Erc721Transfer => {
            let decoded = Transfer::decode_raw_log(topics, data)?;
            EventArgs::Erc721Transfer {
                from: decoded.from,
                to: decoded.to,
                token_id: decoded.tokenId,
            }
        }
        EventKind::Erc1155TransferSingle => {
            let decoded = TransferSingle::decode_raw_log(topics, data)?;
            EventArgs::Erc1155TransferSingle {
                operator: decoded.operator,
                from: decoded.from,
                to: decoded.to,
                id: decoded.id,
                value: decoded.value,
            }
        }
        EventKind::Erc1155TransferBatch => {
            let decoded = TransferBatch::decode_raw_log(topics, data)?;
            if decoded.ids.len() != decoded.values.len() {
                anyhow::bail!(
                    "TransferBatch has {} ids but {} values",
                    decoded.ids.len(),
                    decoded.values.len()
                );
            }
            EventArgs::Erc1155TransferBatch {
                operator: decoded.operator,
                from: decoded.from,
                to: decoded.to,
                ids: decoded.ids,
                values: decoded.values,
            }
        }
    };

    let pending = log.log_index.is_none()
        || log.block_number.is_none()
        || log.transaction_hash.is_none();

    Ok(RawEvent {
        event_name: kind.name(),
        address: log.address(),
        block_number: log.block_number.unwrap_or_default(),
        block_hash: log.block_hash,
        transaction_hash: log.transaction_hash.unwrap_or_default(),
        log_index: if pending { None } else { log.log_index },
        args,
        transaction: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{LogData, address};

    fn erc721_log(block: Option<u64>, log_index: Option<u64>) -> Log {
        let from = address!("0x1111111111111111111111111111111111111111");
        let to = address!("0x2222222222222222222222222222222222222222");
        let topics = vec![
            Transfer::SIGNATURE_HASH,
            from.into_word(),
            to.into_word(),
            B256::from(U256::from(42).to_be_bytes::<32>()),
        ];
        let inner = alloy::primitives::Log {
            address: address!("0xeb4e856f69158052ac0aaf7dc26f63dcb1ee067f"),
            data: LogData::new_unchecked(topics, Default::default()),
        };
        Log {
            inner,
            block_number: block,
            block_hash: block.map(|_| B256::repeat_byte(0xcd)),
            transaction_hash: block.map(|_| B256::repeat_byte(0xab)),
            log_index,
            ..Default::default()
        }
    }

    #[test]
    fn decodes_erc721_transfer() {
        let event = decode_event(EventKind::Erc721Transfer, &erc721_log(Some(15), Some(3)))
            .unwrap();

        assert_eq!(event.event_name, "Transfer");
        assert_eq!(event.block_number, 15);
        assert_eq!(event.log_index, Some(3));
        assert_eq!(event.block_hash, Some(B256::repeat_byte(0xcd)));
        assert_eq!(event.transaction, None);
        assert_eq!(
            event.args,
            EventArgs::Erc721Transfer {
                from: address!("0x1111111111111111111111111111111111111111"),
                to: address!("0x2222222222222222222222222222222222222222"),
                token_id: U256::from(42),
            }
        );
    }

    #[test]
    fn pending_log_has_no_index() {
        let event = decode_event(EventKind::Erc721Transfer, &erc721_log(None, Some(3))).unwrap();
        assert!(event.is_pending());
    }

    #[test]
    fn rejects_wrong_signature() {
        assert!(decode_event(EventKind::Erc1155TransferSingle, &erc721_log(Some(1), Some(0))).is_err());
    }
}
