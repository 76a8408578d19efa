use crate::error::{ScanError, ScanResult};
use crate::events::TransactionDetails;
use crate::scanner::source::ChainSource;
use alloy_primitives::B256;
use std::collections::HashMap;

/// Transaction lookups made during one chunk.
///
/// A transaction emitting several transfers is requested once. Dropped when the chunk ends.
#[derive(Debug, Default)]
pub struct TransactionCache {
    transactions: HashMap<B256, Option<TransactionDetails>>,
}

impl TransactionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get<S: ChainSource + ?Sized>(
        &mut self,
        source: &S,
        hash: B256,
    ) -> ScanResult<Option<TransactionDetails>> {
        if let Some(cached) = self.transactions.get(&hash) {
            return Ok(*cached);
        }

        let details = source
            .transaction_details(hash)
            .await
            .map_err(ScanError::Rpc)?;
        self.transactions.insert(hash, details);
        Ok(details)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockChain, tx_details, tx_hash};

    #[tokio::test]
    async fn unknown_transactions_are_cached_too() {
        let chain = MockChain::new(10);
        let mut cache = TransactionCache::new();

        assert_eq!(cache.get(&chain, tx_hash(4)).await.unwrap(), Some(tx_details(4)));
        assert_eq!(cache.get(&chain, tx_hash(4)).await.unwrap(), Some(tx_details(4)));
        assert_eq!(cache.get(&chain, tx_hash(99)).await.unwrap(), None);
        assert_eq!(cache.get(&chain, tx_hash(99)).await.unwrap(), None);

        assert_eq!(cache.len(), 2);
        assert_eq!(chain.transaction_requests(), vec![tx_hash(4), tx_hash(99)]);
    }
}
