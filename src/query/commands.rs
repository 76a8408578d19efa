use crate::query::formatters::{
    OutputFormat, format_cursors, format_stats, format_transfers, write_transfers_csv,
};
use crate::state::{CursorRepository, TransferFilter, TransferRepository};
use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

#[derive(Default)]
pub struct TransferQuery {
    pub contract: Option<String>,
    pub token_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub address: Option<String>,
    pub block: Option<u64>,
    pub block_range: Option<(u64, u64)>,
    pub limit: usize,
    pub offset: usize,
}

impl TransferQuery {
    pub fn to_filter(&self) -> Result<TransferFilter> {
        let parse_address = |label: &str, value: &Option<String>| {
            value
                .as_deref()
                .map(|addr| {
                    Address::from_str(addr)
                        .map_err(|_| anyhow::anyhow!("Invalid {} address: {}", label, addr))
                })
                .transpose()
        };

        let token_id = self
            .token_id
            .as_deref()
            .map(|id| U256::from_str(id).with_context(|| format!("Invalid token id: {id}")))
            .transpose()?;

        let block_range = match (self.block, self.block_range) {
            (Some(block), _) => Some((block, block)),
            (None, Some((start, end))) if start > end => {
                anyhow::bail!("Invalid block range: {} > {}", start, end)
            }
            (None, range) => range,
        };

        Ok(TransferFilter {
            partition: None,
            contract: parse_address("contract", &self.contract)?,
            token_id,
            from: parse_address("from", &self.from)?,
            to: parse_address("to", &self.to)?,
            address: parse_address("participant", &self.address)?,
            block_range,
        })
    }
}

pub fn cmd_transfers(
    transfer_repo: &TransferRepository,
    query: &TransferQuery,
    format: OutputFormat,
) -> Result<()> {
    let filter = query.to_filter()?;
    let transfers = transfer_repo.query_transfers(&filter, query.limit, query.offset)?;
    println!("{}", format_transfers(&transfers, format)?);

    Ok(())
}

pub fn cmd_stats(repo: &TransferRepository, format: OutputFormat) -> Result<()> {
    let stats = repo.get_statistics()?;
    println!("{}", format_stats(&stats, format)?);

    Ok(())
}

pub fn cmd_cursors(repo: &CursorRepository, format: OutputFormat) -> Result<()> {
    let cursors = repo.list_cursors()?;
    println!("{}", format_cursors(&cursors, format)?);

    Ok(())
}

/// Writes every matching transfer to `path` as CSV. Returns the number of rows.
pub fn cmd_export(
    transfer_repo: &TransferRepository,
    query: &TransferQuery,
    path: &Path,
) -> Result<usize> {
    let filter = query.to_filter()?;
    let transfers = transfer_repo.query_transfers(&filter, i64::MAX as usize, 0)?;

    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    write_transfers_csv(file, &transfers)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(transfers.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Database, SqliteStateStore, ScanStateStore};
    use crate::test_utils::{batch_event, block_time, transfer_event};

    #[test]
    fn single_block_wins_over_range() {
        let query = TransferQuery {
            block: Some(7),
            block_range: Some((1, 100)),
            ..Default::default()
        };
        assert_eq!(query.to_filter().unwrap().block_range, Some((7, 7)));
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        let bad_address = TransferQuery {
            from: Some("0x1234".to_string()),
            ..Default::default()
        };
        assert!(bad_address.to_filter().is_err());

        let bad_range = TransferQuery {
            block_range: Some((10, 1)),
            ..Default::default()
        };
        assert!(bad_range.to_filter().is_err());

        let bad_token = TransferQuery {
            token_id: Some("seven".to_string()),
            ..Default::default()
        };
        assert!(bad_token.to_filter().is_err());
    }

    #[test]
    fn export_writes_matching_rows() {
        let mut store = SqliteStateStore::new(Database::in_memory().unwrap(), "test");
        store.start_chunk(1, 20).unwrap();
        store
            .process_event(Some(block_time(5)), &transfer_event(5, 0))
            .unwrap();
        store
            .process_event(Some(block_time(9)), &batch_event(9, 1, &[1, 2]))
            .unwrap();
        store.end_chunk(20).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let repo = TransferRepository::new(&store.database().conn);
        let query = TransferQuery {
            block_range: Some((9, 9)),
            ..Default::default()
        };

        let rows = cmd_export(&repo, &query, &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();

        assert_eq!(rows, 2);
        assert_eq!(written.lines().count(), 3);
    }

    #[test]
    fn export_into_missing_directory_fails() {
        let store = SqliteStateStore::new(Database::in_memory().unwrap(), "test");
        let repo = TransferRepository::new(&store.database().conn);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("export.csv");

        let err = cmd_export(&repo, &TransferQuery::default(), &path).unwrap_err();

        assert!(err.to_string().contains("Failed to create"));
        assert!(!path.exists());
    }
}
