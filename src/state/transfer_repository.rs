use super::models::TransferRecord;
use alloy_primitives::{Address, B256, U256};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Row, ToSql, params, params_from_iter};
use std::str::FromStr;

pub struct TransferRepository<'a> {
    conn: &'a rusqlite::Connection,
}

/// Filters for [`TransferRepository::query_transfers`]. Unset fields match everything.
#[derive(Debug, Default, Clone)]
pub struct TransferFilter {
    pub partition: Option<String>,
    pub contract: Option<Address>,
    pub token_id: Option<U256>,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub address: Option<Address>,
    pub block_range: Option<(u64, u64)>,
}

impl<'a> TransferRepository<'a> {
    const UPSERT_TRANSFER: &'static str = "INSERT OR REPLACE INTO transfers (
            partition, block_number, transaction_hash, log_index, batch_index,
            contract_address, event_name, operator, from_address, to_address,
            token_id, amount, block_timestamp, block_hash, tx_value, gas, gas_price
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)";

    const DELETE_SINCE: &'static str =
        "DELETE FROM transfers WHERE partition = ?1 AND block_number >= ?2";

    const SELECT_TRANSFER: &'static str = "SELECT block_number, transaction_hash, log_index,
            batch_index, contract_address, event_name, operator, from_address, to_address,
            token_id, amount, block_timestamp, block_hash, tx_value, gas, gas_price
            FROM transfers";

    const ORDER_BY_POSITION: &'static str = " ORDER BY block_number, log_index, batch_index";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Inserts or overwrites the records, keyed by event and batch position.
    pub fn upsert(&self, partition: &str, records: &[TransferRecord]) -> Result<usize> {
        let mut stmt = self.conn.prepare(Self::UPSERT_TRANSFER)?;
        let mut count = 0;

        for record in records {
            count += stmt.execute(params![
                partition,
                record.block_number,
                format!("{:?}", record.transaction_hash),
                record.log_index,
                record.batch_index,
                format!("{:?}", record.contract_address),
                record.event_name,
                record.operator.map(|op| format!("{op:?}")),
                format!("{:?}", record.from_address),
                format!("{:?}", record.to_address),
                record.token_id.to_string(),
                record.amount.to_string(),
                record.timestamp.map(|ts| ts.to_rfc3339()),
                record.block_hash.map(|hash| format!("{hash:?}")),
                record.tx_value.map(|value| value.to_string()),
                record.gas,
                record.gas_price.map(|price| price.to_string()),
            ])?;
        }

        Ok(count)
    }

    pub fn delete_since(&self, partition: &str, since_block: u64) -> Result<usize> {
        let deleted = self
            .conn
            .execute(Self::DELETE_SINCE, params![partition, since_block])?;
        Ok(deleted)
    }

    pub fn query_transfers(
        &self,
        filter: &TransferFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransferRecord>> {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(partition) = &filter.partition {
            conditions.push("partition = ?");
            params.push(Box::new(partition.clone()));
        }

        if let Some(contract) = filter.contract {
            conditions.push("contract_address = ?");
            params.push(Box::new(format!("{contract:?}")));
        }

        if let Some(token_id) = filter.token_id {
            conditions.push("token_id = ?");
            params.push(Box::new(token_id.to_string()));
        }

        if let Some(from) = filter.from {
            conditions.push("from_address = ?");
            params.push(Box::new(format!("{from:?}")));
        }

        if let Some(to) = filter.to {
            conditions.push("to_address = ?");
            params.push(Box::new(format!("{to:?}")));
        }

        if let Some(address) = filter.address {
            let address_str = format!("{address:?}");
            conditions.push("(from_address = ? OR to_address = ?)");
            params.push(Box::new(address_str.clone()));
            params.push(Box::new(address_str));
        }

        if let Some((start, end)) = filter.block_range {
            conditions.push("block_number >= ?");
            params.push(Box::new(start));
            conditions.push("block_number <= ?");
            params.push(Box::new(end));
        }

        self.execute_paginated_query(conditions, params, limit, offset)
    }

    pub fn all_transfers(&self, partition: &str) -> Result<Vec<TransferRecord>> {
        let filter = TransferFilter {
            partition: Some(partition.to_string()),
            ..Default::default()
        };
        self.query_transfers(&filter, i64::MAX as usize, 0)
    }

    pub fn count(&self, partition: &str) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM transfers WHERE partition = ?1",
            params![partition],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn get_statistics(&self) -> Result<TransferStats> {
        let total_transfers: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM transfers", [], |row| row.get(0))?;

        let unique_tokens: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM (SELECT DISTINCT contract_address, token_id FROM transfers)",
            [],
            |row| row.get(0),
        )?;

        let unique_addresses: usize = self.conn.query_row(
            "SELECT COUNT(DISTINCT address) FROM (
                SELECT from_address as address FROM transfers
                UNION
                SELECT to_address as address FROM transfers
            )",
            [],
            |row| row.get(0),
        )?;

        let (earliest_block, latest_block): (Option<u64>, Option<u64>) = self.conn.query_row(
            "SELECT MIN(block_number), MAX(block_number) FROM transfers",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(TransferStats {
            total_transfers,
            unique_tokens,
            unique_addresses,
            earliest_block,
            latest_block,
        })
    }

    fn execute_paginated_query(
        &self,
        conditions: Vec<&str>,
        params: Vec<Box<dyn ToSql>>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransferRecord>> {
        let mut query = Self::SELECT_TRANSFER.to_string();

        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }

        query.push_str(Self::ORDER_BY_POSITION);
        query.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));

        let mut stmt = self.conn.prepare(&query)?;
        let transfers = stmt
            .query_map(params_from_iter(params), Self::row_to_transfer)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(transfers)
    }

    fn row_to_transfer(row: &Row) -> rusqlite::Result<TransferRecord> {
        let transaction_hash = parse_column::<B256>(row, 1)?;
        let contract_address = parse_column::<Address>(row, 4)?;
        let operator = parse_optional_column::<Address>(row, 6)?;
        let from_address = parse_column::<Address>(row, 7)?;
        let to_address = parse_column::<Address>(row, 8)?;
        let token_id = parse_column::<U256>(row, 9)?;
        let amount = parse_column::<U256>(row, 10)?;
        let timestamp = row
            .get::<_, Option<String>>(11)?
            .map(|ts| {
                DateTime::parse_from_rfc3339(&ts)
                    .map(|ts| ts.with_timezone(&Utc))
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            11,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })
            })
            .transpose()?;

        Ok(TransferRecord {
            block_number: row.get(0)?,
            transaction_hash,
            log_index: row.get(2)?,
            batch_index: row.get(3)?,
            contract_address,
            event_name: row.get(5)?,
            operator,
            from_address,
            to_address,
            token_id,
            amount,
            timestamp,
            block_hash: parse_optional_column::<B256>(row, 12)?,
            tx_value: parse_optional_column::<U256>(row, 13)?,
            gas: row.get(14)?,
            gas_price: parse_optional_column::<u128>(row, 15)?,
        })
    }
}

fn parse_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    row.get::<_, String>(idx)?.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_optional_column<T>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    row.get::<_, Option<String>>(idx)?
        .map(|value| {
            value.parse::<T>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()
}

#[derive(Debug)]
pub struct TransferStats {
    pub total_transfers: usize,
    pub unique_tokens: usize,
    pub unique_addresses: usize,
    pub earliest_block: Option<u64>,
    pub latest_block: Option<u64>,
}
