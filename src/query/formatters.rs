use crate::state::{TransferRecord, TransferStats};
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use anyhow::Result;
use csv::Writer;
use serde_json::json;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

pub fn format_transfers(transfers: &[TransferRecord], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(format_transfers_table(transfers)),
        OutputFormat::Json => format_transfers_json(transfers),
        OutputFormat::Csv => {
            let mut buffer = Vec::new();
            write_transfers_csv(&mut buffer, transfers)?;
            Ok(String::from_utf8(buffer)?)
        }
    }
}

fn format_transfers_table(transfers: &[TransferRecord]) -> String {
    if transfers.is_empty() {
        return "No transfers found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            "Block", "Time", "Event", "Contract", "Token ID", "Amount", "From", "To", "Tx Hash",
            "Tx Value", "Gas",
        ]);

    for transfer in transfers {
        table.add_row(vec![
            Cell::new(transfer.block_number),
            Cell::new(format_timestamp(transfer)),
            Cell::new(format!("{} ({})", transfer.event_name, transfer.movement())),
            Cell::new(format!("{:#}", transfer.contract_address)),
            Cell::new(transfer.token_id.to_string()),
            Cell::new(transfer.amount.to_string()),
            Cell::new(format!("{:#}", transfer.from_address)),
            Cell::new(format!("{:#}", transfer.to_address)),
            Cell::new(format_tx_hash(&format!("{:?}", transfer.transaction_hash))),
            Cell::new(transfer.tx_value.map_or("-".to_string(), |v| v.to_string())),
            Cell::new(transfer.gas.map_or("-".to_string(), |g| g.to_string())),
        ]);
    }

    table.to_string()
}

fn format_transfers_json(transfers: &[TransferRecord]) -> Result<String> {
    let json_transfers: Vec<_> = transfers
        .iter()
        .map(|t| {
            json!({
                "block_number": t.block_number,
                "block_hash": t.block_hash.map(|h| format!("{h:?}")),
                "timestamp": t.timestamp.map(|ts| ts.to_rfc3339()),
                "transaction_hash": format!("{:?}", t.transaction_hash),
                "log_index": t.log_index,
                "batch_index": t.batch_index,
                "event": t.event_name,
                "movement": t.movement(),
                "contract": format!("{:?}", t.contract_address),
                "operator": t.operator.map(|op| format!("{op:?}")),
                "from": format!("{:?}", t.from_address),
                "to": format!("{:?}", t.to_address),
                "token_id": t.token_id.to_string(),
                "amount": t.amount.to_string(),
                "tx_value": t.tx_value.map(|v| v.to_string()),
                "gas": t.gas,
                "gas_price": t.gas_price.map(|p| p.to_string()),
            })
        })
        .collect();

    Ok(serde_json::to_string_pretty(&json_transfers)?)
}

/// Writes `transfers` as CSV with a header row.
pub fn write_transfers_csv<W: Write>(writer: W, transfers: &[TransferRecord]) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);

    wtr.write_record([
        "block_number",
        "timestamp",
        "transaction_hash",
        "log_index",
        "batch_index",
        "event",
        "contract",
        "operator",
        "from",
        "to",
        "token_id",
        "amount",
        "tx_value",
        "gas",
        "gas_price",
        "block_hash",
    ])?;

    for t in transfers {
        wtr.write_record([
            t.block_number.to_string(),
            t.timestamp.map(|ts| ts.to_rfc3339()).unwrap_or_default(),
            format!("{:?}", t.transaction_hash),
            t.log_index.to_string(),
            t.batch_index.to_string(),
            t.event_name.clone(),
            format!("{:?}", t.contract_address),
            t.operator.map(|op| format!("{op:?}")).unwrap_or_default(),
            format!("{:?}", t.from_address),
            format!("{:?}", t.to_address),
            t.token_id.to_string(),
            t.amount.to_string(),
            t.tx_value.map(|v| v.to_string()).unwrap_or_default(),
            t.gas.map(|g| g.to_string()).unwrap_or_default(),
            t.gas_price.map(|p| p.to_string()).unwrap_or_default(),
            t.block_hash.map(|h| format!("{h:?}")).unwrap_or_default(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

fn csv_to_string(rows: &[[&str; 2]]) -> Result<String> {
    let mut buffer = Vec::new();
    {
        let mut wtr = Writer::from_writer(&mut buffer);
        for row in rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
    }
    Ok(String::from_utf8(buffer)?)
}

pub fn format_stats(stats: &TransferStats, format: OutputFormat) -> Result<String> {
    let block = |b: Option<u64>| b.map_or("N/A".to_string(), |b| b.to_string());
    let rows = [
        ("total_transfers", "Total Transfers", stats.total_transfers.to_string()),
        ("unique_tokens", "Unique Tokens", stats.unique_tokens.to_string()),
        ("unique_addresses", "Unique Addresses", stats.unique_addresses.to_string()),
        ("earliest_block", "Earliest Block", block(stats.earliest_block)),
        ("latest_block", "Latest Block", block(stats.latest_block)),
    ];

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Metric", "Value"]);

            for (_, label, value) in &rows {
                table.add_row(vec![Cell::new(label), Cell::new(value)]);
            }

            Ok(table.to_string())
        }
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&json!({
            "total_transfers": stats.total_transfers,
            "unique_tokens": stats.unique_tokens,
            "unique_addresses": stats.unique_addresses,
            "earliest_block": stats.earliest_block,
            "latest_block": stats.latest_block,
        }))?),
        OutputFormat::Csv => {
            let mut csv_rows = vec![["metric", "value"]];
            csv_rows.extend(rows.iter().map(|(key, _, value)| [*key, value.as_str()]));
            csv_to_string(&csv_rows)
        }
    }
}

/// Scan cursors as `(partition, last_scanned_block)`.
pub fn format_cursors(cursors: &[(String, u64)], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Table => {
            if cursors.is_empty() {
                return Ok("Nothing scanned yet.".to_string());
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Partition", "Last Scanned Block"]);

            for (partition, block) in cursors {
                table.add_row(vec![Cell::new(partition), Cell::new(block)]);
            }

            Ok(table.to_string())
        }
        OutputFormat::Json => {
            let json_cursors: Vec<_> = cursors
                .iter()
                .map(|(partition, block)| {
                    json!({ "partition": partition, "last_scanned_block": block })
                })
                .collect();
            Ok(serde_json::to_string_pretty(&json_cursors)?)
        }
        OutputFormat::Csv => {
            let blocks: Vec<String> = cursors.iter().map(|(_, block)| block.to_string()).collect();
            let mut csv_rows = vec![["partition", "last_scanned_block"]];
            csv_rows.extend(
                cursors
                    .iter()
                    .zip(&blocks)
                    .map(|((partition, _), block)| [partition.as_str(), block.as_str()]),
            );
            csv_to_string(&csv_rows)
        }
    }
}

fn format_timestamp(transfer: &TransferRecord) -> String {
    transfer
        .timestamp
        .map_or("-".to_string(), |ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn format_tx_hash(hash: &str) -> String {
    if hash.len() <= 12 {
        return hash.to_string();
    }
    format!("{}...{}", &hash[..6], &hash[hash.len() - 4..])
}
