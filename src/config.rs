use crate::scanner::{
    DEFAULT_INITIAL_CHUNK_SIZE, DEFAULT_REORG_SAFETY_BLOCKS, DEFAULT_START_BLOCK_FLOOR,
    EventFilter, ScannerConfig, chunk, retry,
};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStandard {
    Erc721,
    Erc1155,
}

impl FromStr for EventStandard {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "erc721" | "erc-721" => Ok(EventStandard::Erc721),
            "erc1155" | "erc-1155" => Ok(EventStandard::Erc1155),
            other => anyhow::bail!("Unknown event standard: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBackend {
    Sqlite,
    Json,
}

impl FromStr for StateBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StateBackend::Sqlite),
            "json" => Ok(StateBackend::Json),
            other => anyhow::bail!("Unknown state backend: {}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub json_rpc_urls: Vec<String>,
    pub contract_addresses: Vec<Address>,
    pub event_standards: Vec<EventStandard>,
    pub database_url: String,
    pub state_backend: StateBackend,
    pub json_state_path: String,
    pub min_chunk_size: u64,
    pub max_chunk_size: u64,
    pub chunk_size_increase_factor: f64,
    pub max_request_retries: u32,
    pub request_retry_delay: Duration,
    pub reorg_safety_blocks: u64,
    pub initial_chunk_size: u64,
    /// When unset, each contract starts at its deployment block.
    pub start_block: Option<u64>,
    pub fetch_transaction_details: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let urls = var("JSON_RPC_URLS")
            .or_else(|| var("JSON_RPC_URL"))
            .context("JSON_RPC_URLS must be set in .env")?;
        let json_rpc_urls = split_list(&urls);
        if json_rpc_urls.is_empty() {
            anyhow::bail!("JSON_RPC_URLS contains no URL");
        }

        let addresses =
            var("CONTRACT_ADDRESSES").context("CONTRACT_ADDRESSES must be set in .env")?;
        let contract_addresses = split_list(&addresses)
            .iter()
            .map(|s| {
                Address::from_str(s).with_context(|| format!("Invalid contract address: {}", s))
            })
            .collect::<Result<Vec<_>>>()?;
        if contract_addresses.is_empty() {
            anyhow::bail!("CONTRACT_ADDRESSES contains no address");
        }

        let event_standards = match var("EVENT_STANDARDS") {
            Some(value) => split_list(&value)
                .iter()
                .map(|s| s.parse::<EventStandard>())
                .collect::<Result<Vec<_>>>()
                .context("Invalid EVENT_STANDARDS")?,
            None => vec![EventStandard::Erc721, EventStandard::Erc1155],
        };

        let state_backend = match var("STATE_BACKEND") {
            Some(value) => value.parse::<StateBackend>().context("Invalid STATE_BACKEND")?,
            None => StateBackend::Sqlite,
        };

        Ok(Config {
            json_rpc_urls,
            contract_addresses,
            event_standards,
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite:./indexer.db".to_string()),
            state_backend,
            json_state_path: var("JSON_STATE_PATH").unwrap_or_else(|| "scan-state.json".to_string()),
            min_chunk_size: parse_or(&var, "MIN_CHUNK_SIZE", chunk::DEFAULT_MIN_CHUNK_SIZE)?,
            max_chunk_size: parse_or(&var, "MAX_CHUNK_SIZE", chunk::DEFAULT_MAX_CHUNK_SIZE)?,
            chunk_size_increase_factor: parse_or(
                &var,
                "CHUNK_SIZE_INCREASE_FACTOR",
                chunk::DEFAULT_CHUNK_SIZE_INCREASE_FACTOR,
            )?,
            max_request_retries: parse_or(
                &var,
                "MAX_REQUEST_RETRIES",
                retry::DEFAULT_MAX_REQUEST_RETRIES,
            )?,
            request_retry_delay: match var("REQUEST_RETRY_SECONDS") {
                Some(value) => parse_seconds(&value)
                    .with_context(|| format!("Invalid REQUEST_RETRY_SECONDS: {}", value))?,
                None => retry::DEFAULT_REQUEST_RETRY_DELAY,
            },
            reorg_safety_blocks: parse_or(
                &var,
                "REORG_SAFETY_BLOCKS",
                DEFAULT_REORG_SAFETY_BLOCKS,
            )?,
            initial_chunk_size: parse_or(&var, "INITIAL_CHUNK_SIZE", DEFAULT_INITIAL_CHUNK_SIZE)?,
            start_block: var("START_BLOCK")
                .map(|v| v.trim().parse::<u64>().context("Invalid START_BLOCK"))
                .transpose()?,
            fetch_transaction_details: parse_or(&var, "FETCH_TRANSACTION_DETAILS", true)?,
        })
    }

    pub fn scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            min_chunk_size: self.min_chunk_size,
            max_chunk_size: self.max_chunk_size,
            chunk_size_increase_factor: self.chunk_size_increase_factor,
            max_request_retries: self.max_request_retries,
            request_retry_delay: self.request_retry_delay,
            reorg_safety_blocks: self.reorg_safety_blocks,
            initial_chunk_size: self.initial_chunk_size,
            start_block_floor: self.start_block.unwrap_or(DEFAULT_START_BLOCK_FLOOR),
            fetch_transaction_details: self.fetch_transaction_details,
        }
    }

    /// Log filters over `addresses`, one per configured event.
    pub fn filters_for(&self, addresses: &[Address]) -> Vec<EventFilter> {
        let mut filters = Vec::new();
        for standard in &self.event_standards {
            match standard {
                EventStandard::Erc721 => {
                    filters.push(EventFilter::erc721_transfer(addresses.to_vec()));
                }
                EventStandard::Erc1155 => {
                    filters.push(EventFilter::erc1155_transfer_single(addresses.to_vec()));
                    filters.push(EventFilter::erc1155_transfer_batch(addresses.to_vec()));
                }
            }
        }
        filters
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Fractional seconds, e.g. `0.5`.
fn parse_seconds(value: &str) -> Result<Duration> {
    let seconds = value.trim().parse::<f64>()?;
    Ok(Duration::try_from_secs_f64(seconds)?)
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid {}: {}", key, value)),
        None => Ok(default),
    }
}
