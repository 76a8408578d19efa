use anyhow::{Context, Result};
use clap::Parser;
use nft_event_scanner::config::{Config, StateBackend};
use nft_event_scanner::deployment::{find_deployment_block, resolve_deployment_block};
use nft_event_scanner::rpc::{DEFAULT_REQUEST_TIMEOUT, RpcClient};
use nft_event_scanner::scanner::{Partition, PartitionReport, scan_partitions};
use nft_event_scanner::state::{Database, JsonStateStore, SqliteStateStore};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_secs(12);

#[derive(Parser)]
#[command(name = "scan")]
#[command(about = "Scan ERC-721 / ERC-1155 transfer events into local state", long_about = None)]
struct Cli {
    /// Keep polling for new blocks after catching up
    #[arg(long)]
    follow: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting NFT transfer event scanner");

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("Contracts: {:?}", config.contract_addresses);
    info!(
        "RPC URLs: {} endpoint(s) configured",
        config.json_rpc_urls.len()
    );

    let client = RpcClient::new(&config.json_rpc_urls, DEFAULT_REQUEST_TIMEOUT)?;
    info!("RPC client connected");

    loop {
        let pass_start = Instant::now();

        if let Err(e) = run_pass(&config, &client).await {
            error!("Scan error: {:#}", e);
            if !cli.follow {
                return Err(e);
            }
        }

        if !cli.follow {
            break;
        }

        info!(
            "Pass finished in {:.2}s, polling again in {}s",
            pass_start.elapsed().as_secs_f64(),
            POLL_INTERVAL.as_secs()
        );
        sleep(POLL_INTERVAL).await;
    }

    Ok(())
}

async fn run_pass(config: &Config, client: &RpcClient) -> Result<()> {
    let scanner_config = config.scanner_config();

    match config.state_backend {
        StateBackend::Sqlite => {
            let db = Database::new(&config.database_url)?;
            let latest_block = client.get_latest_block().await?;

            let mut partitions = Vec::with_capacity(config.contract_addresses.len());
            for &address in &config.contract_addresses {
                let start_block_floor = match config.start_block {
                    Some(block) => Some(block),
                    None => Some(resolve_deployment_block(client, &db, address, latest_block).await?),
                };
                let name = format!("{address:?}");

                partitions.push(Partition {
                    filters: config.filters_for(&[address]),
                    store: SqliteStateStore::open(&config.database_url, name.clone())?,
                    name,
                    start_block_floor,
                });
            }

            let results = scan_partitions(client.clone(), partitions, &scanner_config).await?;
            for (report, _) in &results {
                log_report(report);
            }
        }
        StateBackend::Json => {
            // One file, one cursor: all contracts are scanned together
            let start_block_floor = match config.start_block {
                Some(block) => Some(block),
                None => {
                    let latest_block = client.get_latest_block().await?;
                    let mut earliest = u64::MAX;
                    for &address in &config.contract_addresses {
                        earliest =
                            earliest.min(find_deployment_block(client, address, latest_block).await?);
                    }
                    Some(earliest)
                }
            };

            let partition = Partition {
                name: config.json_state_path.clone(),
                filters: config.filters_for(&config.contract_addresses),
                store: JsonStateStore::open(&config.json_state_path),
                start_block_floor,
            };

            let results = scan_partitions(client.clone(), vec![partition], &scanner_config).await?;
            for (report, mut store) in results {
                log_report(&report);
                store
                    .save()
                    .with_context(|| format!("Failed to save {}", store.path().display()))?;
            }
        }
    }

    Ok(())
}

fn log_report(report: &PartitionReport) {
    match report.range {
        Some((start, end)) => info!(
            "[{}] Blocks {}-{}: {} events in {} chunks",
            report.name, start, end, report.events, report.chunks
        ),
        None => info!("[{}] Nothing new to scan", report.name),
    }
}
