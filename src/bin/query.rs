use anyhow::Result;
use clap::{Parser, Subcommand};
use nft_event_scanner::query::commands::{
    TransferQuery, cmd_cursors, cmd_export, cmd_stats, cmd_transfers,
};
use nft_event_scanner::query::formatters::OutputFormat;
use nft_event_scanner::state::{CursorRepository, Database, TransferRepository};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "query")]
#[command(about = "Query scanned NFT transfer data", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "table")]
    format: String,

    /// Defaults to DATABASE_URL
    #[arg(long)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct TransferArgs {
    #[arg(long)]
    contract: Option<String>,

    #[arg(long)]
    token_id: Option<String>,

    #[arg(long)]
    from: Option<String>,

    #[arg(long)]
    to: Option<String>,

    /// Transfers where this address is sender or receiver
    #[arg(long)]
    address: Option<String>,

    #[arg(long)]
    block: Option<u64>,

    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    block_range: Option<Vec<u64>>,
}

impl TransferArgs {
    fn into_query(self, limit: usize, offset: usize) -> TransferQuery {
        TransferQuery {
            contract: self.contract,
            token_id: self.token_id,
            from: self.from,
            to: self.to,
            address: self.address,
            block: self.block,
            block_range: self
                .block_range
                .and_then(|v| match v.as_slice() {
                    [start, end] => Some((*start, *end)),
                    _ => None,
                }),
            limit,
            offset,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    Transfers {
        #[command(flatten)]
        filter: TransferArgs,

        #[arg(long, default_value = "100")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },
    Stats,
    /// Last scanned block of every partition
    Cursors,
    /// Write matching transfers to a CSV file
    Export {
        output: PathBuf,

        #[command(flatten)]
        filter: TransferArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    dotenv::dotenv().ok();
    let database_url = cli
        .database
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| "sqlite:./indexer.db".to_string());

    let db = Database::new(&database_url)?;
    let transfer_repo = TransferRepository::new(&db.conn);

    match cli.command {
        Commands::Transfers {
            filter,
            limit,
            offset,
        } => {
            cmd_transfers(&transfer_repo, &filter.into_query(limit, offset), format)?;
        }
        Commands::Stats => {
            cmd_stats(&transfer_repo, format)?;
        }
        Commands::Cursors => {
            cmd_cursors(&CursorRepository::new(&db.conn), format)?;
        }
        Commands::Export { output, filter } => {
            let rows = cmd_export(&transfer_repo, &filter.into_query(0, 0), &output)?;
            println!("Exported {} transfers to {}", rows, output.display());
        }
    }

    Ok(())
}
