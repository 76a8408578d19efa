use anyhow::{Context, Result};
use nft_event_scanner::state::Database;

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    dotenv::dotenv().ok();

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set in .env")?;

    println!("Creating scan state tables in database: {database_url}");

    let _db = Database::new(&database_url)?;

    println!("Scan state tables are ready.");

    Ok(())
}
