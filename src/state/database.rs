use anyhow::{Context, Result};
use rusqlite::Connection;
use std::time::Duration;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn new(db_path: &str) -> Result<Self> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database {db_path}"))?;
        // Partitions write to the same file through separate connections
        conn.busy_timeout(Duration::from_secs(30))?;

        let db = Database { conn };
        db.create_tables()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    fn create_tables(&self) -> Result<()> {
        // One cursor per scan partition
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS scan_state (
                partition TEXT PRIMARY KEY,
                last_scanned_block INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS contracts (
                address TEXT PRIMARY KEY,
                deployment_block INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS transfers (
                partition TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                transaction_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                batch_index INTEGER NOT NULL,
                contract_address TEXT NOT NULL,
                event_name TEXT NOT NULL,
                operator TEXT,
                from_address TEXT NOT NULL,
                to_address TEXT NOT NULL,
                token_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                block_timestamp TEXT,
                block_hash TEXT,
                tx_value TEXT,
                gas INTEGER,
                gas_price TEXT,
                PRIMARY KEY (partition, block_number, transaction_hash, log_index, batch_index)
            )",
            [],
        )?;

        self.add_transaction_columns()?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transfers_block_number
             ON transfers(block_number)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transfers_token
             ON transfers(contract_address, token_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transfers_from
             ON transfers(from_address)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transfers_to
             ON transfers(to_address)",
            [],
        )?;

        Ok(())
    }

    /// Databases created before transaction details were recorded lack these columns.
    fn add_transaction_columns(&self) -> Result<()> {
        let existing = {
            let mut stmt = self.conn.prepare("SELECT name FROM pragma_table_info('transfers')")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            names
        };

        for (column, sql_type) in [
            ("block_hash", "TEXT"),
            ("tx_value", "TEXT"),
            ("gas", "INTEGER"),
            ("gas_price", "TEXT"),
        ] {
            if !existing.iter().any(|name| name == column) {
                self.conn.execute(
                    &format!("ALTER TABLE transfers ADD COLUMN {column} {sql_type}"),
                    [],
                )?;
            }
        }

        Ok(())
    }
}
