use super::models::Contract;
use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::{OptionalExtension, params};

/// Scan cursors per partition, plus the cached deployment block of each contract.
pub struct CursorRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> CursorRepository<'a> {
    const GET_LAST_SCANNED_BLOCK: &'static str =
        "SELECT last_scanned_block FROM scan_state WHERE partition = ?1";

    // The cursor only moves forward here; rollback goes through `lower_last_scanned_block`
    const ADVANCE_LAST_SCANNED_BLOCK: &'static str =
        "INSERT INTO scan_state (partition, last_scanned_block) VALUES (?1, ?2)
         ON CONFLICT(partition) DO UPDATE
         SET last_scanned_block = MAX(last_scanned_block, excluded.last_scanned_block)";

    const LOWER_LAST_SCANNED_BLOCK: &'static str =
        "UPDATE scan_state SET last_scanned_block = ?1
         WHERE partition = ?2 AND last_scanned_block > ?1";

    const LIST_CURSORS: &'static str =
        "SELECT partition, last_scanned_block FROM scan_state ORDER BY partition";

    const INSERT_CONTRACT: &'static str =
        "INSERT OR IGNORE INTO contracts (address, deployment_block) VALUES (?1, ?2)";

    const GET_DEPLOYMENT_BLOCK: &'static str =
        "SELECT deployment_block FROM contracts WHERE address = ?1";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn get_last_scanned_block(&self, partition: &str) -> Result<Option<u64>> {
        let block: Option<u64> = self
            .conn
            .query_row(Self::GET_LAST_SCANNED_BLOCK, params![partition], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(block)
    }

    pub fn advance_last_scanned_block(&self, partition: &str, block_number: u64) -> Result<()> {
        self.conn.execute(
            Self::ADVANCE_LAST_SCANNED_BLOCK,
            params![partition, block_number],
        )?;
        Ok(())
    }

    pub fn lower_last_scanned_block(&self, partition: &str, block_number: u64) -> Result<()> {
        self.conn.execute(
            Self::LOWER_LAST_SCANNED_BLOCK,
            params![block_number, partition],
        )?;
        Ok(())
    }

    pub fn list_cursors(&self) -> Result<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(Self::LIST_CURSORS)?;
        let cursors = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cursors)
    }

    pub fn insert_contract(&self, contract: &Contract) -> Result<()> {
        self.conn.execute(
            Self::INSERT_CONTRACT,
            params![format!("{:?}", contract.address), contract.deployment_block],
        )?;
        Ok(())
    }

    pub fn get_deployment_block(&self, address: &Address) -> Result<Option<u64>> {
        let block: Option<u64> = self
            .conn
            .query_row(
                Self::GET_DEPLOYMENT_BLOCK,
                params![format!("{:?}", address)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Database;

    #[test]
    fn cursor_only_advances() {
        let db = Database::in_memory().unwrap();
        let repo = CursorRepository::new(&db.conn);

        assert_eq!(repo.get_last_scanned_block("a").unwrap(), None);

        repo.advance_last_scanned_block("a", 50).unwrap();
        repo.advance_last_scanned_block("a", 30).unwrap();
        assert_eq!(repo.get_last_scanned_block("a").unwrap(), Some(50));

        repo.lower_last_scanned_block("a", 20).unwrap();
        assert_eq!(repo.get_last_scanned_block("a").unwrap(), Some(20));

        repo.lower_last_scanned_block("a", 40).unwrap();
        assert_eq!(repo.get_last_scanned_block("a").unwrap(), Some(20));
    }

    #[test]
    fn partitions_are_independent() {
        let db = Database::in_memory().unwrap();
        let repo = CursorRepository::new(&db.conn);

        repo.advance_last_scanned_block("a", 10).unwrap();
        repo.advance_last_scanned_block("b", 99).unwrap();

        assert_eq!(
            repo.list_cursors().unwrap(),
            vec![("a".to_string(), 10), ("b".to_string(), 99)]
        );
    }

    #[test]
    fn deployment_block_is_cached() {
        let db = Database::in_memory().unwrap();
        let repo = CursorRepository::new(&db.conn);
        let address = Address::repeat_byte(0x42);

        assert_eq!(repo.get_deployment_block(&address).unwrap(), None);
        repo.insert_contract(&Contract {
            address,
            deployment_block: 1_234,
        })
        .unwrap();
        assert_eq!(repo.get_deployment_block(&address).unwrap(), Some(1_234));
    }
}
