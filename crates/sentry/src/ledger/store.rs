//! SQLite backing store for the ledgers.
//!
//! One file, two tables, each unique on `block_number`. Both ledgers share
//! the connection; all statements are short and run under the connection
//! lock.

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::{
    error::Result,
    ledger::{MissedRecord, ProvedRecord, Stage},
};

/// Result of a store insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The unique `block_number` constraint rejected the row.
    Duplicate,
}

/// Shared handle to the ledger database.
#[derive(Clone)]
pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerStore {
    /// Open (or create) the store at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS proved_blocks (
                block_number INTEGER PRIMARY KEY,
                proved_at INTEGER NOT NULL,
                proving_duration_seconds INTEGER,
                input_generation_duration_seconds INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS missed_blocks (
                block_number INTEGER PRIMARY KEY,
                failed_at INTEGER NOT NULL,
                stage TEXT NOT NULL,
                reason TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn insert_proved(&self, record: &ProvedRecord) -> Result<InsertOutcome> {
        let now = Utc::now().timestamp();
        let result = self.conn.lock().expect("store lock").execute(
            "INSERT INTO proved_blocks (block_number, proved_at, proving_duration_seconds,
                 input_generation_duration_seconds, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                record.block,
                record.proved_at.timestamp(),
                record.proving_seconds,
                record.input_gen_seconds,
                now,
            ],
        );
        map_insert(result)
    }

    pub fn insert_missed(&self, record: &MissedRecord) -> Result<InsertOutcome> {
        let now = Utc::now().timestamp();
        let result = self.conn.lock().expect("store lock").execute(
            "INSERT INTO missed_blocks (block_number, failed_at, stage, reason,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                record.block,
                record.failed_at.timestamp(),
                record.stage.as_str(),
                record.reason,
                now,
            ],
        );
        map_insert(result)
    }

    /// Newest `limit` proved rows, descending by `proved_at`.
    pub fn recent_proved(&self, limit: usize) -> Result<Vec<ProvedRecord>> {
        let conn = self.conn.lock().expect("store lock");
        let mut statement = conn.prepare(
            "SELECT block_number, proved_at, proving_duration_seconds,
                    input_generation_duration_seconds
             FROM proved_blocks ORDER BY proved_at DESC, block_number DESC LIMIT ?1",
        )?;
        let rows = statement.query_map([limit as i64], |row| {
            Ok(ProvedRecord {
                block: row.get(0)?,
                proved_at: timestamp(row.get(1)?),
                proving_seconds: row.get(2)?,
                input_gen_seconds: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Newest `limit` missed rows, descending by `failed_at`.
    pub fn recent_missed(&self, limit: usize) -> Result<Vec<MissedRecord>> {
        let conn = self.conn.lock().expect("store lock");
        let mut statement = conn.prepare(
            "SELECT block_number, failed_at, stage, reason
             FROM missed_blocks ORDER BY failed_at DESC, block_number DESC LIMIT ?1",
        )?;
        let rows = statement.query_map([limit as i64], |row| {
            Ok(MissedRecord {
                block: row.get(0)?,
                failed_at: timestamp(row.get(1)?),
                stage: Stage::from_db(&row.get::<_, String>(2)?),
                reason: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn count_proved(&self) -> Result<u64> {
        self.count("proved_blocks")
    }

    pub fn count_missed(&self) -> Result<u64> {
        self.count("missed_blocks")
    }

    pub fn contains_proved(&self, block: u64) -> Result<bool> {
        self.contains("proved_blocks", block)
    }

    pub fn contains_missed(&self, block: u64) -> Result<bool> {
        self.contains("missed_blocks", block)
    }

    pub fn clear_proved(&self) -> Result<()> {
        self.conn
            .lock()
            .expect("store lock")
            .execute("DELETE FROM proved_blocks", [])?;
        Ok(())
    }

    pub fn clear_missed(&self) -> Result<()> {
        self.conn
            .lock()
            .expect("store lock")
            .execute("DELETE FROM missed_blocks", [])?;
        Ok(())
    }

    fn count(&self, table: &str) -> Result<u64> {
        let conn = self.conn.lock().expect("store lock");
        let count: u64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
        Ok(count)
    }

    fn contains(&self, table: &str, block: u64) -> Result<bool> {
        let conn = self.conn.lock().expect("store lock");
        let found: Option<u64> = conn
            .query_row(
                &format!("SELECT block_number FROM {table} WHERE block_number = ?1"),
                [block],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn map_insert(result: std::result::Result<usize, rusqlite::Error>) -> Result<InsertOutcome> {
    match result {
        Ok(_) => Ok(InsertOutcome::Inserted),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == ErrorCode::ConstraintViolation =>
        {
            Ok(InsertOutcome::Duplicate)
        }
        Err(e) => Err(e.into()),
    }
}

fn timestamp(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MissedRecord;

    fn proved(block: u64, at: i64) -> ProvedRecord {
        ProvedRecord {
            block,
            proved_at: timestamp(at),
            proving_seconds: Some(17),
            input_gen_seconds: None,
        }
    }

    #[test]
    fn insert_rejects_duplicate_blocks() {
        let store = LedgerStore::open_in_memory().unwrap();
        assert_eq!(
            store.insert_proved(&proved(100, 1)).unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_proved(&proved(100, 2)).unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(store.count_proved().unwrap(), 1);
    }

    #[test]
    fn recent_returns_newest_first() {
        let store = LedgerStore::open_in_memory().unwrap();
        for (block, at) in [(100, 10), (200, 30), (300, 20)] {
            store.insert_proved(&proved(block, at)).unwrap();
        }

        let rows = store.recent_proved(2).unwrap();
        let blocks: Vec<u64> = rows.iter().map(|r| r.block).collect();
        assert_eq!(blocks, vec![200, 300]);
    }

    #[test]
    fn missed_round_trips_stage_and_reason() {
        let store = LedgerStore::open_in_memory().unwrap();
        let record = MissedRecord {
            block: 400,
            failed_at: timestamp(50),
            stage: Stage::Proving,
            reason: "Proving failed (exit_status:1): no artifacts".into(),
        };
        store.insert_missed(&record).unwrap();

        let rows = store.recent_missed(10).unwrap();
        assert_eq!(rows, vec![record]);
        assert!(store.contains_missed(400).unwrap());
        assert!(!store.contains_missed(500).unwrap());
    }
}
