//! Durable block-outcome ledgers.
//!
//! Two append-only ledgers record the terminal outcome of every target
//! block: [`proved::ProvedLedger`] for successful proofs and
//! [`missed::MissedLedger`] for failures with their stage and reason. Both
//! share one SQLite store (a table each) and keep a capped most-recent-first
//! in-memory view for the status surface.
//!
//! Durability ordering: the store insert commits before the in-memory view
//! updates, and the realtime broadcast fires only after the commit.

use chrono::{DateTime, Utc};

pub mod missed;
pub mod proved;
pub mod store;

/// In-memory view cap. The store itself is unbounded.
pub const LEDGER_CAP: usize = 100;

/// Outcome of an `add` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// The block already has a record; nothing was written.
    Duplicate,
}

/// Pipeline stage a missed block failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    InputGen,
    Proving,
    Unknown,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::InputGen => "input_generation",
            Stage::Proving => "proving",
            Stage::Unknown => "unknown",
        }
    }

    /// Stored values parse back; anything unexpected degrades to `Unknown`.
    pub fn from_db(value: &str) -> Self {
        match value {
            "input_generation" => Self::InputGen,
            "proving" => Self::Proving,
            _ => Self::Unknown,
        }
    }
}

/// A successfully proved block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvedRecord {
    pub block: u64,
    pub proved_at: DateTime<Utc>,
    pub proving_seconds: Option<u32>,
    pub input_gen_seconds: Option<u32>,
}

/// A block that terminally failed, with where and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissedRecord {
    pub block: u64,
    pub failed_at: DateTime<Utc>,
    pub stage: Stage,
    pub reason: String,
}

impl MissedRecord {
    /// Record with the sparse-metadata defaults filled in.
    pub fn now(block: u64, stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            block,
            failed_at: Utc::now(),
            stage,
            reason: reason.into(),
        }
    }
}

impl Default for MissedRecord {
    fn default() -> Self {
        Self {
            block: 0,
            failed_at: Utc::now(),
            stage: Stage::Unknown,
            reason: "Unknown error".to_string(),
        }
    }
}

/// A record with a block id and an outcome timestamp, orderable into the
/// capped view.
pub trait RecentRecord {
    fn block(&self) -> u64;
    fn at(&self) -> DateTime<Utc>;
}

impl RecentRecord for ProvedRecord {
    fn block(&self) -> u64 {
        self.block
    }
    fn at(&self) -> DateTime<Utc> {
        self.proved_at
    }
}

impl RecentRecord for MissedRecord {
    fn block(&self) -> u64 {
        self.block
    }
    fn at(&self) -> DateTime<Utc> {
        self.failed_at
    }
}

/// Capped most-recent-first view plus the dedupe set and the full count.
#[derive(Debug)]
pub(crate) struct RecentView<R> {
    records: Vec<R>,
    blocks: std::collections::HashSet<u64>,
    count: u64,
}

impl<R: RecentRecord + Clone> RecentView<R> {
    /// Build from the newest rows of the store (already sorted descending)
    /// and the full row count.
    pub(crate) fn load(newest_first: Vec<R>, count: u64) -> Self {
        let blocks = newest_first.iter().map(RecentRecord::block).collect();
        Self {
            records: newest_first,
            blocks,
            count,
        }
    }

    pub(crate) fn contains(&self, block: u64) -> bool {
        self.blocks.contains(&block)
    }

    pub(crate) fn list(&self) -> Vec<R> {
        self.records.clone()
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    /// Insert a committed record, keeping descending timestamp order and the
    /// cap. A trimmed tail block leaves the set (it stays in the store).
    pub(crate) fn insert(&mut self, record: R) {
        let position = self
            .records
            .iter()
            .position(|existing| existing.at() <= record.at())
            .unwrap_or(self.records.len());
        self.blocks.insert(record.block());
        self.records.insert(position, record);
        self.count += 1;

        while self.records.len() > LEDGER_CAP {
            if let Some(dropped) = self.records.pop() {
                self.blocks.remove(&dropped.block());
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.blocks.clear();
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proved(block: u64, at: i64) -> ProvedRecord {
        ProvedRecord {
            block,
            proved_at: DateTime::from_timestamp(at, 0).unwrap(),
            proving_seconds: None,
            input_gen_seconds: None,
        }
    }

    #[test]
    fn view_keeps_newest_first_and_caps() {
        let mut view = RecentView::load(Vec::new(), 0);
        for i in 0..105u64 {
            view.insert(proved(i, 1_000 + i as i64));
        }

        assert_eq!(view.count(), 105);
        let listed = view.list();
        assert_eq!(listed.len(), LEDGER_CAP);
        assert_eq!(listed[0].block, 104);
        assert_eq!(listed[LEDGER_CAP - 1].block, 5);
        assert!(!view.contains(4));
        assert!(view.contains(104));
    }

    #[test]
    fn out_of_order_timestamps_sort_descending() {
        let mut view = RecentView::load(Vec::new(), 0);
        view.insert(proved(1, 2_000));
        view.insert(proved(2, 1_000));
        view.insert(proved(3, 3_000));

        let blocks: Vec<u64> = view.list().iter().map(|r| r.block).collect();
        assert_eq!(blocks, vec![3, 1, 2]);
    }

    #[test]
    fn stage_round_trips_and_degrades() {
        for stage in [Stage::InputGen, Stage::Proving, Stage::Unknown] {
            assert_eq!(Stage::from_db(stage.as_str()), stage);
        }
        assert_eq!(Stage::from_db("garbage"), Stage::Unknown);
    }
}
