//! Ledger of blocks that terminally failed.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    error::Result,
    events::{EventBus, TopicEvent},
    ledger::{
        store::{InsertOutcome, LedgerStore},
        AddOutcome, MissedRecord, RecentView, LEDGER_CAP,
    },
};

/// Durable, capped most-recent-first store of failures with stage + reason.
#[derive(Clone)]
pub struct MissedLedger {
    store: LedgerStore,
    view: Arc<Mutex<RecentView<MissedRecord>>>,
    bus: EventBus,
}

impl MissedLedger {
    /// Load the newest records and the full count from the store.
    pub fn load(store: LedgerStore, bus: EventBus) -> Result<Self> {
        let newest = store.recent_missed(LEDGER_CAP)?;
        let count = store.count_missed()?;
        Ok(Self {
            store,
            view: Arc::new(Mutex::new(RecentView::load(newest, count))),
            bus,
        })
    }

    /// Record a missed block. Same commit-then-cache-then-broadcast ordering
    /// as the proved ledger.
    pub async fn add(&self, record: MissedRecord) -> Result<AddOutcome> {
        let mut view = self.view.lock().await;
        if view.contains(record.block) {
            return Ok(AddOutcome::Duplicate);
        }

        match self.store.insert_missed(&record)? {
            InsertOutcome::Duplicate => Ok(AddOutcome::Duplicate),
            InsertOutcome::Inserted => {
                let block = record.block;
                view.insert(record);
                drop(view);

                debug!(block = block, "Recorded missed block");
                self.bus.publish(TopicEvent::MissedBlocksUpdated { block });
                Ok(AddOutcome::Added)
            }
        }
    }

    /// Newest records, at most [`LEDGER_CAP`].
    pub async fn list(&self) -> Vec<MissedRecord> {
        self.view.lock().await.list()
    }

    /// Total number of persisted records (may exceed the view cap).
    pub async fn count(&self) -> u64 {
        self.view.lock().await.count()
    }

    /// Membership in the capped view. Records trimmed out of the view stay
    /// in the store but no longer answer here.
    pub async fn contains(&self, block: u64) -> bool {
        self.view.lock().await.contains(block)
    }

    /// Remove everything, store included. Test hook.
    pub async fn clear(&self) -> Result<()> {
        let mut view = self.view.lock().await;
        self.store.clear_missed()?;
        view.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Stage;

    fn ledger() -> MissedLedger {
        MissedLedger::load(LedgerStore::open_in_memory().unwrap(), EventBus::new()).unwrap()
    }

    #[tokio::test]
    async fn records_carry_stage_and_reason() {
        let ledger = ledger();
        ledger
            .add(MissedRecord::now(
                21_500_200,
                Stage::Proving,
                "Prover crashed: killed",
            ))
            .await
            .unwrap();

        let listed = ledger.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].stage, Stage::Proving);
        assert_eq!(listed[0].reason, "Prover crashed: killed");
    }

    #[tokio::test]
    async fn default_record_uses_unknown_stage() {
        let record = MissedRecord {
            block: 7,
            ..Default::default()
        };
        assert_eq!(record.stage, Stage::Unknown);
        assert_eq!(record.reason, "Unknown error");
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let ledger = ledger();
        let first = MissedRecord::now(500, Stage::InputGen, "timeout");
        let second = MissedRecord::now(500, Stage::Proving, "other");

        assert_eq!(ledger.add(first).await.unwrap(), AddOutcome::Added);
        assert_eq!(ledger.add(second).await.unwrap(), AddOutcome::Duplicate);
        assert_eq!(ledger.count().await, 1);
    }
}
