//! Ledger of successfully proved blocks.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    error::Result,
    events::{EventBus, TopicEvent},
    ledger::{
        store::{InsertOutcome, LedgerStore},
        AddOutcome, ProvedRecord, RecentView, LEDGER_CAP,
    },
};

/// Durable, capped most-recent-first store of successful proofs.
#[derive(Clone)]
pub struct ProvedLedger {
    store: LedgerStore,
    view: Arc<Mutex<RecentView<ProvedRecord>>>,
    bus: EventBus,
}

impl ProvedLedger {
    /// Load the newest records and the full count from the store.
    pub fn load(store: LedgerStore, bus: EventBus) -> Result<Self> {
        let newest = store.recent_proved(LEDGER_CAP)?;
        let count = store.count_proved()?;
        Ok(Self {
            store,
            view: Arc::new(Mutex::new(RecentView::load(newest, count))),
            bus,
        })
    }

    /// Record a proved block. The store commit happens before the in-memory
    /// view updates; the broadcast fires after the commit.
    pub async fn add(&self, record: ProvedRecord) -> Result<AddOutcome> {
        let mut view = self.view.lock().await;
        if view.contains(record.block) {
            return Ok(AddOutcome::Duplicate);
        }

        match self.store.insert_proved(&record)? {
            InsertOutcome::Duplicate => Ok(AddOutcome::Duplicate),
            InsertOutcome::Inserted => {
                let block = record.block;
                view.insert(record);
                drop(view);

                debug!(block = block, "Recorded proved block");
                self.bus.publish(TopicEvent::ProvedBlocksUpdated { block });
                Ok(AddOutcome::Added)
            }
        }
    }

    /// Newest records, at most [`LEDGER_CAP`].
    pub async fn list(&self) -> Vec<ProvedRecord> {
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
        self.store.clear_proved()?;
        view.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn record(block: u64, at: i64) -> ProvedRecord {
        ProvedRecord {
            block,
            proved_at: DateTime::from_timestamp(at, 0).unwrap(),
            proving_seconds: Some(17),
            input_gen_seconds: Some(3),
        }
    }

    fn ledger() -> ProvedLedger {
        ProvedLedger::load(LedgerStore::open_in_memory().unwrap(), EventBus::new()).unwrap()
    }

    #[tokio::test]
    async fn repeated_add_is_duplicate_and_count_is_stable() {
        let ledger = ledger();
        assert_eq!(
            ledger.add(record(21_500_100, 1)).await.unwrap(),
            AddOutcome::Added
        );
        assert_eq!(
            ledger.add(record(21_500_100, 2)).await.unwrap(),
            AddOutcome::Duplicate
        );
        assert_eq!(ledger.count().await, 1);
    }

    #[tokio::test]
    async fn add_publishes_after_commit() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let ledger = ProvedLedger::load(LedgerStore::open_in_memory().unwrap(), bus).unwrap();

        ledger.add(record(300, 1)).await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            TopicEvent::ProvedBlocksUpdated { block: 300 }
        ));
        assert!(ledger.contains(300).await);
    }

    #[tokio::test]
    async fn trimming_caps_the_view_but_not_the_count() {
        let ledger = ledger();
        for i in 1..=(LEDGER_CAP as u64 + 5) {
            ledger.add(record(i * 100, i as i64)).await.unwrap();
        }

        assert_eq!(ledger.list().await.len(), LEDGER_CAP);
        assert_eq!(ledger.count().await, LEDGER_CAP as u64 + 5);
        // Block 100 fell out of the view; the store still rejects a rewrite.
        assert!(!ledger.contains(100).await);
        assert_eq!(
            ledger.add(record(100, 999)).await.unwrap(),
            AddOutcome::Duplicate
        );
        assert_eq!(ledger.count().await, LEDGER_CAP as u64 + 5);
    }
}
