//! Ledger behavior across process restarts, exercised through the public
//! API against a real SQLite file.

use chrono::DateTime;
use ethproofs_sentry::{
    events::EventBus,
    ledger::{missed::MissedLedger, proved::ProvedLedger, store::LedgerStore, AddOutcome,
        MissedRecord, ProvedRecord, Stage},
};

fn proved(block: u64, at: i64) -> ProvedRecord {
    ProvedRecord {
        block,
        proved_at: DateTime::from_timestamp(at, 0).unwrap(),
        proving_seconds: Some(17),
        input_gen_seconds: Some(2),
    }
}

#[tokio::test]
async fn proved_ledger_survives_restart_with_capped_view() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ledgers.db");
    let base = 1_700_000_000;

    {
        let store = LedgerStore::open(&db_path).unwrap();
        let ledger = ProvedLedger::load(store, EventBus::new()).unwrap();
        for i in 1..=105u64 {
            assert_eq!(
                ledger.add(proved(i, base + i as i64)).await.unwrap(),
                AddOutcome::Added
            );
        }
    }

    // "Restart": reopen the same file from scratch.
    let store = LedgerStore::open(&db_path).unwrap();
    let ledger = ProvedLedger::load(store, EventBus::new()).unwrap();

    assert_eq!(ledger.count().await, 105);

    let listed = ledger.list().await;
    assert_eq!(listed.len(), 100);
    let blocks: Vec<u64> = listed.iter().map(|r| r.block).collect();
    let expected: Vec<u64> = (6..=105).rev().collect();
    assert_eq!(blocks, expected);

    assert!(!ledger.contains(5).await);
    assert!(ledger.contains(105).await);

    // The store still holds the trimmed rows: re-adding block 5 is a
    // duplicate, not a new record.
    assert_eq!(
        ledger.add(proved(5, base + 999)).await.unwrap(),
        AddOutcome::Duplicate
    );
    assert_eq!(ledger.count().await, 105);
}

#[tokio::test]
async fn missed_ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ledgers.db");

    {
        let store = LedgerStore::open(&db_path).unwrap();
        let ledger = MissedLedger::load(store, EventBus::new()).unwrap();
        ledger
            .add(MissedRecord::now(
                21_500_200,
                Stage::Proving,
                "Prover crashed: killed",
            ))
            .await
            .unwrap();
        ledger
            .add(MissedRecord::now(
                21_500_300,
                Stage::InputGen,
                "rpc_get_block_by_number: timeout",
            ))
            .await
            .unwrap();
    }

    let store = LedgerStore::open(&db_path).unwrap();
    let ledger = MissedLedger::load(store, EventBus::new()).unwrap();

    assert_eq!(ledger.count().await, 2);
    let listed = ledger.list().await;
    assert_eq!(listed.len(), 2);
    assert!(listed
        .iter()
        .any(|r| r.block == 21_500_200 && r.stage == Stage::Proving));
    assert!(listed
        .iter()
        .any(|r| r.block == 21_500_300 && r.stage == Stage::InputGen));
}

#[tokio::test]
async fn outcomes_are_exclusive_per_block() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("ledgers.db");
    let store = LedgerStore::open(&db_path).unwrap();
    let bus = EventBus::new();
    let proved_ledger = ProvedLedger::load(store.clone(), bus.clone()).unwrap();
    let missed_ledger = MissedLedger::load(store, bus).unwrap();

    proved_ledger.add(proved(21_500_100, 1)).await.unwrap();
    missed_ledger
        .add(MissedRecord::now(21_500_200, Stage::Proving, "no artifacts"))
        .await
        .unwrap();

    for block in [21_500_100, 21_500_200] {
        let in_proved = proved_ledger.contains(block).await;
        let in_missed = missed_ledger.contains(block).await;
        assert!(in_proved ^ in_missed, "block {block} must be in exactly one ledger");
    }
}
