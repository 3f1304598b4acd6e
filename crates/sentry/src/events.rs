//! Realtime event fan-out.
//!
//! A broadcast bus carrying the topics the dashboard subscribes to. Ledgers
//! publish after their store commit; the prover publishes on every state
//! transition. Nobody listening is fine; send errors are swallowed.

use tokio::sync::broadcast;

/// Topic events carried on the realtime bus.
#[derive(Debug, Clone)]
pub enum TopicEvent {
    /// The proved ledger gained a record.
    ProvedBlocksUpdated { block: u64 },
    /// The missed ledger gained a record.
    MissedBlocksUpdated { block: u64 },
    /// The prover changed state.
    ProverStatus(ProverStatusEvent),
}

/// Prover state as published on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProverStatusEvent {
    Idle,
    Proving { block: u64 },
}

/// Cloneable publisher handle for the realtime bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TopicEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Publish an event. Lagging or absent subscribers are not an error.
    pub fn publish(&self, event: TopicEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopicEvent> {
        self.tx.subscribe()
    }
}
