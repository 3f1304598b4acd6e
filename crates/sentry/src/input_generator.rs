//! Input generation stage.
//!
//! Polls the chain head every two seconds and enqueues every block whose
//! height is a multiple of 100. A single supervised worker at a time fetches
//! the block and its execution witness, caches the block metadata, and builds
//! the prover input. Explicit worker errors mark the block processed (no
//! silent retry — the missed ledger is the record); a worker *panic* does
//! not, so an operator re-request can try the block again.

use std::{
    collections::{HashSet, VecDeque},
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    block_meta::BlockMetadataCache,
    input_builder::{input_artifact_path, InputBuilder},
    ledger::{missed::MissedLedger, MissedRecord, Stage},
    notifier::{Notification, NotifierHandle},
    prover::ProverHandle,
    rpc::ChainClient,
};

/// Proof targets are every 100th block.
const TARGET_INTERVAL: u64 = 100;

/// Mainnet block cadence, for the wait estimate log line.
const SECONDS_PER_BLOCK: u64 = 12;

/// Input generator configuration.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Directory holding `<block>.bin` input artifacts.
    pub workdir: PathBuf,
    /// Chain head poll cadence.
    pub poll_interval: Duration,
}

impl GeneratorConfig {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            poll_interval: Duration::from_millis(2000),
        }
    }
}

/// Published generator state, consumed by the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorStatus {
    Idle,
    Generating { block: u64 },
}

enum GeneratorMessage {
    Generate { block: u64 },
}

/// Cloneable entry point to the input generation stage.
#[derive(Clone)]
pub struct InputGeneratorHandle {
    tx: mpsc::Sender<GeneratorMessage>,
}

impl InputGeneratorHandle {
    /// Request input generation for a specific block, bypassing the poll.
    pub async fn generate(&self, block: u64) {
        if self
            .tx
            .send(GeneratorMessage::Generate { block })
            .await
            .is_err()
        {
            error!(block = block, "InputGenerator is gone, dropping request");
        }
    }
}

#[derive(Clone, Copy)]
enum GeneratorState {
    Idle,
    Generating {
        block: u64,
        task_id: tokio::task::Id,
    },
}

struct GeneratedInput {
    block: u64,
    input: PathBuf,
    input_gen_seconds: u32,
}

struct WorkerFailure {
    block: u64,
    step: &'static str,
    reason: String,
}

type WorkerOutcome = Result<GeneratedInput, WorkerFailure>;

/// The input generation stage actor.
pub struct InputGenerator {
    config: GeneratorConfig,
    chain: ChainClient,
    builder: Arc<dyn InputBuilder>,
    block_meta: BlockMetadataCache,
    missed: MissedLedger,
    notifier: NotifierHandle,
    prover: ProverHandle,
    status_tx: watch::Sender<GeneratorStatus>,
    state: GeneratorState,
    queue: VecDeque<u64>,
    queued_blocks: HashSet<u64>,
    processed: HashSet<u64>,
    workers: JoinSet<WorkerOutcome>,
    rx: mpsc::Receiver<GeneratorMessage>,
}

impl InputGenerator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GeneratorConfig,
        chain: ChainClient,
        builder: Arc<dyn InputBuilder>,
        block_meta: BlockMetadataCache,
        missed: MissedLedger,
        notifier: NotifierHandle,
        prover: ProverHandle,
    ) -> (Self, InputGeneratorHandle, watch::Receiver<GeneratorStatus>) {
        let (tx, rx) = mpsc::channel(256);
        let (status_tx, status_rx) = watch::channel(GeneratorStatus::Idle);
        (
            Self {
                config,
                chain,
                builder,
                block_meta,
                missed,
                notifier,
                prover,
                status_tx,
                state: GeneratorState::Idle,
                queue: VecDeque::new(),
                queued_blocks: HashSet::new(),
                processed: HashSet::new(),
                workers: JoinSet::new(),
                rx,
            },
            InputGeneratorHandle { tx },
            status_rx,
        )
    }

    pub async fn run(mut self, shutdown_token: CancellationToken) {
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "InputGenerator started"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown_token.cancelled() => {
                    info!("InputGenerator received shutdown signal");
                    self.workers.abort_all();
                    break;
                }

                Some(result) = self.workers.join_next_with_id() => {
                    self.handle_worker_result(result).await;
                }

                Some(message) = self.rx.recv() => {
                    match message {
                        GeneratorMessage::Generate { block } => {
                            self.accept(block, false).await;
                        }
                    }
                }

                _ = poll.tick() => {
                    self.poll_chain().await;
                }
            }
        }
    }

    /// One poll of the chain head.
    async fn poll_chain(&mut self) {
        let info = match self.chain.latest_block_info().await {
            Ok(info) => info,
            Err(e) => {
                // The health tracker hears about this from the client.
                debug!(error = %e, "Chain head poll failed");
                return;
            }
        };

        if info.number % TARGET_INTERVAL != 0 {
            let wait = estimated_wait_seconds(
                info.number,
                info.timestamp,
                Utc::now().timestamp() as u64,
            );
            debug!(
                block = info.number,
                estimated_wait_seconds = wait,
                "Latest block is not a proving target"
            );
            return;
        }

        self.accept(info.number, true).await;
    }

    /// Dedupe checks, then enqueue. The on-disk artifact marker is only
    /// consulted on the poll path; an explicit request may rebuild.
    async fn accept(&mut self, block: u64, check_marker: bool) {
        if self.processed.contains(&block) {
            debug!(block = block, "Block already processed, skipping");
            return;
        }
        if self.queued_blocks.contains(&block) {
            debug!(block = block, "Block already queued, skipping");
            return;
        }
        if let GeneratorState::Generating { block: current, .. } = self.state {
            if current == block {
                debug!(block = block, "Block currently generating, skipping");
                return;
            }
        }
        if check_marker && input_artifact_path(&self.config.workdir, block).exists() {
            debug!(block = block, "Input artifact already on disk, skipping");
            return;
        }

        self.queue.push_back(block);
        self.queued_blocks.insert(block);
        info!(block = block, queue_depth = self.queue.len(), "Block enqueued for input generation");

        self.drain();
    }

    /// Promote the queue head when idle.
    fn drain(&mut self) {
        if !matches!(self.state, GeneratorState::Idle) {
            return;
        }
        let Some(block) = self.queue.pop_front() else {
            self.publish_status();
            return;
        };
        self.queued_blocks.remove(&block);

        let chain = self.chain.clone();
        let builder = self.builder.clone();
        let block_meta = self.block_meta.clone();
        let handle = self
            .workers
            .spawn(async move { generate_input(block, chain, builder, block_meta).await });

        self.state = GeneratorState::Generating {
            block,
            task_id: handle.id(),
        };
        self.publish_status();
        info!(block = block, "Input generation started");
    }

    async fn handle_worker_result(
        &mut self,
        result: Result<(tokio::task::Id, WorkerOutcome), tokio::task::JoinError>,
    ) {
        let finished_id = match &result {
            Ok((id, _)) => *id,
            Err(join_error) => join_error.id(),
        };

        let block = match self.state {
            GeneratorState::Generating { block, task_id } if task_id == finished_id => block,
            _ => {
                debug!("Ignoring result from replaced input worker");
                return;
            }
        };
        self.state = GeneratorState::Idle;

        match result {
            Ok((_, Ok(generated))) => {
                self.processed.insert(block);
                info!(
                    block = block,
                    input = %generated.input.display(),
                    input_gen_seconds = generated.input_gen_seconds,
                    "Input generated"
                );
                self.prover
                    .prove(
                        generated.block,
                        generated.input,
                        Some(generated.input_gen_seconds),
                    )
                    .await;
            }
            Ok((_, Err(failure))) => {
                // Explicit failure: recorded, marked processed, not retried.
                self.processed.insert(block);
                let reason = format!("{}: {}", failure.step, failure.reason);
                warn!(block = block, reason = %reason, "Input generation failed");
                self.notifier
                    .notify(Notification::InputGenerationFailed {
                        block,
                        step: failure.step.to_string(),
                        reason: failure.reason,
                    })
                    .await;
                let record = MissedRecord::now(block, Stage::InputGen, reason);
                if let Err(e) = self.missed.add(record).await {
                    error!(block = block, error = %e, "Failed to record missed block");
                }
            }
            Err(join_error) => {
                // The worker died without an outcome. Leave the block
                // unprocessed so a re-request can try again.
                error!(block = block, error = %join_error, "Input worker crashed");
            }
        }

        self.drain();
    }

    fn publish_status(&self) {
        let status = match self.state {
            GeneratorState::Idle => GeneratorStatus::Idle,
            GeneratorState::Generating { block, .. } => GeneratorStatus::Generating { block },
        };
        let _ = self.status_tx.send(status);
    }
}

/// The worker body: fetch, cache metadata, fetch witness, build input.
async fn generate_input(
    block: u64,
    chain: ChainClient,
    builder: Arc<dyn InputBuilder>,
    block_meta: BlockMetadataCache,
) -> WorkerOutcome {
    let fail = |step: &'static str, reason: String| WorkerFailure {
        block,
        step,
        reason,
    };
    let started = Instant::now();

    let block_json = chain
        .block_json(block)
        .await
        .map_err(|e| fail("rpc_get_block_by_number", e.to_string()))?;

    let parsed: serde_json::Value = serde_json::from_slice(&block_json)
        .map_err(|_| fail("block_metadata", "invalid_block_data".into()))?;
    block_meta
        .insert_from_block_json(block, &parsed)
        .await
        .ok_or_else(|| fail("block_metadata", "invalid_block_data".into()))?;

    let witness = chain
        .execution_witness(block)
        .await
        .map_err(|e| fail("rpc_debug_execution_witness", e.to_string()))?;

    let input = builder
        .build(block, &block_json, &witness)
        .map_err(|reason| fail("input_generation", reason))?;

    Ok(GeneratedInput {
        block,
        input,
        input_gen_seconds: started.elapsed().as_secs() as u32,
    })
}

/// Seconds until the next target block should land, given the latest height
/// and its timestamp.
fn estimated_wait_seconds(number: u64, block_timestamp: u64, now_unix: u64) -> u64 {
    let blocks_left = TARGET_INTERVAL - number % TARGET_INTERVAL;
    let since_block = now_unix.saturating_sub(block_timestamp);
    (blocks_left * SECONDS_PER_BLOCK).saturating_sub(since_block)
}
