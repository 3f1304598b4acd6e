//! Proving stage.
//!
//! Serial by construction: the proving hardware admits one concurrent proof,
//! so the stage holds a FIFO queue and at most one live `cargo-zisk`
//! subprocess. A nanny task waits on the child and forwards its fate as an
//! ordinary inbox message tagged with a run id; messages from replaced runs
//! are discarded, and a child death can never take the stage down with it.

use std::{
    collections::{HashSet, VecDeque},
    path::PathBuf,
    process::Stdio,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::{mpsc, watch},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    artifacts::read_proof_artifact,
    events::{EventBus, ProverStatusEvent, TopicEvent},
    ledger::{missed::MissedLedger, proved::ProvedLedger, MissedRecord, ProvedRecord, Stage},
    notifier::{Notification, NotifierHandle},
    submitter::Submitter,
};

/// Prover configuration.
#[derive(Debug, Clone)]
pub struct ProverConfig {
    /// Proving executable. `cargo-zisk` in production; tests point this at a
    /// stub.
    pub program: String,
    /// Guest ELF passed via `-e`.
    pub elf_path: PathBuf,
    /// Root of the per-block `output/<block>/` tree.
    pub output_root: PathBuf,
    /// Dev mode runs `execute` instead of `prove`.
    pub dev: bool,
}

impl ProverConfig {
    fn subcommand(&self) -> &'static str {
        if self.dev {
            "execute"
        } else {
            "prove"
        }
    }
}

/// Published prover state, consumed by the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProverStatus {
    Idle { since: DateTime<Utc> },
    Proving { block: u64, since: DateTime<Utc> },
}

#[derive(Debug)]
pub(crate) enum ProverMessage {
    Prove {
        block: u64,
        input: PathBuf,
        input_gen_seconds: Option<u32>,
    },
    /// The subprocess exited with a code.
    Exited { run_id: u64, code: i32 },
    /// The subprocess disappeared without delivering an exit code.
    Crashed { run_id: u64, reason: String },
}

/// Cloneable entry point to the proving stage.
#[derive(Clone)]
pub struct ProverHandle {
    tx: mpsc::Sender<ProverMessage>,
}

impl ProverHandle {
    /// Enqueue a block for proving. Already queued or in-progress blocks are
    /// skipped by the stage.
    pub async fn prove(&self, block: u64, input: PathBuf, input_gen_seconds: Option<u32>) {
        let message = ProverMessage::Prove {
            block,
            input,
            input_gen_seconds,
        };
        if self.tx.send(message).await.is_err() {
            error!(block = block, "Prover is gone, dropping prove request");
        }
    }

    /// Handle wired to a bare channel, for driving upstream stages in tests.
    #[cfg(test)]
    pub(crate) fn test_channel() -> (Self, mpsc::Receiver<ProverMessage>) {
        let (tx, rx) = mpsc::channel(256);
        (Self { tx }, rx)
    }
}

struct QueuedJob {
    block: u64,
    input: PathBuf,
    input_gen_seconds: Option<u32>,
}

#[derive(Clone, Copy)]
enum ProverState {
    Idle {
        since: DateTime<Utc>,
    },
    Proving {
        block: u64,
        run_id: u64,
        since: DateTime<Utc>,
        input_gen_seconds: Option<u32>,
    },
}

/// The proving stage actor.
pub struct Prover {
    config: ProverConfig,
    submitter: Arc<Submitter>,
    proved: ProvedLedger,
    missed: MissedLedger,
    notifier: NotifierHandle,
    bus: EventBus,
    status_tx: watch::Sender<ProverStatus>,
    state: ProverState,
    queue: VecDeque<QueuedJob>,
    queued_blocks: HashSet<u64>,
    next_run_id: u64,
    rx: mpsc::Receiver<ProverMessage>,
    /// Cloned into nanny tasks so subprocess fates arrive as messages.
    self_tx: mpsc::Sender<ProverMessage>,
}

impl Prover {
    pub fn new(
        config: ProverConfig,
        submitter: Arc<Submitter>,
        proved: ProvedLedger,
        missed: MissedLedger,
        notifier: NotifierHandle,
        bus: EventBus,
    ) -> (Self, ProverHandle, watch::Receiver<ProverStatus>) {
        let (tx, rx) = mpsc::channel(256);
        let (status_tx, status_rx) = watch::channel(ProverStatus::Idle { since: Utc::now() });
        (
            Self {
                config,
                submitter,
                proved,
                missed,
                notifier,
                bus,
                status_tx,
                state: ProverState::Idle { since: Utc::now() },
                queue: VecDeque::new(),
                queued_blocks: HashSet::new(),
                next_run_id: 0,
                rx,
                self_tx: tx.clone(),
            },
            ProverHandle { tx },
            status_rx,
        )
    }

    pub async fn run(mut self, shutdown_token: CancellationToken) {
        info!(program = %self.config.program, "Prover started");

        loop {
            tokio::select! {
                biased;

                // In-flight proofs are left to complete; the subprocess is
                // not killed on shutdown.
                _ = shutdown_token.cancelled() => {
                    info!("Prover received shutdown signal");
                    break;
                }

                Some(message) = self.rx.recv() => {
                    match message {
                        ProverMessage::Prove { block, input, input_gen_seconds } => {
                            self.handle_prove(block, input, input_gen_seconds).await;
                        }
                        ProverMessage::Exited { run_id, code } => {
                            self.handle_exited(run_id, code).await;
                        }
                        ProverMessage::Crashed { run_id, reason } => {
                            self.handle_crashed(run_id, reason).await;
                        }
                    }
                }

                else => break,
            }
        }
    }

    async fn handle_prove(&mut self, block: u64, input: PathBuf, input_gen_seconds: Option<u32>) {
        if self.queued_blocks.contains(&block) {
            debug!(block = block, "Block already queued for proving, skipping");
            return;
        }
        if let ProverState::Proving { block: current, .. } = self.state {
            if current == block {
                debug!(block = block, "Block already proving, skipping");
                return;
            }
        }

        // Non-fatal: the queue is the authority, the report is best-effort.
        self.submitter.queued(block).await;

        self.queue.push_back(QueuedJob {
            block,
            input,
            input_gen_seconds,
        });
        self.queued_blocks.insert(block);
        info!(block = block, queue_depth = self.queue.len(), "Block queued for proving");

        self.drain().await;
    }

    /// Promote queued jobs while the stage is idle. A job that fails to
    /// launch records its outcome and leaves the stage idle for the next.
    async fn drain(&mut self) {
        while matches!(self.state, ProverState::Idle { .. }) {
            let Some(job) = self.queue.pop_front() else {
                break;
            };
            self.queued_blocks.remove(&job.block);
            self.start_job(job).await;
        }
    }

    async fn start_job(&mut self, job: QueuedJob) {
        let block = job.block;
        let output_dir = self.config.output_root.join(block.to_string());

        let launched = std::fs::create_dir_all(&output_dir)
            .map_err(|e| format!("failed to create {}: {e}", output_dir.display()))
            .and_then(|()| self.spawn_subprocess(&job, &output_dir));

        let run_id = match launched {
            Ok(run_id) => run_id,
            Err(reason) => {
                warn!(block = block, reason = %reason, "Failed to launch prover");
                self.record_missed(block, format!("Prover crashed: {reason}"))
                    .await;
                self.notifier
                    .notify(Notification::ProofGenerationFailed {
                        block,
                        reason,
                    })
                    .await;
                return;
            }
        };

        // Non-fatal, same as queued.
        self.submitter.proving(block).await;

        let since = Utc::now();
        self.state = ProverState::Proving {
            block,
            run_id,
            since,
            input_gen_seconds: job.input_gen_seconds,
        };
        self.publish_status();
        info!(block = block, run_id = run_id, "Proving started");
    }

    /// Spawn the proving subprocess and its nanny. Returns the run id used to
    /// match its completion message.
    fn spawn_subprocess(&mut self, job: &QueuedJob, output_dir: &std::path::Path) -> Result<u64, String> {
        self.next_run_id += 1;
        let run_id = self.next_run_id;

        let mut child = Command::new(&self.config.program)
            .arg(self.config.subcommand())
            .arg("-e")
            .arg(&self.config.elf_path)
            .arg("-i")
            .arg(&job.input)
            .arg("-o")
            .arg(output_dir)
            .arg("-a")
            .arg("-u")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {e}", self.config.program))?;

        let block = job.block;
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(stream_lines(block, "stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(stream_lines(block, "stderr", stderr));
        }

        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let message = match child.wait().await {
                Ok(status) => match status.code() {
                    Some(code) => ProverMessage::Exited { run_id, code },
                    // Killed by a signal: no exit code was delivered.
                    None => ProverMessage::Crashed {
                        run_id,
                        reason: format!("terminated without exit code ({status})"),
                    },
                },
                Err(e) => ProverMessage::Crashed {
                    run_id,
                    reason: format!("wait failed: {e}"),
                },
            };
            let _ = tx.send(message).await;
        });

        Ok(run_id)
    }

    async fn handle_exited(&mut self, run_id: u64, code: i32) {
        let Some((block, since, input_gen_seconds)) = self.take_current_run(run_id) else {
            debug!(run_id = run_id, "Ignoring exit of replaced prover run");
            return;
        };

        let proving_seconds = elapsed_seconds(since);
        let output_dir = self.config.output_root.join(block.to_string());

        match read_proof_artifact(&output_dir) {
            Ok(artifact) => {
                info!(
                    block = block,
                    exit_code = code,
                    cycles = artifact.cycles,
                    proving_seconds = proving_seconds,
                    "Proof artifacts read"
                );
                self.submitter
                    .proved(
                        block,
                        artifact.time_ms,
                        Some(artifact.cycles),
                        artifact.proof_b64,
                        Some(artifact.verifier_id.clone()),
                    )
                    .await;

                let record = ProvedRecord {
                    block,
                    proved_at: Utc::now(),
                    proving_seconds: Some(proving_seconds),
                    input_gen_seconds,
                };
                if let Err(e) = self.proved.add(record).await {
                    error!(block = block, error = %e, "Failed to record proved block");
                }
                self.notifier
                    .notify(Notification::ProofSubmitted {
                        block,
                        proving_seconds: Some(proving_seconds),
                        input_gen_seconds,
                        cycles: Some(artifact.cycles),
                    })
                    .await;
            }
            Err(reason) => {
                let reason = format!("Proving failed (exit_status:{code}): {reason}");
                warn!(block = block, reason = %reason, "Proving run produced no usable proof");
                self.record_missed(block, reason.clone()).await;
                self.notifier
                    .notify(Notification::ProofDataFailed { block, reason })
                    .await;
            }
        }

        self.go_idle().await;
    }

    async fn handle_crashed(&mut self, run_id: u64, reason: String) {
        let Some((block, _, _)) = self.take_current_run(run_id) else {
            debug!(run_id = run_id, "Ignoring crash of replaced prover run");
            return;
        };

        let reason = format!("Prover crashed: {reason}");
        error!(block = block, reason = %reason, "Prover subprocess crashed");
        self.record_missed(block, reason.clone()).await;
        self.notifier
            .notify(Notification::ProofGenerationFailed { block, reason })
            .await;

        self.go_idle().await;
    }

    /// Consume the current `Proving` state if `run_id` matches it.
    fn take_current_run(&mut self, run_id: u64) -> Option<(u64, DateTime<Utc>, Option<u32>)> {
        match self.state {
            ProverState::Proving {
                block,
                run_id: current,
                since,
                input_gen_seconds,
            } if current == run_id => {
                self.state = ProverState::Idle { since: Utc::now() };
                Some((block, since, input_gen_seconds))
            }
            _ => None,
        }
    }

    async fn go_idle(&mut self) {
        self.publish_status();
        self.drain().await;
    }

    async fn record_missed(&self, block: u64, reason: String) {
        let record = MissedRecord::now(block, Stage::Proving, reason);
        if let Err(e) = self.missed.add(record).await {
            error!(block = block, error = %e, "Failed to record missed block");
        }
    }

    fn publish_status(&self) {
        let (status, event) = match self.state {
            ProverState::Idle { since } => (
                ProverStatus::Idle { since },
                ProverStatusEvent::Idle,
            ),
            ProverState::Proving { block, since, .. } => (
                ProverStatus::Proving { block, since },
                ProverStatusEvent::Proving { block },
            ),
        };
        let _ = self.status_tx.send(status);
        self.bus.publish(TopicEvent::ProverStatus(event));
    }
}

/// Stream a subprocess pipe line by line at debug level.
async fn stream_lines(
    block: u64,
    pipe: &'static str,
    reader: impl tokio::io::AsyncRead + Unpin,
) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(block = block, pipe = pipe, line = %line, "prover output");
    }
}

fn elapsed_seconds(since: DateTime<Utc>) -> u32 {
    Utc::now()
        .signed_duration_since(since)
        .num_seconds()
        .clamp(0, u32::MAX as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::EventBus,
        ledger::store::LedgerStore,
        submitter::{
            mock::{Call, RecordingSubmitter},
            Submitter,
        },
    };
    use std::{os::unix::fs::PermissionsExt, time::Duration};

    struct Fixture {
        handle: ProverHandle,
        recorder: RecordingSubmitter,
        proved: ProvedLedger,
        missed: MissedLedger,
        shutdown: CancellationToken,
        dir: tempfile::TempDir,
    }

    /// Stand up a prover whose "cargo-zisk" is a shell stub. The stub sees
    /// the real argument layout: `prove -e ELF -i INPUT -o OUTDIR -a -u`.
    fn fixture(script_body: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("stub-prover.sh");
        std::fs::write(&program, format!("#!/bin/sh\n{script_body}")).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        let store = LedgerStore::open_in_memory().unwrap();
        let bus = EventBus::new();
        let proved = ProvedLedger::load(store.clone(), bus.clone()).unwrap();
        let missed = MissedLedger::load(store, bus.clone()).unwrap();

        let output_root = dir.path().join("output");
        let recorder = RecordingSubmitter::new();
        let submitter = Arc::new(Submitter::mock(
            recorder.clone(),
            NotifierHandle::disconnected(),
            output_root.clone(),
        ));

        let config = ProverConfig {
            program: program.to_string_lossy().into_owned(),
            elf_path: dir.path().join("guest.elf"),
            output_root,
            dev: false,
        };
        let (prover, handle, _status) = Prover::new(
            config,
            submitter,
            proved.clone(),
            missed.clone(),
            NotifierHandle::disconnected(),
            bus,
        );

        let shutdown = CancellationToken::new();
        tokio::spawn(prover.run(shutdown.clone()));

        Fixture {
            handle,
            recorder,
            proved,
            missed,
            shutdown,
            dir,
        }
    }

    fn input(fixture: &Fixture, block: u64) -> PathBuf {
        fixture.dir.path().join(format!("{block}.bin"))
    }

    async fn wait_proved(ledger: &ProvedLedger, block: u64) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !ledger.contains(block).await {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("block should be proved in time");
    }

    async fn wait_missed(ledger: &MissedLedger, block: u64) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !ledger.contains(block).await {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("block should be missed in time");
    }

    const HAPPY_SCRIPT: &str = r#"OUT="$7"
printf '{"cycles":12345,"time":17.25,"id":"v1"}' > "$OUT/result.json"
printf 'ABCD' > "$OUT/vadcop_final_proof.compressed.bin"
exit 0
"#;

    #[tokio::test]
    async fn happy_path_reports_full_lifecycle() {
        let fixture = fixture(HAPPY_SCRIPT);
        let block = 21_500_100;

        fixture.handle.prove(block, input(&fixture, block), Some(3)).await;
        wait_proved(&fixture.proved, block).await;

        assert_eq!(
            fixture.recorder.calls(),
            vec![
                Call::Queued { block },
                Call::Proving { block },
                Call::Proved {
                    block,
                    proving_time_ms: 17_250,
                    cycles: Some(12_345),
                    proof_b64: "QUJDRA".into(),
                    verifier_id: Some("v1".into()),
                },
            ]
        );

        let listed = fixture.proved.list().await;
        assert_eq!(listed[0].block, block);
        assert_eq!(listed[0].input_gen_seconds, Some(3));
        assert!(fixture.missed.list().await.is_empty());
        fixture.shutdown.cancel();
    }

    #[tokio::test]
    async fn missing_artifacts_miss_the_block() {
        // Exits cleanly but writes nothing.
        let fixture = fixture("exit 0\n");
        let block = 21_500_200;

        fixture.handle.prove(block, input(&fixture, block), None).await;
        wait_missed(&fixture.missed, block).await;

        let listed = fixture.missed.list().await;
        assert_eq!(listed[0].stage, Stage::Proving);
        assert!(listed[0].reason.starts_with("Proving failed (exit_status:0):"));

        // No proved report went out for this block.
        assert!(!fixture
            .recorder
            .calls()
            .iter()
            .any(|call| matches!(call, Call::Proved { .. })));
        assert!(!fixture.proved.contains(block).await);
        fixture.shutdown.cancel();
    }

    #[tokio::test]
    async fn nonzero_exit_reason_carries_the_code() {
        let fixture = fixture("exit 3\n");
        let block = 21_500_300;

        fixture.handle.prove(block, input(&fixture, block), None).await;
        wait_missed(&fixture.missed, block).await;

        let listed = fixture.missed.list().await;
        assert!(listed[0].reason.starts_with("Proving failed (exit_status:3):"));
        fixture.shutdown.cancel();
    }

    #[tokio::test]
    async fn killed_subprocess_is_a_crash_and_the_queue_continues() {
        // The subprocess kills itself: no exit code is delivered.
        let fixture = fixture("kill -KILL $$\n");
        let first = 21_500_400;
        let second = 21_500_500;

        fixture.handle.prove(first, input(&fixture, first), None).await;
        fixture.handle.prove(second, input(&fixture, second), None).await;

        wait_missed(&fixture.missed, first).await;
        wait_missed(&fixture.missed, second).await;

        let listed = fixture.missed.list().await;
        assert!(listed.iter().all(|record| {
            record.stage == Stage::Proving && record.reason.starts_with("Prover crashed:")
        }));
        fixture.shutdown.cancel();
    }

    #[tokio::test]
    async fn proving_is_serial_and_duplicates_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("lock");
        let overlap = dir.path().join("overlap");
        let script = format!(
            r#"OUT="$7"
if [ -e "{lock}" ]; then touch "{overlap}"; fi
touch "{lock}"
sleep 0.3
rm -f "{lock}"
printf '{{"cycles":1,"time":0.1,"id":"v1"}}' > "$OUT/result.json"
printf 'p' > "$OUT/vadcop_final_proof.bin"
exit 0
"#,
            lock = lock.display(),
            overlap = overlap.display(),
        );
        let fixture = fixture(&script);

        let blocks = [21_500_600, 21_500_700, 21_500_800];
        for block in blocks {
            fixture.handle.prove(block, input(&fixture, block), None).await;
            // A duplicate while queued or in-flight is dropped.
            fixture.handle.prove(block, input(&fixture, block), None).await;
        }

        for block in blocks {
            wait_proved(&fixture.proved, block).await;
        }

        assert!(!overlap.exists(), "two prover subprocesses overlapped");

        let queued: Vec<u64> = fixture
            .recorder
            .calls()
            .iter()
            .filter_map(|call| match call {
                Call::Queued { block } => Some(*block),
                _ => None,
            })
            .collect();
        assert_eq!(queued, blocks.to_vec());
        fixture.shutdown.cancel();
    }
}
