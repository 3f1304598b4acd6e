//! Proof lifecycle reporting to EthProofs.
//!
//! Wraps the API client with the sentry's policy: dev mode short-circuits
//! every report, the encoded `proved` body is persisted next to the proof
//! artifacts before it leaves the machine, and a failed report notifies but
//! never changes the local outcome — the ledgers are authoritative.

use std::path::PathBuf;

use ethproofs_api::{EthProofsClient, ProvedProof, ProvingProof, QueuedProof};
use tracing::{debug, info, warn};

use crate::notifier::{Notification, NotifierHandle};

/// Outcome of a lifecycle report. Never an `Err`: the pipeline continues
/// regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    ProofId(String),
    /// Dev mode: no network call was made.
    Skipped,
    Error(String),
}

enum Backend {
    Api {
        client: EthProofsClient,
        cluster_id: u64,
    },
    /// Dev mode stub.
    Dev,
    #[cfg(test)]
    Mock(mock::RecordingSubmitter),
}

/// Reports `queued` / `proving` / `proved` for blocks.
pub struct Submitter {
    backend: Backend,
    notifier: NotifierHandle,
    /// Root of the `output/<block>/` tree, for persisting proved bodies.
    output_root: PathBuf,
}

impl Submitter {
    pub fn api(
        client: EthProofsClient,
        cluster_id: u64,
        notifier: NotifierHandle,
        output_root: PathBuf,
    ) -> Self {
        Self {
            backend: Backend::Api { client, cluster_id },
            notifier,
            output_root,
        }
    }

    /// Dev-mode submitter: every report returns [`SubmitOutcome::Skipped`].
    pub fn dev(notifier: NotifierHandle, output_root: PathBuf) -> Self {
        Self {
            backend: Backend::Dev,
            notifier,
            output_root,
        }
    }

    #[cfg(test)]
    pub fn mock(
        recorder: mock::RecordingSubmitter,
        notifier: NotifierHandle,
        output_root: PathBuf,
    ) -> Self {
        Self {
            backend: Backend::Mock(recorder),
            notifier,
            output_root,
        }
    }

    /// Report that `block` is queued for proving.
    pub async fn queued(&self, block: u64) -> SubmitOutcome {
        match &self.backend {
            Backend::Dev => SubmitOutcome::Skipped,
            #[cfg(test)]
            Backend::Mock(recorder) => recorder.record(mock::Call::Queued { block }),
            Backend::Api { client, cluster_id } => {
                let request = QueuedProof {
                    block_number: block,
                    cluster_id: *cluster_id,
                };
                self.outcome(block, "proofs/queued", client.queued(&request).await)
                    .await
            }
        }
    }

    /// Report that proving has started for `block`.
    pub async fn proving(&self, block: u64) -> SubmitOutcome {
        match &self.backend {
            Backend::Dev => SubmitOutcome::Skipped,
            #[cfg(test)]
            Backend::Mock(recorder) => recorder.record(mock::Call::Proving { block }),
            Backend::Api { client, cluster_id } => {
                let request = ProvingProof {
                    block_number: block,
                    cluster_id: *cluster_id,
                };
                self.outcome(block, "proofs/proving", client.proving(&request).await)
                    .await
            }
        }
    }

    /// Report the finished proof for `block`.
    pub async fn proved(
        &self,
        block: u64,
        proving_time_ms: u64,
        cycles: Option<u64>,
        proof_b64: String,
        verifier_id: Option<String>,
    ) -> SubmitOutcome {
        match &self.backend {
            Backend::Dev => SubmitOutcome::Skipped,
            #[cfg(test)]
            Backend::Mock(recorder) => recorder.record(mock::Call::Proved {
                block,
                proving_time_ms,
                cycles,
                proof_b64,
                verifier_id,
            }),
            Backend::Api { client, cluster_id } => {
                let request = ProvedProof {
                    block_number: block,
                    cluster_id: *cluster_id,
                    proving_time: proving_time_ms,
                    proving_cycles: cycles,
                    proof: proof_b64,
                    verifier_id,
                };
                self.persist_proved_body(block, &request);
                self.outcome(block, "proofs/proved", client.proved(&request).await)
                    .await
            }
        }
    }

    /// Write the exact outgoing body to `output/<block>/<block>.json` so a
    /// submission can be audited or replayed.
    fn persist_proved_body(&self, block: u64, request: &ProvedProof) {
        let dir = self.output_root.join(block.to_string());
        let path = dir.join(format!("{block}.json"));
        let result = std::fs::create_dir_all(&dir).and_then(|()| {
            let body = serde_json::to_vec(request)?;
            std::fs::write(&path, body)
        });
        match result {
            Ok(()) => debug!(block = block, path = %path.display(), "Persisted proved request body"),
            Err(e) => warn!(block = block, error = %e, "Failed to persist proved request body"),
        }
    }

    async fn outcome(
        &self,
        block: u64,
        endpoint: &str,
        result: ethproofs_api::Result<ethproofs_api::ProofResponse>,
    ) -> SubmitOutcome {
        match result {
            Ok(response) => {
                info!(block = block, endpoint = endpoint, proof_id = response.proof_id, "Reported to EthProofs");
                SubmitOutcome::ProofId(response.proof_id.to_string())
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(block = block, endpoint = endpoint, error = %reason, "EthProofs report failed");
                self.notifier
                    .notify(Notification::EthProofsRequestFailed {
                        block,
                        endpoint: endpoint.to_string(),
                        reason: reason.clone(),
                    })
                    .await;
                SubmitOutcome::Error(reason)
            }
        }
    }
}
