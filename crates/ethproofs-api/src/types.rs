//! Request and response types for the proof lifecycle endpoints.

use serde::{Deserialize, Serialize};

/// The prover indicates it will prove a block, but proving has not started.
///
/// POSTed to `proofs/queued`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedProof {
    pub block_number: u64,
    pub cluster_id: u64,
}

/// The prover indicates proof generation has started.
///
/// POSTed to `proofs/proving`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvingProof {
    pub block_number: u64,
    pub cluster_id: u64,
}

/// The finished proof, with timings and the proof payload.
///
/// POSTed to `proofs/proved`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvedProof {
    pub block_number: u64,
    pub cluster_id: u64,
    /// Time in milliseconds taken to generate the proof. Excludes data
    /// fetching and submission latency.
    pub proving_time: u64,
    /// Number of cycles taken to generate the proof.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proving_cycles: Option<u64>,
    /// Proof in base64 format.
    pub proof: String,
    /// vkey/image-id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_id: Option<String>,
}

/// Response to any of the three lifecycle reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofResponse {
    pub proof_id: u64,
}
