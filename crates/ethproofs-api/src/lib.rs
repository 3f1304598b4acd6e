//! Client for the EthProofs proof submission API.
//!
//! EthProofs tracks the lifecycle of a block proof through three states,
//! reported by the prover as it makes progress:
//!
//! - `queued`: the prover has committed to proving a block
//! - `proving`: proof generation has started
//! - `proved`: the proof is done, with timings, cycle counts and the proof
//!   payload itself
//!
//! Each report is an authenticated JSON POST; the API answers with the
//! numeric id it assigned to the proof.

pub mod client;
pub mod error;
pub mod types;

pub use client::EthProofsClient;
pub use error::{EthProofsError, Result};
pub use types::{ProofResponse, ProvedProof, ProvingProof, QueuedProof};
