//! EthProofs proving sentry.
//!
//! Watches an Ethereum mainnet node and, for every block whose height is a
//! multiple of 100, produces a ZK execution proof and reports its lifecycle
//! to the EthProofs submission API.
//!
//! The pipeline is two ordered single-flight stages connected by channels:
//!
//! ```text
//!                 2s poll
//!  Ethereum RPC ──────────► InputGenerator ───► Prover ───► EthProofs API
//!       │                        │                 │
//!   health tracker          missed ledger    proved/missed ledgers
//!                                │                 │
//!                                └───── notifications + realtime bus
//! ```
//!
//! Each stateful component owns its state behind a message channel; worker
//! tasks and the proving subprocess do the blocking work. Outcomes land in
//! two durable ledgers (SQLite) that survive restarts and feed the health
//! endpoints.

pub mod artifacts;
pub mod block_meta;
pub mod config;
pub mod error;
pub mod events;
pub mod input_builder;
pub mod input_generator;
pub mod ledger;
pub mod notifier;
pub mod prover;
pub mod rpc;
pub mod rpc_health;
pub mod status;
pub mod submitter;
pub mod supervisor;

pub use config::{Config, Settings};
pub use error::{Error, Result};
