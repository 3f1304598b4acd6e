//! Configuration for the sentry.
//!
//! Every key can be supplied as a command-line flag or an environment
//! variable. Parsing never fails on a missing key; [`Config::validate`]
//! checks the required set afterwards so a single fatal message can list
//! everything that is absent.

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use crate::error::{Error, Result};

/// Proves every 100th Ethereum mainnet block and reports to EthProofs.
#[derive(Parser, Debug, Clone)]
#[command(name = "ethproofs-sentry")]
#[command(about = "Watch an Ethereum node, prove every 100th block, report to EthProofs")]
pub struct Config {
    /// Upstream Ethereum JSON-RPC endpoint.
    #[arg(long, env = "ETH_RPC_URL")]
    pub eth_rpc_url: Option<Url>,

    /// Guest ELF passed to `cargo-zisk prove -e`.
    #[arg(long, env = "ELF_PATH")]
    pub elf_path: Option<PathBuf>,

    /// Base URL for the EthProofs submission API.
    #[arg(long, env = "ETHPROOFS_RPC_URL")]
    pub ethproofs_rpc_url: Option<Url>,

    /// Bearer token for the EthProofs submission API.
    #[arg(long, env = "ETHPROOFS_API_KEY")]
    pub ethproofs_api_key: Option<String>,

    /// Cluster id included in every submission.
    #[arg(long, env = "ETHPROOFS_CLUSTER_ID")]
    pub ethproofs_cluster_id: Option<u64>,

    /// Dev mode: submissions are stubbed out and `cargo-zisk execute`
    /// replaces `prove`.
    #[arg(long, env = "DEV")]
    pub dev: bool,

    /// Slack webhook URL. When absent, notifications are silently dropped.
    #[arg(long, env = "SLACK_WEBHOOK")]
    pub slack_webhook: Option<Url>,

    /// HTTP port for the health endpoints.
    #[arg(long, env = "HEALTH_PORT", default_value_t = 4000)]
    pub health_port: u16,

    /// Proving duration after which the sentry reports itself degraded.
    #[arg(long, env = "PROVER_STUCK_THRESHOLD_SECONDS", default_value_t = 3600)]
    pub prover_stuck_threshold_seconds: u64,

    /// SQLite file holding the proved/missed ledgers.
    #[arg(long, env = "DB_PATH", default_value = "ethproofs_sentry.db")]
    pub db_path: PathBuf,

    /// Root directory for `output/` trees and input artifacts.
    #[arg(long, env = "DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,
}

/// Fully resolved configuration: every required key present.
#[derive(Debug, Clone)]
pub struct Settings {
    pub eth_rpc_url: Url,
    pub elf_path: PathBuf,
    /// Absent in dev mode; submissions are stubbed then.
    pub ethproofs: Option<EthProofsSettings>,
    pub dev: bool,
    pub slack_webhook: Option<Url>,
    pub health_port: u16,
    pub prover_stuck_threshold_seconds: u64,
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

/// Submission API settings, required outside dev mode.
#[derive(Debug, Clone)]
pub struct EthProofsSettings {
    pub base_url: Url,
    pub api_key: String,
    pub cluster_id: u64,
}

impl Config {
    /// Resolve into [`Settings`], checking that every required key is
    /// present.
    ///
    /// The EthProofs keys are only required outside dev mode. All missing
    /// keys are reported in one message.
    pub fn validate(self) -> Result<Settings> {
        let mut missing = Vec::new();

        if self.eth_rpc_url.is_none() {
            missing.push("eth_rpc_url");
        }
        if self.elf_path.is_none() {
            missing.push("elf_path");
        }
        if !self.dev {
            if self.ethproofs_rpc_url.is_none() {
                missing.push("ethproofs_rpc_url");
            }
            if self.ethproofs_api_key.is_none() {
                missing.push("ethproofs_api_key");
            }
            if self.ethproofs_cluster_id.is_none() {
                missing.push("ethproofs_cluster_id");
            }
        }

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required configuration: {}",
                missing.join(", ")
            )));
        }

        let ethproofs = if self.dev {
            None
        } else {
            self.ethproofs_rpc_url
                .zip(self.ethproofs_api_key)
                .zip(self.ethproofs_cluster_id)
                .map(|((base_url, api_key), cluster_id)| EthProofsSettings {
                    base_url,
                    api_key,
                    cluster_id,
                })
        };

        Ok(Settings {
            eth_rpc_url: self.eth_rpc_url.ok_or_else(|| Error::Config("eth_rpc_url".into()))?,
            elf_path: self.elf_path.ok_or_else(|| Error::Config("elf_path".into()))?,
            ethproofs,
            dev: self.dev,
            slack_webhook: self.slack_webhook,
            health_port: self.health_port,
            prover_stuck_threshold_seconds: self.prover_stuck_threshold_seconds,
            db_path: self.db_path,
            data_dir: self.data_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("ethproofs-sentry").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn validate_lists_every_missing_key() {
        let config = parse(&[]);
        let err = config.validate().unwrap_err().to_string();
        for key in [
            "eth_rpc_url",
            "elf_path",
            "ethproofs_rpc_url",
            "ethproofs_api_key",
            "ethproofs_cluster_id",
        ] {
            assert!(err.contains(key), "{err} should mention {key}");
        }
    }

    #[test]
    fn dev_mode_waives_submission_keys() {
        let config = parse(&[
            "--dev",
            "--eth-rpc-url",
            "http://localhost:8545",
            "--elf-path",
            "/tmp/guest.elf",
        ]);
        let settings = config.validate().unwrap();
        assert!(settings.dev);
        assert!(settings.ethproofs.is_none());
    }

    #[test]
    fn full_config_validates() {
        let config = parse(&[
            "--eth-rpc-url",
            "http://localhost:8545",
            "--elf-path",
            "/tmp/guest.elf",
            "--ethproofs-rpc-url",
            "https://api.ethproofs.org",
            "--ethproofs-api-key",
            "secret",
            "--ethproofs-cluster-id",
            "7",
        ]);
        let settings = config.validate().unwrap();
        assert_eq!(settings.health_port, 4000);
        assert_eq!(settings.prover_stuck_threshold_seconds, 3600);
        let ethproofs = settings.ethproofs.unwrap();
        assert_eq!(ethproofs.cluster_id, 7);
    }
}
