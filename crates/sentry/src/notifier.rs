//! Webhook notification fan-out.
//!
//! Fire-and-forget: events are rendered to a Slack-style payload and POSTed
//! to the configured webhook. No webhook configured means events are dropped.
//! Delivery failure is logged and never retried; nothing here can block or
//! fail the pipeline.

use chrono::{DateTime, Utc};
use sysinfo::System;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::block_meta::BlockMetadataCache;

const WEBHOOK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Events the sink knows how to render.
#[derive(Debug, Clone)]
pub enum Notification {
    InputGenerationFailed {
        block: u64,
        step: String,
        reason: String,
    },
    ProofGenerationFailed {
        block: u64,
        reason: String,
    },
    ProofDataFailed {
        block: u64,
        reason: String,
    },
    EthProofsRequestFailed {
        block: u64,
        endpoint: String,
        reason: String,
    },
    ProofSubmitted {
        block: u64,
        proving_seconds: Option<u32>,
        input_gen_seconds: Option<u32>,
        cycles: Option<u64>,
    },
    RpcDown {
        url: String,
        down_since: DateTime<Utc>,
        last_error: String,
    },
    RpcRecovered {
        url: String,
        down_since: DateTime<Utc>,
        recovered_at: DateTime<Utc>,
    },
}

/// Cloneable sender half of the sink.
#[derive(Debug, Clone)]
pub struct NotifierHandle {
    tx: mpsc::Sender<Notification>,
}

impl NotifierHandle {
    /// Enqueue a notification. Best-effort: a full or closed sink drops the
    /// event with a log line.
    pub async fn notify(&self, notification: Notification) {
        if self.tx.send(notification).await.is_err() {
            warn!("Notification sink is gone, dropping event");
        }
    }

    /// A handle wired to nothing, for tests that don't care about
    /// notifications.
    #[cfg(test)]
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }
}

/// Renders notifications and delivers them to the webhook.
pub struct NotificationSink {
    webhook: Option<Url>,
    client: reqwest::Client,
    block_meta: BlockMetadataCache,
    host_summary: String,
    rx: mpsc::Receiver<Notification>,
}

impl NotificationSink {
    pub fn new(
        webhook: Option<Url>,
        block_meta: BlockMetadataCache,
    ) -> (Self, NotifierHandle) {
        let (tx, rx) = mpsc::channel(256);
        (
            Self {
                webhook,
                client: reqwest::Client::new(),
                block_meta,
                host_summary: host_summary(),
                rx,
            },
            NotifierHandle { tx },
        )
    }

    pub async fn run(mut self, shutdown_token: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_token.cancelled() => {
                    info!("NotificationSink received shutdown signal");
                    break;
                }

                Some(notification) = self.rx.recv() => {
                    self.deliver(notification).await;
                }

                else => break,
            }
        }
    }

    async fn deliver(&self, notification: Notification) {
        let Some(webhook) = &self.webhook else {
            debug!("No webhook configured, dropping notification");
            return;
        };

        let payload = self.render(&notification).await;

        match self
            .client
            .post(webhook.clone())
            .timeout(WEBHOOK_TIMEOUT)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!("Notification delivered");
            }
            Ok(response) => {
                warn!(status = %response.status(), "Webhook rejected notification");
            }
            Err(e) => {
                warn!(error = %e, "Failed to deliver notification");
            }
        }
    }

    /// Render a Slack-compatible webhook payload: headline text plus an
    /// attachment with one field per detail.
    async fn render(&self, notification: &Notification) -> serde_json::Value {
        let (headline, mut fields) = match notification {
            Notification::InputGenerationFailed {
                block,
                step,
                reason,
            } => (
                format!(":warning: Input generation failed for block {block}"),
                vec![
                    field("Step", step),
                    field("Reason", reason),
                ],
            ),
            Notification::ProofGenerationFailed { block, reason } => (
                format!(":x: Proof generation failed for block {block}"),
                vec![field("Reason", reason)],
            ),
            Notification::ProofDataFailed { block, reason } => (
                format!(":x: Proof artifacts unreadable for block {block}"),
                vec![field("Reason", reason)],
            ),
            Notification::EthProofsRequestFailed {
                block,
                endpoint,
                reason,
            } => (
                format!(":warning: EthProofs request failed for block {block}"),
                vec![
                    field("Endpoint", endpoint),
                    field("Reason", reason),
                ],
            ),
            Notification::ProofSubmitted {
                block,
                proving_seconds,
                input_gen_seconds,
                cycles,
            } => (
                format!(":white_check_mark: Proved block {block}"),
                vec![
                    field("Proving time", &display_seconds(*proving_seconds)),
                    field("Input generation", &display_seconds(*input_gen_seconds)),
                    field(
                        "Cycles",
                        &cycles.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
                    ),
                ],
            ),
            Notification::RpcDown {
                url,
                down_since,
                last_error,
            } => (
                format!(":rotating_light: Ethereum RPC down: {url}"),
                vec![
                    field("Down since", &down_since.to_rfc3339()),
                    field("Last error", last_error),
                ],
            ),
            Notification::RpcRecovered {
                url,
                down_since,
                recovered_at,
            } => (
                format!(":large_green_circle: Ethereum RPC recovered: {url}"),
                vec![
                    field("Down since", &down_since.to_rfc3339()),
                    field("Recovered at", &recovered_at.to_rfc3339()),
                ],
            ),
        };

        if let Some(block) = notification.block() {
            fields.push(field("Gas used", &self.block_meta.gas_used_display(block).await));
            fields.push(field("Transactions", &self.block_meta.tx_count_display(block).await));
        }
        fields.push(field("Host", &self.host_summary));

        serde_json::json!({
            "text": headline,
            "attachments": [{ "fields": fields }],
        })
    }
}

impl Notification {
    /// The block this event is about, when there is one.
    fn block(&self) -> Option<u64> {
        match self {
            Self::InputGenerationFailed { block, .. }
            | Self::ProofGenerationFailed { block, .. }
            | Self::ProofDataFailed { block, .. }
            | Self::EthProofsRequestFailed { block, .. }
            | Self::ProofSubmitted { block, .. } => Some(*block),
            Self::RpcDown { .. } | Self::RpcRecovered { .. } => None,
        }
    }
}

fn field(title: &str, value: &str) -> serde_json::Value {
    serde_json::json!({ "title": title, "value": value, "short": true })
}

fn display_seconds(seconds: Option<u32>) -> String {
    seconds.map_or_else(|| "unknown".to_string(), |s| format!("{s} s"))
}

/// One-line host description rendered into every payload footer.
fn host_summary() -> String {
    let mut sys = System::new();
    sys.refresh_memory();
    let total_gb = sys.total_memory() as f64 / 1024.0 / 1024.0 / 1024.0;
    format!(
        "{} ({} cpus, {total_gb:.1} GB)",
        System::host_name().unwrap_or_else(|| "unknown".into()),
        sys.physical_core_count().unwrap_or(0),
    )
}
