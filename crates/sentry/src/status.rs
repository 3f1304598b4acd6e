//! Health and status HTTP surface.
//!
//! Read-only projection over the pipeline: liveness, readiness, and a full
//! JSON snapshot for the dashboard. The surface never errors because a
//! component is absent; a dropped status channel renders as `"down"`.

use std::{sync::Arc, time::Instant};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde_json::json;
use sysinfo::System;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{input_generator::GeneratorStatus, prover::ProverStatus};

/// Overall pipeline health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallStatus {
    Healthy,
    /// Running, but the current proof has been going suspiciously long.
    Degraded,
    Unhealthy,
}

impl OverallStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Shared state behind the health routes.
pub struct StatusState {
    started_at: Instant,
    prover_rx: watch::Receiver<ProverStatus>,
    generator_rx: watch::Receiver<GeneratorStatus>,
    task_host_rx: watch::Receiver<bool>,
    stuck_threshold_seconds: u64,
}

impl StatusState {
    pub fn new(
        prover_rx: watch::Receiver<ProverStatus>,
        generator_rx: watch::Receiver<GeneratorStatus>,
        task_host_rx: watch::Receiver<bool>,
        stuck_threshold_seconds: u64,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            prover_rx,
            generator_rx,
            task_host_rx,
            stuck_threshold_seconds,
        }
    }

    /// A status channel whose sender is gone means the component is down.
    fn prover(&self) -> Option<ProverStatus> {
        let rx = &self.prover_rx;
        rx.has_changed().is_ok().then(|| *rx.borrow())
    }

    fn generator(&self) -> Option<GeneratorStatus> {
        let rx = &self.generator_rx;
        rx.has_changed().is_ok().then(|| *rx.borrow())
    }

    fn task_host_up(&self) -> bool {
        self.task_host_rx.has_changed().is_ok() && *self.task_host_rx.borrow()
    }

    fn proving_duration_seconds(&self) -> Option<u64> {
        match self.prover()? {
            ProverStatus::Proving { since, .. } => Some(
                Utc::now()
                    .signed_duration_since(since)
                    .num_seconds()
                    .max(0) as u64,
            ),
            ProverStatus::Idle { .. } => None,
        }
    }

    fn overall(&self) -> OverallStatus {
        if self.prover().is_none() || self.generator().is_none() || !self.task_host_up() {
            return OverallStatus::Unhealthy;
        }
        match self.proving_duration_seconds() {
            Some(duration) if duration > self.stuck_threshold_seconds => OverallStatus::Degraded,
            _ => OverallStatus::Healthy,
        }
    }

    fn snapshot(&self) -> (StatusCode, serde_json::Value) {
        let overall = self.overall();

        let prover = match self.prover() {
            None => json!({"status": "down"}),
            Some(ProverStatus::Idle { since }) => json!({
                "status": "idle",
                "since": since.to_rfc3339(),
            }),
            Some(ProverStatus::Proving { block, since }) => json!({
                "status": "proving",
                "block": block,
                "since": since.to_rfc3339(),
                "proving_duration_seconds": self.proving_duration_seconds(),
            }),
        };

        let input_generator = match self.generator() {
            None => json!({"status": "down"}),
            Some(GeneratorStatus::Idle) => json!({"status": "idle"}),
            Some(GeneratorStatus::Generating { block }) => json!({
                "status": "generating",
                "block": block,
            }),
        };

        let task_host = if self.task_host_up() { "up" } else { "down" };

        let code = if overall == OverallStatus::Healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };

        let body = json!({
            "status": overall.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
            "uptime_seconds": self.started_at.elapsed().as_secs(),
            "components": {
                "prover": prover,
                "input_generator": input_generator,
                "task_host": task_host,
            },
            "system": system_info(),
        });

        (code, body)
    }
}

fn system_info() -> serde_json::Value {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_processes(sysinfo::ProcessesToUpdate::All, false);
    json!({
        "memory_total_bytes": sys.total_memory(),
        "memory_available_bytes": sys.available_memory(),
        "process_count": sys.processes().len(),
    })
}

/// Build the health router.
pub fn router(state: Arc<StatusState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .route("/health/live", get(live))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the health routes until shutdown.
pub async fn serve(
    state: Arc<StatusState>,
    port: u16,
    shutdown_token: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port = port, "Health endpoints listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await
        .map_err(|e| {
            error!(error = %e, "Health server error");
            e.into()
        })
}

async fn live() -> &'static str {
    "OK"
}

async fn ready(State(state): State<Arc<StatusState>>) -> impl IntoResponse {
    match state.overall() {
        OverallStatus::Healthy => (StatusCode::OK, "ready"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
    }
}

async fn health(State(state): State<Arc<StatusState>>) -> impl IntoResponse {
    let (code, body) = state.snapshot();
    (code, Json(body))
}
