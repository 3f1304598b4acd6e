//! Upstream RPC health tracking.
//!
//! [`RpcHealthTracker`] is a pure state machine fed with the outcome of every
//! RPC call. An endpoint that keeps failing for at least a minute produces a
//! single down notification; the first success afterwards produces a single
//! recovery notification. Brief blips below the threshold stay silent.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::notifier::{Notification, NotifierHandle};

/// How long an endpoint must be failing before a down notification fires.
const DOWN_THRESHOLD: Duration = Duration::from_secs(60);

/// Outcome of an RPC call, as reported by the client.
#[derive(Debug)]
pub enum HealthEvent {
    /// The server answered (a JSON-RPC application error still counts: the
    /// server is up).
    Success,
    /// Transport failure, timeout, or non-200 response.
    Failure { reason: String },
}

/// Edge-triggered notification produced by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthTransition {
    Down {
        down_since: DateTime<Utc>,
        last_error: String,
    },
    Recovered {
        down_since: DateTime<Utc>,
        recovered_at: DateTime<Utc>,
    },
}

/// Tracks up/down state of a single upstream RPC endpoint.
///
/// At most one `Down` and one matching `Recovered` transition is emitted per
/// outage episode.
#[derive(Debug, Default)]
pub struct RpcHealthTracker {
    down_since: Option<DateTime<Utc>>,
    notified: bool,
    last_error: Option<String>,
}

impl RpcHealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful call at `now`.
    pub fn record_success(&mut self, now: DateTime<Utc>) -> Option<HealthTransition> {
        let down_since = self.down_since.take()?;
        let notified = std::mem::take(&mut self.notified);
        self.last_error = None;

        notified.then_some(HealthTransition::Recovered {
            down_since,
            recovered_at: now,
        })
    }

    /// Record a failed call at `now`.
    pub fn record_failure(&mut self, reason: String, now: DateTime<Utc>) -> Option<HealthTransition> {
        let down_since = *self.down_since.get_or_insert(now);
        self.last_error = Some(reason.clone());

        if self.notified {
            return None;
        }

        let elapsed = now.signed_duration_since(down_since);
        if elapsed.num_milliseconds() >= DOWN_THRESHOLD.as_millis() as i64 {
            self.notified = true;
            Some(HealthTransition::Down {
                down_since,
                last_error: reason,
            })
        } else {
            None
        }
    }

    /// Whether the endpoint is currently failing.
    pub fn is_down(&self) -> bool {
        self.down_since.is_some()
    }
}

/// Owns the tracker for the upstream RPC endpoint and forwards transitions
/// to the notifier.
pub struct RpcHealthService {
    url: String,
    tracker: RpcHealthTracker,
    health_rx: mpsc::Receiver<HealthEvent>,
    notifier: NotifierHandle,
}

impl RpcHealthService {
    pub fn new(
        url: String,
        notifier: NotifierHandle,
    ) -> (Self, mpsc::Sender<HealthEvent>) {
        let (health_tx, health_rx) = mpsc::channel(256);
        (
            Self {
                url,
                tracker: RpcHealthTracker::new(),
                health_rx,
                notifier,
            },
            health_tx,
        )
    }

    pub async fn run(mut self, shutdown_token: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown_token.cancelled() => {
                    info!("RpcHealthService received shutdown signal");
                    break;
                }

                Some(event) = self.health_rx.recv() => {
                    self.handle_event(event).await;
                }

                else => break,
            }
        }
    }

    async fn handle_event(&mut self, event: HealthEvent) {
        let now = Utc::now();
        let transition = match event {
            HealthEvent::Success => self.tracker.record_success(now),
            HealthEvent::Failure { reason } => {
                debug!(url = %self.url, reason = %reason, "RPC call failed");
                self.tracker.record_failure(reason, now)
            }
        };

        match transition {
            Some(HealthTransition::Down {
                down_since,
                last_error,
            }) => {
                warn!(url = %self.url, down_since = %down_since, error = %last_error, "RPC endpoint is down");
                self.notifier
                    .notify(Notification::RpcDown {
                        url: self.url.clone(),
                        down_since,
                        last_error,
                    })
                    .await;
            }
            Some(HealthTransition::Recovered {
                down_since,
                recovered_at,
            }) => {
                info!(url = %self.url, down_since = %down_since, "RPC endpoint recovered");
                self.notifier
                    .notify(Notification::RpcRecovered {
                        url: self.url.clone(),
                        down_since,
                        recovered_at,
                    })
                    .await;
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn short_blip_stays_silent() {
        let mut tracker = RpcHealthTracker::new();
        assert_eq!(tracker.record_failure("refused".into(), at(0)), None);
        assert_eq!(tracker.record_failure("refused".into(), at(30)), None);
        // Recovery before the threshold: no down, so no recovered either.
        assert_eq!(tracker.record_success(at(45)), None);
        assert!(!tracker.is_down());
    }

    #[test]
    fn one_down_and_one_recovered_per_episode() {
        let mut tracker = RpcHealthTracker::new();
        assert_eq!(tracker.record_failure("refused".into(), at(0)), None);

        let down = tracker.record_failure("refused".into(), at(61)).unwrap();
        assert_eq!(
            down,
            HealthTransition::Down {
                down_since: at(0),
                last_error: "refused".into(),
            }
        );

        // Continued failures do not re-notify.
        assert_eq!(tracker.record_failure("timeout".into(), at(90)), None);

        let recovered = tracker.record_success(at(120)).unwrap();
        assert_eq!(
            recovered,
            HealthTransition::Recovered {
                down_since: at(0),
                recovered_at: at(120),
            }
        );

        // Fully reset: the next episode starts from scratch.
        assert_eq!(tracker.record_failure("refused".into(), at(130)), None);
        assert!(tracker.record_failure("refused".into(), at(200)).is_some());
    }

    #[test]
    fn success_while_clean_is_noop() {
        let mut tracker = RpcHealthTracker::new();
        assert_eq!(tracker.record_success(at(0)), None);
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut tracker = RpcHealthTracker::new();
        tracker.record_failure("refused".into(), at(0));
        let exactly = at(0) + TimeDelta::seconds(60);
        assert!(tracker.record_failure("refused".into(), exactly).is_some());
    }
}
