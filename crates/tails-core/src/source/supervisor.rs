//! Runs a [`LineSource`], feeds its lines to the broker and restarts it.

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{LineSource, RestartPolicy, SourceError};
use crate::broker::Broker;

/// Lifecycle state of the supervised source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    Starting,
    Running,
    Restarting,
    Stopped,
    Failed,
}

/// Snapshot of the source, as shown on the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    pub state: SourceState,
    /// Restarts performed since the server started.
    pub restarts: u32,
    pub last_error: Option<String>,
}

impl Default for SourceStatus {
    fn default() -> Self {
        Self {
            state: SourceState::Starting,
            restarts: 0,
            last_error: None,
        }
    }
}

/// Pumps lines from a source into the broker, restarting the source on
/// termination or failure according to its [`RestartPolicy`].
pub struct SourceSupervisor {
    broker: Broker,
    policy: RestartPolicy,
    status: watch::Sender<SourceStatus>,
}

impl SourceSupervisor {
    pub fn new(broker: Broker, policy: RestartPolicy) -> Self {
        let (status, _) = watch::channel(SourceStatus::default());
        Self {
            broker,
            policy,
            status,
        }
    }

    /// Receiver for status updates.
    pub fn status(&self) -> watch::Receiver<SourceStatus> {
        self.status.subscribe()
    }

    /// Run until the source is finished for good or `shutdown` fires.
    ///
    /// Returns `Ok(())` on shutdown or on clean termination with restarts
    /// disabled.
    pub async fn run<S: LineSource>(
        self,
        mut source: S,
        shutdown: CancellationToken,
    ) -> Result<(), SourceError> {
        let description = source.describe();
        let mut attempt: u32 = 0;
        let mut first_run = true;

        loop {
            let started = Instant::now();
            let outcome = tokio::select! {
                () = shutdown.cancelled() => {
                    self.stopped(&description);
                    return Ok(());
                }
                result = self.run_once(&mut source, &mut first_run) => result,
            };

            let err = match outcome {
                Ok(()) => {
                    info!(source = %description, "Line source terminated");
                    None
                }
                Err(e) if !e.is_retryable() => {
                    error!(source = %description, error = %e, "Line source failed permanently");
                    self.failed(&e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(source = %description, error = %e, "Line source failed");
                    Some(e)
                }
            };

            if !self.policy.enabled {
                return match err {
                    None => {
                        self.stopped(&description);
                        Ok(())
                    }
                    Some(e) => {
                        self.failed(&e);
                        Err(e)
                    }
                };
            }

            if started.elapsed() >= self.policy.stable_after {
                attempt = 0;
            }

            if !self.policy.should_retry(attempt) {
                let last = err.map_or_else(|| "terminated".to_string(), |e| e.to_string());
                let e = SourceError::RetriesExhausted {
                    attempts: attempt,
                    last,
                };
                error!(source = %description, error = %e, "Giving up on line source");
                self.failed(&e);
                return Err(e);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            self.status.send_modify(|status| {
                status.state = SourceState::Restarting;
                if let Some(e) = &err {
                    status.last_error = Some(e.to_string());
                }
            });
            info!(
                source = %description,
                attempt,
                delay_ms = delay.as_millis(),
                "Restarting line source"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = shutdown.cancelled() => {
                    self.stopped(&description);
                    return Ok(());
                }
            }

            attempt = attempt.saturating_add(1);
            self.status.send_modify(|status| {
                status.restarts = status.restarts.saturating_add(1);
            });
        }
    }

    /// One start plus pump cycle.
    async fn run_once<S: LineSource>(
        &self,
        source: &mut S,
        first_run: &mut bool,
    ) -> Result<(), SourceError> {
        source.start(*first_run).await?;
        *first_run = false;
        self.status.send_modify(|status| status.state = SourceState::Running);

        let mut lines: u64 = 0;
        while let Some(line) = source.next_line().await? {
            self.broker
                .publish(line)
                .await
                .map_err(|_| SourceError::BrokerClosed)?;
            lines += 1;
        }
        debug!(lines, "Line source run ended");
        Ok(())
    }

    fn stopped(&self, description: &str) {
        info!(source = %description, "Line source stopped");
        self.status.send_modify(|status| status.state = SourceState::Stopped);
    }

    fn failed(&self, err: &SourceError) {
        self.status.send_modify(|status| {
            status.state = SourceState::Failed;
            status.last_error = Some(err.to_string());
        });
    }
}
