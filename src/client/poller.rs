use std::time::Duration;
use tokio::time::{sleep, Instant};

use super::{AnalysisApi, ClientError, ImageFile};
use crate::models::analysis::AnalysisResult;
use crate::models::api::StatusResponse;
use crate::models::job::JobId;

/// Timing of the status loop.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Minimum elapsed time between progress callbacks.
    pub progress_every: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_attempts: 120,
            progress_every: Duration::from_secs(2),
        }
    }
}

impl PollConfig {
    /// How long the poller waits before giving up.
    pub fn timeout(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Where one submission is from the client's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum PollerState {
    Idle,
    Submitting,
    Polling {
        job_id: JobId,
        attempts: u32,
    },
    Completed {
        job_id: JobId,
        result: AnalysisResult,
    },
    Failed {
        job_id: Option<JobId>,
        error: String,
    },
    /// No answer in time. The job may still finish on the server.
    TimedOut {
        job_id: JobId,
    },
}

impl PollerState {
    /// Whether the user may start another submission.
    pub fn trigger_enabled(&self) -> bool {
        !matches!(self, PollerState::Submitting | PollerState::Polling { .. })
    }

    /// Leaving now abandons the poll, though not the server-side job.
    pub fn warn_on_leave(&self) -> bool {
        matches!(self, PollerState::Polling { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollerState::Completed { .. } | PollerState::Failed { .. } | PollerState::TimedOut { .. }
        )
    }
}

/// Receives UI updates from a running poller.
pub trait PollObserver {
    /// Called on every change of state kind, not on every poll tick.
    fn on_state(&mut self, _state: &PollerState) {}

    /// Called at most once per `progress_every` while polling.
    fn on_progress(&mut self, _job_id: JobId, _elapsed: Duration) {}
}

impl PollObserver for () {}

/// Drives one submission from upload to a terminal state.
///
/// A poller is good for a single submission; create a new one for the next image.
pub struct Poller {
    config: PollConfig,
    state: PollerState,
}

impl Poller {
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            state: PollerState::Idle,
        }
    }

    pub fn state(&self) -> &PollerState {
        &self.state
    }

    fn enter<O: PollObserver + ?Sized>(&mut self, next: PollerState, observer: &mut O) {
        self.state = next;
        observer.on_state(&self.state);
    }

    /// Submit `image` and poll until the job is terminal or the attempt budget runs out.
    ///
    /// Only fails with `ClientError::Busy` when this poller was already used;
    /// every other problem ends in `Failed`.
    pub async fn run<A, O>(
        &mut self,
        api: &A,
        image: &ImageFile,
        observer: &mut O,
    ) -> Result<&PollerState, ClientError>
    where
        A: AnalysisApi + ?Sized,
        O: PollObserver + ?Sized,
    {
        if self.state != PollerState::Idle {
            return Err(ClientError::Busy);
        }

        self.enter(PollerState::Submitting, observer);
        let job_id = match api.submit(image).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "Submission rejected");
                self.enter(
                    PollerState::Failed {
                        job_id: None,
                        error: e.to_string(),
                    },
                    observer,
                );
                return Ok(&self.state);
            }
        };

        tracing::debug!(job_id, "Submission accepted, polling");
        self.enter(PollerState::Polling { job_id, attempts: 0 }, observer);

        let started = Instant::now();
        let mut last_progress = Duration::ZERO;

        for attempt in 1..=self.config.max_attempts {
            sleep(self.config.interval).await;
            self.state = PollerState::Polling {
                job_id,
                attempts: attempt,
            };

            match api.status(job_id).await {
                Ok(StatusResponse::Processing) => {}
                Ok(StatusResponse::Completed(result)) => {
                    self.enter(PollerState::Completed { job_id, result }, observer);
                    return Ok(&self.state);
                }
                Ok(StatusResponse::Error { error }) => {
                    self.enter(
                        PollerState::Failed {
                            job_id: Some(job_id),
                            error,
                        },
                        observer,
                    );
                    return Ok(&self.state);
                }
                Err(ClientError::NotFound) => {
                    self.enter(
                        PollerState::Failed {
                            job_id: Some(job_id),
                            error: ClientError::NotFound.to_string(),
                        },
                        observer,
                    );
                    return Ok(&self.state);
                }
                Err(e) => {
                    tracing::warn!(job_id, attempt, error = %e, "Status check failed, retrying");
                }
            }

            let elapsed = started.elapsed();
            if elapsed.saturating_sub(last_progress) >= self.config.progress_every {
                observer.on_progress(job_id, elapsed);
                last_progress = elapsed;
            }
        }

        tracing::info!(
            job_id,
            attempts = self.config.max_attempts,
            "Gave up waiting for analysis"
        );
        self.enter(PollerState::TimedOut { job_id }, observer);
        Ok(&self.state)
    }
}
