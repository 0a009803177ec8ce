//! Step worker
//!
//! Runs every attempt of one step execution inside a single task and
//! reports progress back to the coordinator over a channel. Concurrency
//! across steps and runs is bounded by a shared semaphore; a permit is held
//! for the duration of an attempt, not during backoff.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use stratus_core::domain::step::StepId;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::retry::RetryPolicy;
use crate::error::StepError;
use crate::exchange::StepOutput;
use crate::steps::{StepAction, StepContext};

/// Progress report of a step worker
#[derive(Debug)]
pub enum StepEvent {
    AttemptStarted {
        run: DateTime<Utc>,
        step: StepId,
        attempt: u32,
        at: DateTime<Utc>,
    },
    /// A failed attempt that will be retried after `retry_in`
    AttemptFailed {
        run: DateTime<Utc>,
        step: StepId,
        attempt: u32,
        error: String,
        retry_in: Duration,
    },
    /// Final outcome; sent exactly once per job
    Finished {
        run: DateTime<Utc>,
        step: StepId,
        outcome: Result<StepOutput, StepError>,
        at: DateTime<Utc>,
    },
}

pub struct StepJob {
    pub ctx: StepContext,
    pub action: Arc<dyn StepAction>,
    pub retry: RetryPolicy,
}

impl StepJob {
    pub fn spawn(
        self,
        semaphore: Arc<Semaphore>,
        events: mpsc::UnboundedSender<StepEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let run = self.ctx.logical_timestamp;
            let step = self.ctx.step.clone();

            let outcome = self.execute(&semaphore, &events).await;

            // The coordinator may already be gone during shutdown
            let _ = events.send(StepEvent::Finished {
                run,
                step,
                outcome,
                at: Utc::now(),
            });
        })
    }

    async fn execute(
        mut self,
        semaphore: &Semaphore,
        events: &mpsc::UnboundedSender<StepEvent>,
    ) -> Result<StepOutput, StepError> {
        let run = self.ctx.logical_timestamp;
        let cancel = self.ctx.cancel.clone();
        let mut attempt = 1;

        loop {
            let result = tokio::select! {
                biased;

                _ = cancel.cancelled() => Err(StepError::Cancelled),

                result = async {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|_| StepError::Cancelled)?;

                    self.ctx.attempt = attempt;
                    let _ = events.send(StepEvent::AttemptStarted {
                        run,
                        step: self.ctx.step.clone(),
                        attempt,
                        at: Utc::now(),
                    });
                    debug!("[{}] {} attempt {} started", run, self.ctx.step, attempt);

                    self.action.run(&self.ctx).await
                } => result,
            };

            let error = match result {
                Ok(output) => return Ok(output),
                Err(error) => error,
            };

            let retryable = self.action.retryable() && error.is_retryable();
            if !retryable || !self.retry.should_retry(attempt) {
                if !matches!(error, StepError::Cancelled) {
                    error!(
                        "[{}] {} failed after {} attempt(s): {}",
                        run, self.ctx.step, attempt, error
                    );
                }
                return Err(error);
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                "[{}] {} attempt {}/{} failed: {}. Retrying in {:?}...",
                run, self.ctx.step, attempt, self.retry.max_attempts, error, delay
            );
            let _ = events.send(StepEvent::AttemptFailed {
                run,
                step: self.ctx.step.clone(),
                attempt,
                error: error.to_string(),
                retry_in: delay,
            });

            tokio::select! {
                _ = cancel.cancelled() => return Err(StepError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::extract::Extract;
    use crate::testing::{FakeSource, cities};
    use std::collections::BTreeMap;
    use stratus_core::domain::step::StepKind;
    use tokio_util::sync::CancellationToken;

    fn job(source: Arc<FakeSource>, location: usize, retry: RetryPolicy) -> StepJob {
        let location = cities()[location].clone();
        StepJob {
            ctx: StepContext::new(
                crate::testing::start(),
                StepId::scoped(StepKind::Extract, &location.name),
                Some(location),
                BTreeMap::new(),
                CancellationToken::new(),
            ),
            action: Arc::new(Extract::new(source)),
            retry,
        }
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<StepEvent>) -> Vec<StepEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = matches!(event, StepEvent::Finished { .. });
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let source = Arc::new(FakeSource::new());
        source.fail_fetches("Kyiv", 2);
        let (tx, rx) = mpsc::unbounded_channel();

        let started = tokio::time::Instant::now();
        job(source.clone(), 1, RetryPolicy::fixed(3, Duration::from_secs(5)))
            .spawn(Arc::new(Semaphore::new(1)), tx)
            .await
            .unwrap();
        let events = collect(rx).await;

        assert_eq!(source.fetches_for("Kyiv"), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        let failures = events
            .iter()
            .filter(|e| matches!(e, StepEvent::AttemptFailed { .. }))
            .count();
        assert_eq!(failures, 2);
        assert!(matches!(
            events.last(),
            Some(StepEvent::Finished { outcome: Ok(StepOutput::Payload(_)), .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_at_attempt_limit() {
        let source = Arc::new(FakeSource::new());
        source.fail_fetches("Odesa", 10);
        let (tx, rx) = mpsc::unbounded_channel();

        job(source.clone(), 3, RetryPolicy::fixed(3, Duration::from_secs(1)))
            .spawn(Arc::new(Semaphore::new(1)), tx)
            .await
            .unwrap();
        let events = collect(rx).await;

        assert_eq!(source.fetches_for("Odesa"), 3);
        assert!(matches!(
            events.last(),
            Some(StepEvent::Finished { outcome: Err(StepError::Extract(_)), .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retrying() {
        let source = Arc::new(FakeSource::new());
        source.fail_fetches("Lviv", 10);
        let (tx, rx) = mpsc::unbounded_channel();

        let job = job(source.clone(), 0, RetryPolicy::fixed(5, Duration::from_secs(60)));
        let cancel = job.ctx.cancel.clone();
        let handle = job.spawn(Arc::new(Semaphore::new(1)), tx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.unwrap();
        let events = collect(rx).await;

        assert_eq!(source.fetches_for("Lviv"), 1);
        assert!(matches!(
            events.last(),
            Some(StepEvent::Finished { outcome: Err(StepError::Cancelled), .. })
        ));
    }
}
