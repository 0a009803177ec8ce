//! Availability gate
//!
//! Pokes the weather source until it answers or the gate times out. Only the
//! task running the gate waits; sibling runs keep progressing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use stratus_core::domain::step::StepKind;
use tracing::{debug, info};

use super::{StepAction, StepContext};
use crate::error::StepError;
use crate::exchange::StepOutput;
use crate::source::WeatherSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSettings {
    /// Pause between two probes
    pub poke_interval: Duration,
    /// Total time the gate may stay closed
    pub timeout: Duration,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            poke_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(600),
        }
    }
}

pub struct AvailabilityCheck {
    source: Arc<dyn WeatherSource>,
    settings: GateSettings,
}

impl AvailabilityCheck {
    pub fn new(source: Arc<dyn WeatherSource>, settings: GateSettings) -> Self {
        Self { source, settings }
    }

    async fn poke_until_open(&self, ctx: &StepContext) {
        let mut pokes = 0u32;
        loop {
            pokes += 1;
            match self.source.probe().await {
                Ok(()) => {
                    info!(
                        "[{}] Weather API available after {} probe(s)",
                        ctx.logical_timestamp, pokes
                    );
                    return;
                }
                Err(e) => debug!(
                    "[{}] Weather API not available yet (probe {}): {}",
                    ctx.logical_timestamp, pokes, e
                ),
            }
            tokio::time::sleep(self.settings.poke_interval).await;
        }
    }
}

#[async_trait]
impl StepAction for AvailabilityCheck {
    fn kind(&self) -> StepKind {
        StepKind::AvailabilityCheck
    }

    /// The gate already waits for its full timeout
    fn retryable(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(StepError::Cancelled),
            opened = tokio::time::timeout(self.settings.timeout, self.poke_until_open(ctx)) => {
                match opened {
                    Ok(()) => Ok(StepOutput::Done),
                    Err(_) => Err(StepError::Timeout(self.settings.timeout)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSource;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use stratus_core::domain::step::StepId;
    use tokio_util::sync::CancellationToken;

    fn context(cancel: CancellationToken) -> StepContext {
        StepContext::new(
            Utc::now(),
            StepId::shared(StepKind::AvailabilityCheck),
            None,
            BTreeMap::new(),
            cancel,
        )
    }

    fn gate(source: Arc<FakeSource>, timeout_secs: u64) -> AvailabilityCheck {
        AvailabilityCheck::new(
            source,
            GateSettings {
                poke_interval: Duration::from_secs(5),
                timeout: Duration::from_secs(timeout_secs),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_when_probe_succeeds() {
        let source = Arc::new(FakeSource::new());
        let output = gate(source.clone(), 30)
            .run(&context(CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(output, StepOutput::Done);
        assert_eq!(source.probes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_poking_until_available() {
        let source = Arc::new(FakeSource::new());
        source.fail_probes(3);

        let output = gate(source.clone(), 30)
            .run(&context(CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(output, StepOutput::Done);
        assert_eq!(source.probes(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_never_available() {
        let source = Arc::new(FakeSource::new());
        source.set_available(false);

        let started = tokio::time::Instant::now();
        let err = gate(source.clone(), 30)
            .run(&context(CancellationToken::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::Timeout(t) if t == Duration::from_secs(30)));
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        // Pokes at 0, 5, .., 25 and 30 races the deadline
        assert!(source.probes() >= 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_releases_the_poll_loop() {
        let source = Arc::new(FakeSource::new());
        source.set_available(false);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = gate(source, 600).run(&context(cancel)).await.unwrap_err();

        assert!(matches!(err, StepError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(15));
    }
}
