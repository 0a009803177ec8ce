use async_trait::async_trait;
use std::sync::Arc;
use stratus_core::domain::step::StepKind;
use tracing::debug;

use super::{StepAction, StepContext};
use crate::error::StepError;
use crate::exchange::StepOutput;
use crate::source::WeatherSource;

/// Reads the raw payload for the branch's location
pub struct Extract {
    source: Arc<dyn WeatherSource>,
}

impl Extract {
    pub fn new(source: Arc<dyn WeatherSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl StepAction for Extract {
    fn kind(&self) -> StepKind {
        StepKind::Extract
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let location = ctx.location()?;
        debug!(
            "[{}] Extracting weather for {}",
            ctx.logical_timestamp, location
        );

        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(StepError::Cancelled),
            fetched = self.source.fetch(location, ctx.logical_timestamp) => {
                Ok(StepOutput::Payload(fetched?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceError;
    use crate::testing::{FakeSource, cities, payload};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use stratus_core::domain::step::StepId;
    use tokio_util::sync::CancellationToken;

    fn context(location: &str) -> StepContext {
        let location = cities()
            .into_iter()
            .find(|l| l.name == location)
            .unwrap();
        StepContext::new(
            Utc::now(),
            StepId::scoped(StepKind::Extract, &location.name),
            Some(location),
            BTreeMap::new(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_returns_payload_for_location() {
        let body = payload(1700000000, 5.2, 80.0, 40.0, 3.1);
        let source = Arc::new(FakeSource::new().with_payload("Lviv", body.clone()));

        let output = Extract::new(source.clone())
            .run(&context("Lviv"))
            .await
            .unwrap();

        assert_eq!(output, StepOutput::Payload(body));
        assert_eq!(source.fetches_for("Lviv"), 1);
    }

    #[tokio::test]
    async fn test_http_failure_is_retryable_extract_error() {
        let source = Arc::new(FakeSource::new());
        source.fail_fetches("Kyiv", 1);

        let err = Extract::new(source)
            .run(&context("Kyiv"))
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::Extract(SourceError::Client(_))));
        assert!(err.is_retryable());
    }
}
