use async_trait::async_trait;
use serde_json::Value as JsonValue;
use stratus_core::domain::observation::WeatherObservation;
use stratus_core::domain::step::StepKind;

use super::{StepAction, StepContext};
use crate::error::StepError;
use crate::exchange::StepOutput;

/// Normalizes the extracted payload into a [`WeatherObservation`]
pub struct Transform;

#[async_trait]
impl StepAction for Transform {
    fn kind(&self) -> StepKind {
        StepKind::Transform
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let location = ctx.location()?;
        match ctx.input(StepKind::Extract)? {
            StepOutput::Payload(payload) => Ok(StepOutput::Observation(observation_from_payload(
                &location.name,
                payload,
            )?)),
            other => Err(StepError::Schema(format!(
                "expected a weather payload from extract, got {:?}",
                other
            ))),
        }
    }
}

/// Maps `dt`, `main.temp`, `main.humidity`, `clouds` and `wind_speed`
pub fn observation_from_payload(
    location: &str,
    payload: &JsonValue,
) -> Result<WeatherObservation, StepError> {
    let timestamp = field(payload, "/dt", "dt")?
        .as_i64()
        .ok_or_else(|| wrong_type("dt", "an integer"))?;

    Ok(WeatherObservation {
        timestamp,
        location: location.to_string(),
        temperature: number(payload, "/main/temp", "main.temp")?,
        humidity: number(payload, "/main/humidity", "main.humidity")?,
        cloudiness: number(payload, "/clouds", "clouds")?,
        wind_speed: number(payload, "/wind_speed", "wind_speed")?,
    })
}

fn field<'a>(
    payload: &'a JsonValue,
    pointer: &str,
    name: &str,
) -> Result<&'a JsonValue, StepError> {
    payload
        .pointer(pointer)
        .ok_or_else(|| StepError::Schema(format!("missing field '{}'", name)))
}

fn number(payload: &JsonValue, pointer: &str, name: &str) -> Result<f64, StepError> {
    field(payload, pointer, name)?
        .as_f64()
        .ok_or_else(|| wrong_type(name, "a number"))
}

fn wrong_type(name: &str, expected: &str) -> StepError {
    StepError::Schema(format!("field '{}' is not {}", name, expected))
}
