//! Sensor sources that produce one [`MeasurementEntry`] on demand.

pub mod ruuvi;
pub mod simulated;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::MeasurementEntry;

pub use simulated::SimulatedSensor;

#[derive(Debug, Error)]
pub enum SensorError {
    /// The sensor or its transport is not reachable.
    #[error("sensor unavailable: {0}")]
    Unavailable(String),

    #[error("sensor read timed out")]
    Timeout,

    #[error("sensor read cancelled")]
    Cancelled,

    /// The sensor answered with a payload that could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Take one reading now.
///
/// Reads may be slow (several seconds on real hardware) and should return
/// `SensorError::Cancelled` promptly once `cancel` fires.
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn read(&self, cancel: &CancellationToken) -> Result<MeasurementEntry, SensorError>;
}
