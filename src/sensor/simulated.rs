use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use super::{SensorError, SensorSource};
use crate::clock::Clock;
use crate::models::MeasurementEntry;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Stand-in sensor for running the device without hardware.
///
/// Values follow a smooth daily cycle keyed to the clock's local time of
/// day, so the same timestamp always yields the same reading.
pub struct SimulatedSensor {
    clock: Arc<dyn Clock>,
    latency: Duration,
}

impl SimulatedSensor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            latency: Duration::ZERO,
        }
    }

    /// Delay each read, to mimic a slow driver.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn sample(&self) -> Result<MeasurementEntry, SensorError> {
        let time = self.clock.now();
        let seconds = f64::from(time.hour()) * 3600.0
            + f64::from(time.minute()) * 60.0
            + f64::from(time.second());
        // Coldest around 04:00, warmest around 16:00.
        let phase = (seconds / SECONDS_PER_DAY - 5.0 / 12.0) * TAU;

        let temperature = 18.0 + 6.0 * phase.sin();
        let humidity = 55.0 - 15.0 * phase.sin();
        let pressure = 1013.25 + 2.5 * (phase / 2.0).cos();

        Ok(MeasurementEntry::new(
            time,
            two_decimals(temperature)?,
            two_decimals(humidity)?,
            two_decimals(pressure)?,
        ))
    }
}

fn two_decimals(value: f64) -> Result<Decimal, SensorError> {
    Decimal::try_from(value)
        .map(|d| d.round_dp(2).normalize())
        .map_err(|e| SensorError::Decode(e.to_string()))
}

#[async_trait]
impl SensorSource for SimulatedSensor {
    async fn read(&self, cancel: &CancellationToken) -> Result<MeasurementEntry, SensorError> {
        if !self.latency.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(SensorError::Cancelled),
                _ = tokio::time::sleep(self.latency) => {}
            }
        }
        self.sample()
    }
}
