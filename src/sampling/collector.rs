use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::models::MeasurementEntry;
use crate::sensor::{SensorError, SensorSource};
use crate::storage::{HybridStore, StoreError};
use crate::utils::{
    average_measurements, duration_until_next_minute, format_datetime, truncate_to_minute,
};

/// Fixed sampling cadence.
pub const MEASUREMENT_PERIOD: Duration = Duration::from_secs(6);

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("sensor read failed: {0}")]
    Sensor(#[from] SensorError),

    #[error("failed to store minute average: {0}")]
    Store(#[from] StoreError),

    #[error("measurement cancelled")]
    Cancelled,
}

/// What one `measure()` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureOutcome {
    /// Another measurement was still running; nothing was read.
    Skipped,
    /// The reading was buffered for the current minute.
    Sampled,
    /// The reading started a new minute; the previous minute's average was stored.
    Recorded(MeasurementEntry),
}

/// Samples the sensor and reduces each minute's readings to one average.
pub struct Collector {
    sensor: Arc<dyn SensorSource>,
    store: Arc<HybridStore>,
    clock: Arc<dyn Clock>,
    /// Readings of the current minute. Holding the lock marks a measurement
    /// in progress.
    pending: Mutex<Vec<MeasurementEntry>>,
}

impl Collector {
    pub fn new(
        sensor: Arc<dyn SensorSource>,
        store: Arc<HybridStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sensor,
            store,
            clock,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<HybridStore> {
        &self.store
    }

    /// Delay until the next whole minute, and the sampling period.
    pub fn measurement_timings(&self) -> (Duration, Duration) {
        (
            duration_until_next_minute(self.clock.now()),
            MEASUREMENT_PERIOD,
        )
    }

    /// Take one reading and fold it into the per-minute buffer.
    ///
    /// Returns `Skipped` without touching the sensor if a previous call is
    /// still running. A failed read is returned to the caller; the next call
    /// proceeds normally. If storing a finished minute fails, that minute's
    /// readings are kept and the next call stores its average again; the
    /// reading that triggered the failed store is dropped.
    pub async fn measure(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MeasureOutcome, CollectorError> {
        let Ok(mut pending) = self.pending.try_lock() else {
            debug!("Measurement already in progress, skipping");
            return Ok(MeasureOutcome::Skipped);
        };

        if cancel.is_cancelled() {
            return Err(CollectorError::Cancelled);
        }
        // The sensor decides how promptly it honors cancellation.
        let reading = self.sensor.read(cancel).await.map_err(|e| match e {
            SensorError::Cancelled => CollectorError::Cancelled,
            e => CollectorError::Sensor(e),
        })?;
        debug!(
            "Reading at {}: temp={}°C, humidity={}%, pressure={} hPa",
            format_datetime(&reading.time),
            reading.temperature,
            reading.humidity,
            reading.pressure
        );

        let minute = truncate_to_minute(reading.time);
        let finished = pending
            .first()
            .filter(|first| truncate_to_minute(first.time) != minute)
            .and_then(|first| average_measurements(&pending, truncate_to_minute(first.time)));

        let Some(average) = finished else {
            pending.push(reading);
            return Ok(MeasureOutcome::Sampled);
        };
        // The finished minute stays buffered until the store accepts it.
        self.store.store(average, cancel).await.map_err(|e| match e {
            StoreError::Cancelled => CollectorError::Cancelled,
            e => CollectorError::Store(e),
        })?;
        pending.clear();
        pending.push(reading);
        info!(
            "Stored average for {}: temp={}°C, humidity={}%, pressure={} hPa",
            format_datetime(&average.time),
            average.temperature,
            average.humidity,
            average.pressure
        );
        Ok(MeasureOutcome::Recorded(average))
    }
}
