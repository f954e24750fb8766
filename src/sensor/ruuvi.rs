/// RuuviTag advertisement decoding and (with the `bluetooth` feature) a BLE
/// sensor source
use rust_decimal::Decimal;
use time::OffsetDateTime;

use super::SensorError;
use crate::models::MeasurementEntry;

// RuuviTag protocol constants
pub const RUUVITAG_MANUFACTURER_ID: u16 = 0x0499; // Ruuvi Innovations Ltd. manufacturer ID
const DATA_FORMAT: u8 = 5; // RuuviTag data format version 5
const PAYLOAD_LEN: usize = 24;

/// Decode RuuviTag manufacturer data format 5 into a measurement taken at `time`
///
/// Only the atmospheric fields are used:
/// - Byte 0: Data format (5)
/// - Bytes 1-2: Temperature (signed 16-bit, 0.005°C resolution)
/// - Bytes 3-4: Humidity (unsigned 16-bit, 0.0025% resolution)
/// - Bytes 5-6: Pressure (unsigned 16-bit, +50000 Pa offset, 1 Pa resolution)
///
/// Scaling is done in fixed point, so the stored value is exactly what the
/// tag reported.
pub fn decode_ruuvi_data(
    data: &[u8],
    time: OffsetDateTime,
) -> Result<MeasurementEntry, SensorError> {
    let payload: &[u8; PAYLOAD_LEN] = data.try_into().map_err(|_| {
        SensorError::Decode(format!("RuuviTag payload has {} bytes", data.len()))
    })?;
    let [format, t0, t1, h0, h1, p0, p1, ..] = *payload;
    if format != DATA_FORMAT {
        return Err(SensorError::Decode(format!(
            "unsupported RuuviTag data format {}",
            format
        )));
    }

    // Temperature: signed 16-bit integer * 0.005°C
    let temperature = Decimal::new(i64::from(i16::from_be_bytes([t0, t1])) * 5, 3);

    // Humidity: unsigned 16-bit integer * 0.0025%, capped at 100%
    let humidity = Decimal::new(i64::from(u16::from_be_bytes([h0, h1])) * 25, 4)
        .min(Decimal::ONE_HUNDRED);

    // Pressure: unsigned 16-bit integer + 50000 Pa, in hPa
    let pressure = Decimal::new(i64::from(u16::from_be_bytes([p0, p1])) + 50_000, 2);

    Ok(MeasurementEntry::new(
        time,
        temperature.normalize(),
        humidity.normalize(),
        pressure.normalize(),
    ))
}

#[cfg(feature = "bluetooth")]
pub use scanner::RuuviSensor;

#[cfg(feature = "bluetooth")]
mod scanner {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::StreamExt;
    use log::{debug, warn};
    use tokio::time::{sleep, Instant};
    use tokio_util::sync::CancellationToken;

    use super::{decode_ruuvi_data, RUUVITAG_MANUFACTURER_ID};
    use crate::clock::Clock;
    use crate::models::MeasurementEntry;
    use crate::sensor::{SensorError, SensorSource};

    const POLL_INTERVAL: Duration = Duration::from_millis(500);

    /// Reads one RuuviTag, identified by MAC address, over Bluetooth LE
    pub struct RuuviSensor {
        mac: String,
        scan_timeout: Duration,
        clock: Arc<dyn Clock>,
    }

    impl RuuviSensor {
        pub fn new(mac: impl Into<String>, scan_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
            Self {
                mac: mac.into().to_uppercase(),
                scan_timeout,
                clock,
            }
        }

        async fn scan(&self, cancel: &CancellationToken) -> Result<MeasurementEntry, SensorError> {
            let unavailable = |e: bluer::Error| SensorError::Unavailable(e.to_string());

            let session = bluer::Session::new().await.map_err(unavailable)?;
            let adapter = session.default_adapter().await.map_err(unavailable)?;
            adapter.set_powered(true).await.map_err(unavailable)?;

            // Configure discovery filter for Low Energy devices only
            let filter = bluer::DiscoveryFilter {
                transport: bluer::DiscoveryTransport::Le,
                duplicate_data: true,
                ..Default::default()
            };
            if let Err(e) = adapter.set_discovery_filter(filter).await {
                warn!("Failed to set discovery filter: {}", e);
            }

            // Keep discovery running until the tag shows up or the scan times out
            let discovery = adapter.discover_devices().await.map_err(unavailable)?;
            let discovery_handle = tokio::spawn(async move {
                let mut stream = discovery;
                while let Some(event) = stream.next().await {
                    debug!("Discovery event: {:?}", event);
                }
            });

            let deadline = Instant::now() + self.scan_timeout;
            let result = loop {
                if cancel.is_cancelled() {
                    break Err(SensorError::Cancelled);
                }
                if Instant::now() >= deadline {
                    break Err(SensorError::Timeout);
                }
                if let Some(payload) = self.advertised_payload(&adapter).await {
                    break decode_ruuvi_data(&payload, self.clock.now());
                }
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = sleep(POLL_INTERVAL) => {}
                }
            };

            discovery_handle.abort();
            result
        }

        async fn advertised_payload(&self, adapter: &bluer::Adapter) -> Option<Vec<u8>> {
            let addresses = adapter.device_addresses().await.ok()?;
            let addr = addresses
                .into_iter()
                .find(|addr| addr.to_string().to_uppercase() == self.mac)?;
            let device = adapter.device(addr).ok()?;

            match device.manufacturer_data().await {
                Ok(Some(mut data)) => data.remove(&RUUVITAG_MANUFACTURER_ID),
                Ok(None) => {
                    debug!("No manufacturer data for {}", self.mac);
                    None
                }
                Err(e) => {
                    debug!("Failed to get manufacturer data for {}: {}", self.mac, e);
                    None
                }
            }
        }
    }

    #[async_trait]
    impl SensorSource for RuuviSensor {
        async fn read(&self, cancel: &CancellationToken) -> Result<MeasurementEntry, SensorError> {
            self.scan(cancel).await
        }
    }
}
