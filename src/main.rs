use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::{error, info, warn};
use time::UtcOffset;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use sensor_edge::aggregation::Aggregator;
use sensor_edge::clock::{Clock, SystemClock};
use sensor_edge::config::{EdgeConfig, SensorKind};
use sensor_edge::models::{Aggregates, MeasurementAggregates};
use sensor_edge::sampling::{Collector, Scheduler};
use sensor_edge::sensor::{SensorSource, SimulatedSensor};
use sensor_edge::storage::{DayFileRouter, FileStore, HybridStore};
use sensor_edge::utils::format_datetime;

fn build_sensor(
    config: &EdgeConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn SensorSource>, Box<dyn std::error::Error>> {
    match &config.sensor {
        SensorKind::Simulated => Ok(Arc::new(SimulatedSensor::new(clock))),
        #[cfg(feature = "bluetooth")]
        SensorKind::Ruuvi { mac } => Ok(Arc::new(sensor_edge::sensor::ruuvi::RuuviSensor::new(
            mac.clone(),
            config.sensor_scan_timeout,
            clock,
        ))),
        #[cfg(not(feature = "bluetooth"))]
        SensorKind::Ruuvi { .. } => {
            Err("SENSOR=ruuvi needs a build with the `bluetooth` feature".into())
        }
    }
}

fn log_dimension(name: &str, unit: &str, aggregates: &Aggregates) {
    info!(
        "  {}: first {}{} at {}, min {}{} at {}, max {}{} at {}, last {}{} at {}",
        name,
        aggregates.first.value,
        unit,
        format_datetime(&aggregates.first.time),
        aggregates.min.value,
        unit,
        format_datetime(&aggregates.min.time),
        aggregates.max.value,
        unit,
        format_datetime(&aggregates.max.time),
        aggregates.last.value,
        unit,
        format_datetime(&aggregates.last.time),
    );
}

fn log_summary(summary: &MeasurementAggregates) {
    log_dimension("Temperature", "°C", &summary.temperature);
    log_dimension("Humidity", "%", &summary.humidity);
    log_dimension("Pressure", " hPa", &summary.pressure);
}

/// Log a one-bucket summary of every elapsed interval
async fn summary_loop(
    aggregator: Aggregator<HybridStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
) {
    loop {
        sleep(interval).await;

        let end = clock.now();
        let start = end - interval;
        info!(
            "Summary for {} - {}:",
            format_datetime(&start),
            format_datetime(&end)
        );

        let mut buckets = match aggregator
            .aggregate(start, end, 1, CancellationToken::new())
            .await
        {
            Ok(buckets) => buckets,
            Err(e) => {
                error!("Failed to aggregate measurements: {}", e);
                continue;
            }
        };

        match buckets.next().await {
            Some(Ok(summary)) => log_summary(&summary),
            Some(Err(e)) => error!("Failed to aggregate measurements: {}", e),
            // Warning if no data collected
            None => warn!("No data collected during this interval!"),
        }
    }
}

async fn run(config: EdgeConfig, offset: UtcOffset) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting sensor edge service, data in {}", config.data_dir.display());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(offset));
    let files = FileStore::new(DayFileRouter::new(&config.data_dir));
    let store = Arc::new(HybridStore::new(files, Arc::clone(&clock)));
    let sensor = build_sensor(&config, Arc::clone(&clock))?;
    let collector = Arc::new(Collector::new(sensor, Arc::clone(&store), Arc::clone(&clock)));

    let mut scheduler = Scheduler::new(collector);
    scheduler.start()?;

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    // Run the summary loop until the shutdown signal arrives
    tokio::select! {
        _ = summary_loop(Aggregator::new(store), Arc::clone(&clock), config.summary_interval) => {}
        _ = &mut rx => {
            info!("Shutdown requested, stopping measurements");
        }
    }

    if let Err(e) = scheduler.stop(config.shutdown_timeout).await {
        warn!("{}, exiting anyway", e);
    }
    info!("Program terminated. Exiting gracefully.");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match EdgeConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Resolve the clock offset before the runtime starts its worker threads
    let offset = config.resolve_offset();

    let runtime = tokio::runtime::Runtime::new()?;
    if let Err(e) = runtime.block_on(run(config, offset)) {
        error!("Fatal error: {}", e);
        return Err(e);
    }
    Ok(())
}
