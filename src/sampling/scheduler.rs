//! Timer that drives the [`Collector`] with drop-not-queue ticks and a
//! bounded graceful shutdown.

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::collector::{Collector, CollectorError, MeasureOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `start` was called on a scheduler that is not idle.
    #[error("scheduler cannot start while {0}")]
    AlreadyStarted(SchedulerState),

    /// The in-flight measurement did not finish before the stop deadline.
    #[error("graceful shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
}

pub struct Scheduler {
    collector: Arc<Collector>,
    state: Arc<StdMutex<SchedulerState>>,
    /// Held by the running measurement. Ticks that find it taken are dropped.
    completion: Arc<Mutex<()>>,
    ticks: CancellationToken,
    measurements: CancellationToken,
    ticker: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(collector: Arc<Collector>) -> Self {
        Self {
            collector,
            state: Arc::new(StdMutex::new(SchedulerState::Idle)),
            completion: Arc::new(Mutex::new(())),
            ticks: CancellationToken::new(),
            measurements: CancellationToken::new(),
            ticker: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Arm the timer: first tick on the next whole minute, then every period.
    ///
    /// A scheduler runs once; starting it again is rejected.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        let state = self.state();
        if state != SchedulerState::Idle {
            return Err(SchedulerError::AlreadyStarted(state));
        }

        let (first_delay, period) = self.collector.measurement_timings();
        info!(
            "Starting measurements in {:?}, then every {:?}",
            first_delay, period
        );

        let collector = Arc::clone(&self.collector);
        let completion = Arc::clone(&self.completion);
        let ticks = self.ticks.clone();
        let measurements = self.measurements.clone();

        self.ticker = Some(tokio::spawn(async move {
            tokio::select! {
                _ = ticks.cancelled() => return,
                _ = sleep(first_delay) => {}
            }

            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticks.cancelled() => break,
                    _ = timer.tick() => tick(&collector, &completion, &measurements),
                }
            }
            debug!("Measurement timer stopped");
        }));

        self.set_state(SchedulerState::Running);
        Ok(())
    }

    /// Stop ticking, cancel the in-flight measurement and wait up to
    /// `deadline` for it to finish.
    ///
    /// The deadline bounds only the wait. A measurement that ignores
    /// cancellation keeps running in the background after a timeout.
    pub async fn stop(&mut self, deadline: Duration) -> Result<(), SchedulerError> {
        self.set_state(SchedulerState::Stopping);
        self.ticks.cancel();
        self.measurements.cancel();
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }

        let completion = Arc::clone(&self.completion).lock_owned();
        let result = match tokio::time::timeout(deadline, completion).await {
            Ok(_guard) => {
                info!("Measurements stopped");
                Ok(())
            }
            Err(_) => {
                warn!(
                    "Measurement still running after {:?}, giving up on graceful shutdown",
                    deadline
                );
                Err(SchedulerError::ShutdownTimeout(deadline))
            }
        };

        self.set_state(SchedulerState::Stopped);
        result
    }
}

fn tick(
    collector: &Arc<Collector>,
    completion: &Arc<Mutex<()>>,
    cancel: &CancellationToken,
) {
    let Ok(guard) = Arc::clone(completion).try_lock_owned() else {
        debug!("Previous measurement still running, skipping tick");
        return;
    };

    let collector = Arc::clone(collector);
    let cancel = cancel.clone();
    tokio::spawn(async move {
        match collector.measure(&cancel).await {
            Ok(MeasureOutcome::Skipped) => debug!("Measurement skipped"),
            Ok(MeasureOutcome::Sampled) => debug!("Measurement completed"),
            Ok(MeasureOutcome::Recorded(_)) => debug!("Measurement completed, minute recorded"),
            Err(CollectorError::Cancelled) => info!("Measurement cancelled"),
            Err(e) => error!("Measurement failed: {}", e),
        }
        drop(guard);
    });
}
