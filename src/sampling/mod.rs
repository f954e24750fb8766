//! Periodic sensor sampling: per-minute reduction and the timer driving it.

pub mod collector;
pub mod scheduler;

pub use collector::{Collector, CollectorError, MeasureOutcome, MEASUREMENT_PERIOD};
pub use scheduler::{Scheduler, SchedulerError, SchedulerState};
