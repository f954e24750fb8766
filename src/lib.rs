//! Environmental sensor edge device: periodic sampling, per-minute
//! reduction, day-partitioned storage and range aggregation.
//!
//! Readings flow from a [`sensor::SensorSource`] through the
//! [`sampling::Collector`] into the [`storage::HybridStore`], which keeps
//! today's entries in memory and older ones in plain-text day files. The
//! [`aggregation::Aggregator`] summarizes any stored range into equal time
//! buckets.

pub mod aggregation;
pub mod clock;
pub mod config;
pub mod models;
pub mod sampling;
pub mod sensor;
pub mod storage;
pub mod utils;

pub use models::{AggregateEntry, Aggregates, MeasurementAggregates, MeasurementEntry};
