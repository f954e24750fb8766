//! Range partitioning: first/min/max/last per dimension for each of N
//! equal time buckets.

mod partition;

use std::sync::Arc;

use futures_util::stream::BoxStream;
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::models::MeasurementAggregates;
use crate::storage::{RangeSource, StoreError};

pub use partition::partition;

pub type AggregateStream = BoxStream<'static, Result<MeasurementAggregates, AggregateError>>;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("bucket count must be at least 1")]
    InvalidBucketCount,

    /// Input went back in time.
    #[error("measurement at {current} follows a later one at {previous}")]
    NonMonotonic {
        previous: OffsetDateTime,
        current: OffsetDateTime,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Summarizes ranges read through a [`RangeSource`].
pub struct Aggregator<S: ?Sized> {
    source: Arc<S>,
}

impl<S: RangeSource + ?Sized> Aggregator<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    /// At most `bucket_count` summaries for `[start, end]`, in time order.
    ///
    /// Range and bucket-count errors are returned immediately; ordering
    /// errors surface while the stream is consumed.
    pub async fn aggregate(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        bucket_count: usize,
        cancel: CancellationToken,
    ) -> Result<AggregateStream, AggregateError> {
        if bucket_count == 0 {
            return Err(AggregateError::InvalidBucketCount);
        }

        let entries = self.source.query(start, end, cancel.clone()).await?;
        Ok(partition(entries, start, end, bucket_count, cancel))
    }
}
