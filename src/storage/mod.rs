//! Measurement storage: the day-file format, the file store behind it and
//! the hybrid memory/file store that answers range queries.

pub mod codec;
pub mod error;
pub mod file_store;
pub mod hybrid;
pub mod router;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::models::MeasurementEntry;

pub use error::StoreError;
pub use file_store::FileStore;
pub use hybrid::HybridStore;
pub use router::DayFileRouter;

/// Lazy, finite sequence of entries read for a range.
pub type EntryStream = BoxStream<'static, Result<MeasurementEntry, StoreError>>;

/// Anything that can answer a time-range query with a stream of entries.
#[async_trait]
pub trait RangeSource: Send + Sync {
    async fn query(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        cancel: CancellationToken,
    ) -> Result<EntryStream, StoreError>;
}
