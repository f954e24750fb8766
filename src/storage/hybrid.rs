use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info};
use time::{Duration, OffsetDateTime, Time};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::error::StoreError;
use super::file_store::FileStore;
use super::{EntryStream, RangeSource};
use crate::clock::Clock;
use crate::models::MeasurementEntry;

/// Smallest representable step, used to close ranges just before midnight.
const TICK: Duration = Duration::NANOSECOND;

/// Today's entries, in arrival order.
#[derive(Debug, Default)]
struct TodayBuffer {
    entries: Vec<MeasurementEntry>,
}

impl TodayBuffer {
    /// Append, clearing first if `entry` belongs to a later day than the
    /// buffered ones. Returns whether a rollover happened.
    fn push(&mut self, entry: MeasurementEntry) -> bool {
        let rolled = self
            .entries
            .first()
            .is_some_and(|first| first.day_key() < entry.day_key());
        if rolled {
            self.entries.clear();
        }
        self.entries.push(entry);
        rolled
    }

    /// Remove the most recent copy of `entry`, if still buffered.
    fn forget(&mut self, entry: &MeasurementEntry) {
        if let Some(index) = self.entries.iter().rposition(|e| e == entry) {
            self.entries.remove(index);
        }
    }

    fn between(&self, start: OffsetDateTime, end: OffsetDateTime) -> Vec<MeasurementEntry> {
        self.entries
            .iter()
            .filter(|e| e.time >= start && e.time <= end)
            .copied()
            .collect()
    }
}

/// System of record for measurements.
///
/// Today's entries are served from memory; anything older comes from the
/// day files. Writes land in memory first, then on disk. The two views may
/// briefly disagree while a write is in flight.
pub struct HybridStore {
    files: FileStore,
    clock: Arc<dyn Clock>,
    /// `None` until first loaded from today's day file.
    today: RwLock<Option<TodayBuffer>>,
}

impl HybridStore {
    pub fn new(files: FileStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            files,
            clock,
            today: RwLock::new(None),
        }
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub async fn store(
        &self,
        entry: MeasurementEntry,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        {
            let mut today = self.today.write().await;
            if today.is_none() {
                *today = Some(self.load_today(cancel).await?);
            }
            if let Some(buffer) = today.as_mut() {
                if buffer.push(entry) {
                    info!("Day rollover, today's buffer restarted at {}", entry.time);
                }
            }
        }

        let saved = self.files.save(&entry, cancel).await;
        if saved.is_err() {
            // Not on disk: drop it from memory too so a retry does not double it.
            let mut today = self.today.write().await;
            if let Some(buffer) = today.as_mut() {
                buffer.forget(&entry);
            }
        }
        saved
    }

    /// Lazily read every entry in `[start, end]`, never past the current time.
    ///
    /// A range lying entirely in today never touches the day files.
    pub async fn query(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        cancel: CancellationToken,
    ) -> Result<EntryStream, StoreError> {
        if start > end {
            return Err(StoreError::InvalidRange { start, end });
        }

        let now = self.clock.now();
        if start > now {
            return Ok(stream::empty().boxed());
        }

        let start = start.to_offset(now.offset());
        let mut end = end.to_offset(now.offset());
        let today_midnight = now.replace_time(Time::MIDNIGHT);

        if start.replace_time(Time::MIDNIGHT) > today_midnight {
            return Ok(stream::empty().boxed());
        }

        if end < today_midnight {
            debug!("Query {} - {} served from day files", start, end);
            return Ok(self.files.read(start, end, cancel));
        }

        if end >= now {
            end = now;
        }

        if start < today_midnight {
            let past = self.files.read(start, today_midnight - TICK, cancel.clone());
            let today = self.today_between(today_midnight, end, &cancel).await?;
            return Ok(past.chain(stream::iter(today).map(Ok)).boxed());
        }

        let today = self.today_between(start, end, &cancel).await?;
        Ok(stream::iter(today).map(Ok).boxed())
    }

    /// Private copy of today's entries within `[start, end]`.
    async fn today_between(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        cancel: &CancellationToken,
    ) -> Result<Vec<MeasurementEntry>, StoreError> {
        {
            let today = self.today.read().await;
            if let Some(buffer) = today.as_ref() {
                return Ok(buffer.between(start, end));
            }
        }

        let mut today = self.today.write().await;
        // Another task may have loaded it between the two locks.
        if today.is_none() {
            *today = Some(self.load_today(cancel).await?);
        }
        Ok(today
            .as_ref()
            .map(|buffer| buffer.between(start, end))
            .unwrap_or_default())
    }

    async fn load_today(&self, cancel: &CancellationToken) -> Result<TodayBuffer, StoreError> {
        let midnight = self.clock.now().replace_time(Time::MIDNIGHT);
        let entries: Vec<MeasurementEntry> = self
            .files
            .read(midnight, midnight + Duration::DAY - TICK, cancel.clone())
            .try_collect()
            .await?;

        debug!("Loaded {} entries for {}", entries.len(), midnight.date());
        Ok(TodayBuffer { entries })
    }
}

#[async_trait]
impl RangeSource for HybridStore {
    async fn query(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        cancel: CancellationToken,
    ) -> Result<EntryStream, StoreError> {
        HybridStore::query(self, start, end, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::storage::router::DayFileRouter;
    use rust_decimal::Decimal;
    use tempfile::{tempdir, TempDir};
    use time::macros::datetime;

    fn entry(time: OffsetDateTime, temperature: i64) -> MeasurementEntry {
        MeasurementEntry::new(
            time,
            Decimal::from(temperature),
            Decimal::from(50),
            Decimal::from(1000),
        )
    }

    fn setup(now: OffsetDateTime) -> (TempDir, Arc<MockClock>, HybridStore) {
        let dir = tempdir().unwrap();
        let clock = Arc::new(MockClock::with_time(now));
        let store = HybridStore::new(
            FileStore::new(DayFileRouter::new(dir.path())),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (dir, clock, store)
    }

    async fn collect(stream: EntryStream) -> Vec<MeasurementEntry> {
        stream.try_collect().await.unwrap()
    }

    #[tokio::test]
    async fn test_rejects_inverted_range() {
        let (_dir, _clock, store) = setup(datetime!(2024-05-10 12:00 UTC));

        let result = store
            .query(
                datetime!(2024-05-10 11:00 UTC),
                datetime!(2024-05-10 10:00 UTC),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(StoreError::InvalidRange { .. })));
    }

    #[tokio::test]
    async fn test_today_query_served_from_memory() {
        let (_dir, _clock, store) = setup(datetime!(2024-05-10 12:00 +2));
        let cancel = CancellationToken::new();
        let buffered = entry(datetime!(2024-05-10 08:00 +2), 1);
        store.store(buffered, &cancel).await.unwrap();

        // On disk for today but unknown to the loaded buffer.
        store
            .files()
            .save(&entry(datetime!(2024-05-10 09:00 +2), 2), &cancel)
            .await
            .unwrap();

        let today = collect(
            store
                .query(datetime!(2024-05-10 07:00 +2), datetime!(2024-05-10 23:00 +2), cancel)
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(today, [buffered]);
    }

    #[tokio::test]
    async fn test_future_query_touches_neither_files_nor_memory() {
        let (_dir, _clock, store) = setup(datetime!(2024-05-10 12:00 UTC));
        let cancel = CancellationToken::new();
        store
            .files()
            .save(&entry(datetime!(2024-05-10 12:30 UTC), 1), &cancel)
            .await
            .unwrap();

        let result = collect(
            store
                .query(datetime!(2024-05-10 12:01 UTC), datetime!(2024-05-11 12:00 UTC), cancel)
                .await
                .unwrap(),
        )
        .await;
        assert!(result.is_empty());
        assert!(store.today.read().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_save_is_not_kept_in_memory() {
        let (dir, _clock, store) = setup(datetime!(2024-05-10 12:00 UTC));
        let cancel = CancellationToken::new();
        // A plain file where the day file directory should be.
        std::fs::write(dir.path().join("measurements"), "").unwrap();

        let failed = entry(datetime!(2024-05-10 11:00 UTC), 1);
        assert!(matches!(
            store.store(failed, &cancel).await,
            Err(StoreError::Io(_))
        ));

        std::fs::remove_file(dir.path().join("measurements")).unwrap();
        store.store(failed, &cancel).await.unwrap();

        let result = collect(
            store
                .query(datetime!(2024-05-10 00:00 UTC), datetime!(2024-05-10 12:00 UTC), cancel)
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(result, [failed]);
    }

    #[tokio::test]
    async fn test_query_clamps_to_now() {
        let (_dir, clock, store) = setup(datetime!(2024-05-10 12:00 UTC));
        let cancel = CancellationToken::new();
        store.store(entry(datetime!(2024-05-10 11:00 UTC), 1), &cancel).await.unwrap();
        store.store(entry(datetime!(2024-05-10 13:00 UTC), 2), &cancel).await.unwrap();

        let result = collect(
            store
                .query(datetime!(2024-05-10 00:00 UTC), datetime!(2024-05-10 23:00 UTC), cancel.clone())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(result, [entry(datetime!(2024-05-10 11:00 UTC), 1)]);

        clock.set_time(datetime!(2024-05-10 14:00 UTC));
        let result = collect(
            store
                .query(datetime!(2024-05-10 00:00 UTC), datetime!(2024-05-10 23:00 UTC), cancel)
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn test_query_spanning_past_and_today() {
        let (_dir, clock, store) = setup(datetime!(2024-05-09 20:00 UTC));
        let cancel = CancellationToken::new();
        store.store(entry(datetime!(2024-05-09 19:00 UTC), 1), &cancel).await.unwrap();

        clock.set_time(datetime!(2024-05-10 06:00 UTC));
        store.store(entry(datetime!(2024-05-10 05:00 UTC), 2), &cancel).await.unwrap();

        let result = collect(
            store
                .query(datetime!(2024-05-09 00:00 UTC), datetime!(2024-05-10 06:00 UTC), cancel.clone())
                .await
                .unwrap(),
        )
        .await;
        let temperatures: Vec<_> = result.iter().map(|e| e.temperature).collect();
        assert_eq!(temperatures, [Decimal::from(1), Decimal::from(2)]);

        let past = collect(
            store
                .query(datetime!(2024-05-09 00:00 UTC), datetime!(2024-05-09 23:00 UTC), cancel)
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(past.len(), 1);
    }

    #[tokio::test]
    async fn test_rollover_clears_previous_day() {
        let (_dir, clock, store) = setup(datetime!(2024-05-09 23:58 UTC));
        let cancel = CancellationToken::new();
        store.store(entry(datetime!(2024-05-09 23:57 UTC), 1), &cancel).await.unwrap();

        clock.set_time(datetime!(2024-05-10 00:02 UTC));
        store.store(entry(datetime!(2024-05-10 00:01 UTC), 2), &cancel).await.unwrap();

        let buffered = store.today.read().await;
        let buffered = &buffered.as_ref().unwrap().entries;
        assert_eq!(buffered, &[entry(datetime!(2024-05-10 00:01 UTC), 2)]);
    }

    #[tokio::test]
    async fn test_lazy_load_seeds_from_today_file() {
        let dir = tempdir().unwrap();
        let files = FileStore::new(DayFileRouter::new(dir.path()));
        let cancel = CancellationToken::new();
        files.save(&entry(datetime!(2024-05-10 01:00 UTC), 7), &cancel).await.unwrap();
        files.save(&entry(datetime!(2024-05-09 23:00 UTC), 6), &cancel).await.unwrap();

        let clock = Arc::new(MockClock::with_time(datetime!(2024-05-10 12:00 UTC)));
        let store = HybridStore::new(files, clock);

        let result = collect(
            store
                .query(datetime!(2024-05-10 00:00 UTC), datetime!(2024-05-10 12:00 UTC), cancel)
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(result, [entry(datetime!(2024-05-10 01:00 UTC), 7)]);
    }
}
