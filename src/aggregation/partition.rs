use futures_util::stream::{self, StreamExt};
use time::{Duration, OffsetDateTime};
use tokio_util::sync::CancellationToken;

use super::{AggregateError, AggregateStream};
use crate::models::{Aggregates, MeasurementAggregates, MeasurementEntry};
use crate::storage::{EntryStream, StoreError};

/// Split `[start, end]` into `bucket_count` equal buckets and summarize the
/// time-ordered `entries` per bucket.
///
/// Buckets without entries are not emitted. An entry older than its
/// predecessor ends the stream with `AggregateError::NonMonotonic`.
pub fn partition(
    entries: EntryStream,
    start: OffsetDateTime,
    end: OffsetDateTime,
    bucket_count: usize,
    cancel: CancellationToken,
) -> AggregateStream {
    let bucket_nanos = (end - start).whole_nanoseconds() as f64 / bucket_count.max(1) as f64;
    let step = (bucket_nanos.round() as i64).max(1);

    let state = PartitionState {
        entries,
        step,
        boundary: start + Duration::nanoseconds(step),
        current: None,
        previous: None,
        cancel,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        let item = state.next_bucket().await?;
        Some((item, state))
    })
    .boxed()
}

struct PartitionState {
    entries: EntryStream,
    /// Bucket width in nanoseconds, at least one.
    step: i64,
    /// Inclusive upper edge of the current bucket.
    boundary: OffsetDateTime,
    current: Option<MeasurementAggregates>,
    previous: Option<OffsetDateTime>,
    cancel: CancellationToken,
    finished: bool,
}

impl PartitionState {
    async fn next_bucket(&mut self) -> Option<Result<MeasurementAggregates, AggregateError>> {
        if self.finished {
            return None;
        }

        while let Some(item) = self.entries.next().await {
            if self.cancel.is_cancelled() {
                return self.fail(StoreError::Cancelled.into());
            }
            let entry = match item {
                Ok(entry) => entry,
                Err(e) => return self.fail(e.into()),
            };
            if let Some(previous) = self.previous.filter(|previous| entry.time < *previous) {
                return self.fail(AggregateError::NonMonotonic {
                    previous,
                    current: entry.time,
                });
            }
            self.previous = Some(entry.time);

            let completed = if entry.time > self.boundary {
                self.advance_past(entry.time);
                self.current.take()
            } else {
                None
            };
            fold(&mut self.current, &entry);

            if let Some(completed) = completed {
                return Some(Ok(completed));
            }
        }

        self.finished = true;
        self.current.take().map(Ok)
    }

    /// Move the boundary forward by whole buckets until it covers `time`.
    fn advance_past(&mut self, time: OffsetDateTime) {
        let behind = (time - self.boundary).whole_nanoseconds();
        let step = i128::from(self.step);
        let buckets = (behind + step - 1) / step;
        let distance = i64::try_from(buckets * step).unwrap_or(i64::MAX);
        self.boundary += Duration::nanoseconds(distance);
    }

    fn fail(
        &mut self,
        error: AggregateError,
    ) -> Option<Result<MeasurementAggregates, AggregateError>> {
        self.finished = true;
        Some(Err(error))
    }
}

fn fold(current: &mut Option<MeasurementAggregates>, entry: &MeasurementEntry) {
    match current {
        Some(aggregates) => {
            aggregates.temperature.include(entry.time, entry.temperature);
            aggregates.pressure.include(entry.time, entry.pressure);
            aggregates.humidity.include(entry.time, entry.humidity);
        }
        None => {
            *current = Some(MeasurementAggregates {
                temperature: Aggregates::starting_at(entry.time, entry.temperature),
                pressure: Aggregates::starting_at(entry.time, entry.pressure),
                humidity: Aggregates::starting_at(entry.time, entry.humidity),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AggregateEntry;
    use futures_util::TryStreamExt;
    use rust_decimal::Decimal;
    use time::macros::datetime;

    fn entry(
        time: OffsetDateTime,
        temperature: i64,
        humidity: i64,
        pressure: i64,
    ) -> MeasurementEntry {
        MeasurementEntry::new(
            time,
            Decimal::from(temperature),
            Decimal::from(humidity),
            Decimal::from(pressure),
        )
    }

    fn source(entries: Vec<MeasurementEntry>) -> EntryStream {
        stream::iter(entries.into_iter().map(Ok)).boxed()
    }

    fn at(value: i64, time: OffsetDateTime) -> AggregateEntry {
        AggregateEntry {
            time,
            value: Decimal::from(value),
        }
    }

    #[tokio::test]
    async fn test_two_buckets_over_four_hours() {
        let start = datetime!(2024-02-01 08:00 UTC);
        let end = datetime!(2024-02-01 12:00 UTC);
        let t = |h: u8, m: u8| start.replace_time(time::Time::from_hms(h, m, 0).unwrap());
        let entries = vec![
            entry(t(8, 0), 10, 50, 1000),
            entry(t(8, 30), 14, 40, 1002),
            entry(t(9, 0), 8, 60, 998),
            entry(t(9, 30), 14, 45, 1001),
            entry(t(10, 0), 12, 55, 1004),
            entry(t(10, 15), 20, 50, 1003),
            entry(t(11, 0), 5, 65, 999),
            entry(t(12, 0), 11, 52, 1000),
        ];

        let buckets: Vec<_> = partition(source(entries), start, end, 2, CancellationToken::new())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(buckets.len(), 2);

        let first = &buckets[0].temperature;
        assert_eq!(first.first, at(10, t(8, 0)));
        assert_eq!(first.min, at(8, t(9, 0)));
        assert_eq!(first.max, at(14, t(8, 30)));
        assert_eq!(first.last, at(12, t(10, 0)));

        let second = &buckets[1];
        assert_eq!(second.temperature.first, at(20, t(10, 15)));
        assert_eq!(second.temperature.min, at(5, t(11, 0)));
        assert_eq!(second.temperature.max, at(20, t(10, 15)));
        assert_eq!(second.temperature.last, at(11, t(12, 0)));
        assert_eq!(second.humidity.max, at(65, t(11, 0)));
        assert_eq!(second.pressure.min, at(999, t(11, 0)));
    }

    #[tokio::test]
    async fn test_empty_buckets_are_skipped() {
        let start = datetime!(2024-02-01 00:00 UTC);
        let end = datetime!(2024-02-01 10:00 UTC);
        let entries = vec![
            entry(datetime!(2024-02-01 00:30 UTC), 1, 1, 1),
            entry(datetime!(2024-02-01 07:30 UTC), 2, 2, 2),
            entry(datetime!(2024-02-01 07:45 UTC), 3, 3, 3),
        ];

        let buckets: Vec<_> = partition(source(entries), start, end, 10, CancellationToken::new())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].temperature.last, at(1, datetime!(2024-02-01 00:30 UTC)));
        assert_eq!(buckets[1].temperature.first, at(2, datetime!(2024-02-01 07:30 UTC)));
        assert_eq!(buckets[1].temperature.last, at(3, datetime!(2024-02-01 07:45 UTC)));
    }

    #[tokio::test]
    async fn test_out_of_order_input_fails() {
        let start = datetime!(2024-02-01 00:00 UTC);
        let end = datetime!(2024-02-01 10:00 UTC);
        let entries = vec![
            entry(datetime!(2024-02-01 02:00 UTC), 1, 1, 1),
            entry(datetime!(2024-02-01 01:00 UTC), 2, 2, 2),
        ];

        let result: Result<Vec<_>, _> =
            partition(source(entries), start, end, 2, CancellationToken::new())
                .try_collect()
                .await;

        assert!(matches!(result, Err(AggregateError::NonMonotonic { .. })));
    }

    #[tokio::test]
    async fn test_empty_input_and_degenerate_range() {
        let start = datetime!(2024-02-01 00:00 UTC);
        let buckets: Vec<_> = partition(source(vec![]), start, start, 3, CancellationToken::new())
            .try_collect()
            .await
            .unwrap();
        assert!(buckets.is_empty());

        let buckets: Vec<_> = partition(
            source(vec![entry(start, 1, 1, 1), entry(start, 2, 2, 2)]),
            start,
            start,
            3,
            CancellationToken::new(),
        )
        .try_collect()
        .await
        .unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].temperature.last, at(2, start));
    }

    #[tokio::test]
    async fn test_cancellation_stops_scan() {
        let start = datetime!(2024-02-01 00:00 UTC);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut buckets = partition(
            source(vec![entry(start, 1, 1, 1)]),
            start,
            datetime!(2024-02-01 01:00 UTC),
            1,
            cancel,
        );
        assert!(matches!(
            buckets.next().await,
            Some(Err(AggregateError::Store(StoreError::Cancelled)))
        ));
        assert!(buckets.next().await.is_none());
    }
}
