use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use log::{debug, warn};
use time::{Date, OffsetDateTime};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::codec;
use super::error::StoreError;
use super::router::{DayFileRouter, DayPaths};
use super::EntryStream;
use crate::models::MeasurementEntry;

/// Append-only day files under `<root>/measurements/`.
///
/// Appends from one store instance are serialized; separate instances (or
/// processes) writing the same root are not coordinated.
#[derive(Debug, Clone)]
pub struct FileStore {
    router: DayFileRouter,
    write_lock: Arc<Mutex<()>>,
}

impl FileStore {
    pub fn new(router: DayFileRouter) -> Self {
        Self {
            router,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn router(&self) -> &DayFileRouter {
        &self.router
    }

    /// Append one record to the entry's day file.
    ///
    /// Cancellation is checked before the write starts. Once started, the
    /// write and flush run to completion on their own task even if the
    /// caller stops waiting. `Ok` means the record is on disk, so a
    /// cancellation requested meanwhile is left for the caller's next check.
    pub async fn save(
        &self,
        entry: &MeasurementEntry,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let path = self.router.path_for(entry.time);
        let line = codec::encode(entry)?;
        let lock = Arc::clone(&self.write_lock);

        let write = tokio::spawn(async move {
            let _guard = lock.lock().await;
            append_line(&path, &line).await
        });
        write
            .await
            .map_err(|e| StoreError::Background(e.to_string()))??;

        if cancel.is_cancelled() {
            debug!("Cancellation requested while saving, record was written");
        }
        Ok(())
    }

    /// Lazily read every record in `[start, end]`.
    ///
    /// Missing day files contribute nothing. Malformed lines are logged and
    /// skipped. Cancellation ends the stream with `StoreError::Cancelled`; it
    /// is checked before each file is opened and before each line.
    pub fn read(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
        cancel: CancellationToken,
    ) -> EntryStream {
        let state = ReadState {
            days: self.router.paths_for(start, end),
            current: None,
            start,
            end,
            cancel,
            finished: false,
        };

        stream::unfold(state, |mut state| async move {
            let item = state.next_entry().await?;
            Some((item, state))
        })
        .boxed()
    }
}

async fn append_line(path: &Path, line: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{}\n", line).as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

struct OpenDay {
    date: Date,
    path: PathBuf,
    reader: BufReader<File>,
    buffer: Vec<u8>,
    line_number: usize,
}

struct ReadState {
    days: DayPaths,
    current: Option<OpenDay>,
    start: OffsetDateTime,
    end: OffsetDateTime,
    cancel: CancellationToken,
    finished: bool,
}

impl ReadState {
    async fn next_entry(&mut self) -> Option<Result<MeasurementEntry, StoreError>> {
        if self.finished {
            return None;
        }

        loop {
            if self.cancel.is_cancelled() {
                self.finished = true;
                return Some(Err(StoreError::Cancelled));
            }

            let Some(day) = self.current.as_mut() else {
                let (date, path) = self.days.next()?;
                match File::open(&path).await {
                    Ok(file) => {
                        self.current = Some(OpenDay {
                            date,
                            path,
                            reader: BufReader::new(file),
                            buffer: Vec::new(),
                            line_number: 0,
                        })
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!("Failed to open {}: {}", path.display(), e),
                }
                continue;
            };

            day.buffer.clear();
            match day.reader.read_until(b'\n', &mut day.buffer).await {
                Ok(0) => self.current = None,
                Ok(_) => {
                    day.line_number += 1;
                    let raw = day.buffer.strip_suffix(b"\n").unwrap_or(&day.buffer[..]);
                    let decoded = std::str::from_utf8(raw)
                        .map_err(|e| StoreError::format("<binary>", e.to_string()))
                        .and_then(|line| codec::decode(day.date, line));
                    match decoded {
                        Ok(entry) if entry.time >= self.start && entry.time <= self.end => {
                            return Some(Ok(entry));
                        }
                        Ok(_) => {}
                        Err(e) => warn!(
                            "Skipping {} line {}: {}",
                            day.path.display(),
                            day.line_number,
                            e
                        ),
                    }
                }
                Err(e) => {
                    warn!("Failed to read {}: {}", day.path.display(), e);
                    self.current = None;
                }
            }
        }
    }
}
