use std::path::{Path, PathBuf};

use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// Directory under the storage root holding the day files.
pub const MEASUREMENTS_DIR: &str = "measurements";
/// Day file extension.
pub const DAY_FILE_EXTENSION: &str = "mst";

/// Maps a timestamp to the file holding its calendar day.
///
/// The day is taken in the timestamp's own offset, so the same instant
/// recorded under two offsets can land in two different files.
#[derive(Debug, Clone)]
pub struct DayFileRouter {
    root: PathBuf,
}

impl DayFileRouter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn directory(&self) -> PathBuf {
        self.root.join(MEASUREMENTS_DIR)
    }

    pub fn path_for(&self, time: OffsetDateTime) -> PathBuf {
        self.path_for_date(time.date())
    }

    pub fn path_for_date(&self, date: Date) -> PathBuf {
        day_file(&self.directory(), date)
    }

    /// One `(date, path)` per calendar day from `start`'s day through
    /// `end`'s day, inclusive.
    pub fn paths_for(&self, start: OffsetDateTime, end: OffsetDateTime) -> DayPaths {
        DayPaths {
            directory: self.directory(),
            next: Some(start.date()),
            last: end.date(),
        }
    }
}

fn day_file(directory: &Path, date: Date) -> PathBuf {
    let format = format_description!("[year]-[month]-[day]");
    // The format only has numeric date components, which always render.
    let name = date.format(format).unwrap_or_else(|_| date.to_string());
    directory.join(format!("{}.{}", name, DAY_FILE_EXTENSION))
}

#[derive(Debug, Clone)]
pub struct DayPaths {
    directory: PathBuf,
    next: Option<Date>,
    last: Date,
}

impl Iterator for DayPaths {
    type Item = (Date, PathBuf);

    fn next(&mut self) -> Option<Self::Item> {
        let date = self.next.filter(|date| *date <= self.last)?;
        self.next = date.next_day();
        Some((date, day_file(&self.directory, date)))
    }
}
