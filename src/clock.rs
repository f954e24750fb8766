use std::sync::RwLock;
use std::time::Duration;

use time::{OffsetDateTime, UtcOffset};

/// Source of the device's current time, including its UTC offset.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock reported in a fixed offset.
///
/// The offset is resolved once at startup: local offset detection is not
/// reliable once the runtime has spawned its worker threads.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

#[derive(Debug)]
pub struct MockClock {
    now: RwLock<OffsetDateTime>,
}

impl Clock for MockClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl MockClock {
    pub fn with_time(time: OffsetDateTime) -> Self {
        Self {
            now: RwLock::new(time),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now += duration;
    }

    pub fn set_time(&self, time: OffsetDateTime) {
        *self.now.write().unwrap_or_else(|e| e.into_inner()) = time;
    }
}
