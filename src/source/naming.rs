use chrono::{DateTime, Local, TimeZone};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const HOUR_STAMP_FORMAT: &str = "%Y%m%d%H";

/// Source of wall-clock time for rotation decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock that only moves when told to. Used to drive rotations in tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Local>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Clock set to the start of the given local hour.
    pub fn at_hour(year: i32, month: u32, day: u32, hour: u32) -> Option<Self> {
        Local
            .with_ymd_and_hms(year, month, day, hour, 0, 0)
            .single()
            .map(Self::new)
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// `YYYYMMDDHH` stamp of the hour containing `at`.
pub fn hour_stamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(HOUR_STAMP_FORMAT).to_string()
}

/// Path of the log file for one hour: `<dir>/access-<stamp>.log`.
pub fn hourly_file(dir: &Path, stamp: &str) -> PathBuf {
    dir.join(format!("access-{}.log", stamp))
}
