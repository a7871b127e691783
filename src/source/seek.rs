use std::sync::Mutex;

/// Where a newly opened file is first read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    End,
}

impl Whence {
    /// Map the numeric codes used in config files (0 = start, 2 = end).
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Whence::Start),
            2 => Some(Whence::End),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Whence::Start => 0,
            Whence::End => 2,
        }
    }
}

/// Process-wide open offset shared by every watcher.
///
/// Starts at the configured first mode and flips to the follow mode the first
/// time any watcher completes a rotation. The flip is one-way.
#[derive(Debug)]
pub struct SeekPolicy {
    current: Mutex<Whence>,
    follow: Whence,
}

impl SeekPolicy {
    pub fn new(first: Whence, follow: Whence) -> Self {
        Self {
            current: Mutex::new(first),
            follow,
        }
    }

    pub fn current(&self) -> Whence {
        match self.current.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Record a completed rotation. Returns true only for the call that
    /// actually changed the value.
    pub fn mark_rotated(&self) -> bool {
        let mut guard = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard == self.follow {
            return false;
        }
        *guard = self.follow;
        true
    }
}
