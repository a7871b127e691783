use crate::source::seek::Whence;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Shipping parameters. Loaded once at startup and never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Collector endpoint receiving multipart uploads.
    #[serde(alias = "Url")]
    pub url: String,
    /// Per-request timeout in whole seconds.
    #[serde(alias = "Timeout")]
    pub timeout: u64,
    /// Lines per batch before a count-triggered flush.
    #[serde(alias = "LineNum")]
    pub line_num: usize,
    /// Base directory holding one sub-directory per source.
    #[serde(alias = "Path")]
    pub path: PathBuf,
    /// Source names, each resolved as `<path>/<name>`.
    #[serde(alias = "Files")]
    pub files: Vec<String>,
    /// Application tag sent verbatim with every batch.
    #[serde(alias = "App")]
    pub app: String,
    #[serde(alias = "FirstWhence", default = "default_first_whence")]
    pub first_whence: i64,
    #[serde(alias = "FollowWhence", default = "default_follow_whence")]
    pub follow_whence: i64,
    /// Wall-clock second the supervisor waits for before starting watchers.
    #[serde(alias = "StartSecond", default)]
    pub start_second: Option<u32>,
    #[serde(default)]
    pub tuning: TuningConfig,
}

fn default_first_whence() -> i64 {
    2
}

fn default_follow_whence() -> i64 {
    0
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Whence for the very first file opened by any watcher.
    ///
    /// Only valid after `validate_config` has accepted the value.
    pub fn first_mode(&self) -> Whence {
        Whence::from_code(self.first_whence).unwrap_or(Whence::End)
    }

    /// Whence for every file opened after the first rotation.
    pub fn follow_mode(&self) -> Whence {
        Whence::from_code(self.follow_whence).unwrap_or(Whence::Start)
    }

    /// Directory of a configured source.
    pub fn source_dir(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

/// Intervals and capacities that rarely need changing.
#[derive(Debug, Clone, Deserialize)]
pub struct TuningConfig {
    #[serde(with = "humantime_serde", default = "default_flush_interval")]
    pub flush_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_report_interval")]
    pub report_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde(default = "default_line_buffer")]
    pub line_buffer: usize,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            flush_interval: default_flush_interval(),
            report_interval: default_report_interval(),
            shutdown_grace: default_shutdown_grace(),
            poll_interval: default_poll_interval(),
            line_buffer: default_line_buffer(),
        }
    }
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_report_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_line_buffer() -> usize {
    1024
}
