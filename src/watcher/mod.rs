pub mod registry;

pub use registry::{WatchEntry, WatchInfo, WatchRegistry};

use crate::batch::{BatchSink, Batcher};
use crate::config::types::Config;
use crate::source::naming::{hour_stamp, hourly_file, Clock};
use crate::source::seek::SeekPolicy;
use crate::source::tail::{Tail, TailConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Why a watcher returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchExit {
    /// Stop was requested.
    Stopped,
    /// The hourly file could not be opened.
    OpenFailed,
    /// The tail stream ended on its own (file removed, replaced or unreadable).
    StreamClosed,
}

#[derive(Debug, Clone, Copy)]
pub struct WatcherSettings {
    pub threshold: usize,
    pub flush_interval: Duration,
    pub shutdown_grace: Duration,
    pub tail: TailConfig,
}

impl From<&Config> for WatcherSettings {
    fn from(config: &Config) -> Self {
        Self {
            threshold: config.line_num,
            flush_interval: config.tuning.flush_interval,
            shutdown_grace: config.tuning.shutdown_grace,
            tail: TailConfig {
                poll_interval: config.tuning.poll_interval,
                line_buffer: config.tuning.line_buffer,
            },
        }
    }
}

/// State shared by every watcher in the process.
#[derive(Clone)]
pub struct WatchShared {
    pub seek: Arc<SeekPolicy>,
    pub sink: Arc<dyn BatchSink>,
    pub clock: Arc<dyn Clock>,
    pub registry: WatchRegistry,
}

enum FileEnd {
    Rotated,
    Stopped,
    StreamClosed,
}

/// Follows `<dir>/access-<YYYYMMDDHH>.log` for one source, moving to the next
/// file whenever the wall-clock hour changes.
pub struct RotationWatcher {
    source: String,
    dir: PathBuf,
    settings: WatcherSettings,
    shared: WatchShared,
    cancel: CancellationToken,
}

impl RotationWatcher {
    pub fn new(
        source: impl Into<String>,
        dir: PathBuf,
        settings: WatcherSettings,
        shared: WatchShared,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source: source.into(),
            dir,
            settings,
            shared,
            cancel,
        }
    }

    pub async fn run(self) -> WatchExit {
        info!(source = %self.source, dir = %self.dir.display(), "Watch started");

        let exit = self.watch().await;

        self.shared.registry.remove(&self.source);
        info!(source = %self.source, exit = ?exit, "Watch stopped");
        exit
    }

    async fn watch(&self) -> WatchExit {
        loop {
            if self.cancel.is_cancelled() {
                return WatchExit::Stopped;
            }

            let stamp = hour_stamp(&self.shared.clock.now());
            let file = hourly_file(&self.dir, &stamp);
            let whence = self.shared.seek.current();

            let tail = match Tail::open(&file, whence, self.settings.tail) {
                Ok(tail) => tail,
                Err(e) => {
                    error!(
                        source = %self.source,
                        file = %file.display(),
                        error = %e,
                        "Failed to open log file"
                    );
                    return WatchExit::OpenFailed;
                }
            };

            self.shared.registry.set_file(&self.source, Some(file.clone()));
            info!(
                source = %self.source,
                file = %file.display(),
                whence = whence.code(),
                "Following file"
            );

            match self.follow_file(tail, &stamp).await {
                FileEnd::Rotated => {
                    if self.shared.seek.mark_rotated() {
                        info!(
                            whence = self.shared.seek.current().code(),
                            "First rotation done, new files use the follow offset"
                        );
                    }
                }
                FileEnd::Stopped => return WatchExit::Stopped,
                FileEnd::StreamClosed => return WatchExit::StreamClosed,
            }
        }
    }

    async fn follow_file(&self, mut tail: Tail, stamp: &str) -> FileEnd {
        let filename = tail.path().display().to_string();
        let mut batcher = Batcher::new(
            filename.clone(),
            self.settings.threshold,
            Arc::clone(&self.shared.sink),
        );

        let period = self.settings.flush_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break FileEnd::Stopped,
                line = tail.next_line() => match line {
                    Some(line) => {
                        batcher.receive(&line).await;
                    }
                    None => {
                        error!(source = %self.source, file = %filename, "Tail stream closed unexpectedly");
                        break FileEnd::StreamClosed;
                    }
                },
                _ = ticker.tick() => {
                    batcher.on_tick().await;
                    if hour_stamp(&self.shared.clock.now()) != stamp {
                        break FileEnd::Rotated;
                    }
                }
            }
        };

        for line in tail.stop(self.settings.shutdown_grace).await {
            batcher.receive(&line).await;
        }
        batcher.drain().await;

        let stats = batcher.stats();
        info!(
            source = %self.source,
            file = %filename,
            lines_read = stats.lines_read,
            lines_delivered = stats.lines_delivered,
            lines_dropped = stats.lines_dropped,
            count_flushes = stats.count_flushes,
            timer_flushes = stats.timer_flushes,
            drain_flushes = stats.drain_flushes,
            failed_flushes = stats.failed_flushes,
            "Stopped following file"
        );

        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::testing::RecordingSink;
    use crate::batch::FlushTrigger;
    use crate::source::naming::ManualClock;
    use crate::source::seek::Whence;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    fn settings(threshold: usize, flush_interval: Duration) -> WatcherSettings {
        WatcherSettings {
            threshold,
            flush_interval,
            shutdown_grace: Duration::from_secs(2),
            tail: TailConfig {
                poll_interval: Duration::from_millis(10),
                line_buffer: 64,
            },
        }
    }

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn current_file(registry: &WatchRegistry, source: &str) -> Option<PathBuf> {
        registry
            .snapshot()
            .into_iter()
            .find(|info| info.source == source)
            .and_then(|info| info.current_file)
    }

    struct Harness {
        sink: Arc<RecordingSink>,
        clock: Arc<ManualClock>,
        shared: WatchShared,
        cancel: CancellationToken,
    }

    fn harness(first: Whence, follow: Whence) -> Harness {
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(ManualClock::at_hour(2025, 1, 1, 10).unwrap());
        let registry = WatchRegistry::new();
        let cancel = CancellationToken::new();
        registry.register("site", PathBuf::new(), cancel.clone());
        let shared = WatchShared {
            seek: Arc::new(SeekPolicy::new(first, follow)),
            sink: sink.clone(),
            clock: clock.clone(),
            registry,
        };
        Harness {
            sink,
            clock,
            shared,
            cancel,
        }
    }

    #[tokio::test]
    async fn test_rotation_moves_to_next_hour_with_follow_offset() {
        let dir = TempDir::new().unwrap();
        let hour10 = dir.path().join("access-2025010110.log");
        let hour11 = dir.path().join("access-2025010111.log");
        append(&hour10, "before start\n");

        let h = harness(Whence::End, Whence::Start);
        let watcher = RotationWatcher::new(
            "site",
            dir.path().to_path_buf(),
            settings(100, Duration::from_millis(50)),
            h.shared.clone(),
            h.cancel.clone(),
        );
        let handle = tokio::spawn(watcher.run());

        let registry = h.shared.registry.clone();
        wait_until(|| current_file(&registry, "site").as_deref() == Some(hour10.as_path())).await;

        append(&hour10, "a\n");
        wait_until(|| h.sink.taken().len() == 1).await;
        assert_eq!(h.shared.seek.current(), Whence::End);

        append(&hour11, "written before rotation\n");
        h.clock.advance(chrono::Duration::hours(1));

        wait_until(|| current_file(&registry, "site").as_deref() == Some(hour11.as_path())).await;
        assert_eq!(h.shared.seek.current(), Whence::Start);

        wait_until(|| h.sink.taken().len() == 2).await;
        h.cancel.cancel();
        assert_eq!(handle.await.unwrap(), WatchExit::Stopped);

        let batches = h.sink.taken();
        assert_eq!(batches[0].filename, hour10.display().to_string());
        assert_eq!(batches[0].body, b"a\n");
        assert_eq!(batches[0].trigger, FlushTrigger::Timer);
        assert_eq!(batches[1].filename, hour11.display().to_string());
        assert_eq!(batches[1].body, b"written before rotation\n");
        assert!(!h.shared.registry.contains("site"));
    }

    #[tokio::test]
    async fn test_count_flush_then_drain_on_stop() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("access-2025010110.log");
        append(&file, "1\n2\n3\n4\n5\n");

        let h = harness(Whence::Start, Whence::Start);
        let watcher = RotationWatcher::new(
            "site",
            dir.path().to_path_buf(),
            settings(2, Duration::from_secs(3600)),
            h.shared.clone(),
            h.cancel.clone(),
        );
        let handle = tokio::spawn(watcher.run());

        wait_until(|| h.sink.taken().len() == 2).await;
        h.cancel.cancel();
        assert_eq!(handle.await.unwrap(), WatchExit::Stopped);

        let batches = h.sink.taken();
        let summary: Vec<_> = batches.iter().map(|b| (b.trigger, b.body.clone())).collect();
        assert_eq!(
            summary,
            vec![
                (FlushTrigger::Count, b"1\n2\n".to_vec()),
                (FlushTrigger::Count, b"3\n4\n".to_vec()),
                (FlushTrigger::Drain, b"5\n".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_open_failure_is_permanent() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("access-2025010110.log")).unwrap();

        let h = harness(Whence::End, Whence::Start);
        let watcher = RotationWatcher::new(
            "site",
            dir.path().to_path_buf(),
            settings(10, Duration::from_millis(50)),
            h.shared.clone(),
            h.cancel.clone(),
        );

        let exit = tokio::time::timeout(Duration::from_secs(5), watcher.run())
            .await
            .unwrap();
        assert_eq!(exit, WatchExit::OpenFailed);
        assert!(h.shared.registry.is_empty());
    }

    #[tokio::test]
    async fn test_removed_file_flushes_and_terminates() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("access-2025010110.log");
        append(&file, "pending\n");

        let h = harness(Whence::Start, Whence::Start);
        let watcher = RotationWatcher::new(
            "site",
            dir.path().to_path_buf(),
            settings(100, Duration::from_secs(3600)),
            h.shared.clone(),
            h.cancel.clone(),
        );
        let handle = tokio::spawn(watcher.run());

        let registry = h.shared.registry.clone();
        wait_until(|| current_file(&registry, "site").is_some()).await;
        std::fs::remove_file(&file).unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, WatchExit::StreamClosed);

        let batches = h.sink.taken();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].trigger, FlushTrigger::Drain);
        assert_eq!(batches[0].body, b"pending\n");
    }

    #[tokio::test]
    async fn test_rotation_switches_offset_for_other_watchers() {
        let site_dir = TempDir::new().unwrap();
        let late_dir = TempDir::new().unwrap();
        append(&site_dir.path().join("access-2025010110.log"), "");
        let late_file = late_dir.path().join("access-2025010111.log");
        append(&late_file, "written before late start\n");

        let h = harness(Whence::End, Whence::Start);
        let site = RotationWatcher::new(
            "site",
            site_dir.path().to_path_buf(),
            settings(100, Duration::from_millis(30)),
            h.shared.clone(),
            h.cancel.clone(),
        );
        let site_handle = tokio::spawn(site.run());

        let registry = h.shared.registry.clone();
        wait_until(|| current_file(&registry, "site").is_some()).await;
        h.clock.advance(chrono::Duration::hours(1));
        wait_until(|| h.shared.seek.current() == Whence::Start).await;

        // Opens for the first time after another watcher rotated.
        let late_cancel = CancellationToken::new();
        registry.register("late", late_dir.path().to_path_buf(), late_cancel.clone());
        let late = RotationWatcher::new(
            "late",
            late_dir.path().to_path_buf(),
            settings(100, Duration::from_secs(3600)),
            h.shared.clone(),
            late_cancel.clone(),
        );
        let late_handle = tokio::spawn(late.run());
        wait_until(|| current_file(&registry, "late").as_deref() == Some(late_file.as_path())).await;

        late_cancel.cancel();
        h.cancel.cancel();
        assert_eq!(late_handle.await.unwrap(), WatchExit::Stopped);
        assert_eq!(site_handle.await.unwrap(), WatchExit::Stopped);

        let late_batches: Vec<_> = h
            .sink
            .taken()
            .into_iter()
            .filter(|b| b.filename == late_file.display().to_string())
            .collect();
        assert_eq!(late_batches.len(), 1);
        assert_eq!(late_batches[0].body, b"written before late start\n");
        assert_eq!(late_batches[0].trigger, FlushTrigger::Drain);
    }
}
