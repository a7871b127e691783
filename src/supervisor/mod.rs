use crate::batch::BatchSink;
use crate::config::types::Config;
use crate::source::naming::Clock;
use crate::source::seek::SeekPolicy;
use crate::watcher::{RotationWatcher, WatchRegistry, WatchShared, WatcherSettings};
use chrono::Timelike;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of the shutdown sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: usize,
    pub timed_out: Vec<String>,
}

/// Starts one watcher per source, reports on them periodically and stops them
/// all on shutdown.
pub struct Supervisor {
    sources: Vec<(String, PathBuf)>,
    start_second: Option<u32>,
    report_interval: Duration,
    stop_timeout: Duration,
    settings: WatcherSettings,
    shared: WatchShared,
}

impl Supervisor {
    pub fn new(config: &Config, sink: Arc<dyn BatchSink>, clock: Arc<dyn Clock>) -> Self {
        let seek = Arc::new(SeekPolicy::new(config.first_mode(), config.follow_mode()));

        Self {
            sources: config
                .files
                .iter()
                .map(|name| (name.clone(), config.source_dir(name)))
                .collect(),
            start_second: config.start_second,
            report_interval: config.tuning.report_interval,
            // A stopping watcher may still be sending its final batch.
            stop_timeout: config.tuning.shutdown_grace + config.request_timeout(),
            settings: WatcherSettings::from(config),
            shared: WatchShared {
                seek,
                sink,
                clock,
                registry: WatchRegistry::new(),
            },
        }
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.shared.registry
    }

    pub fn seek_policy(&self) -> &Arc<SeekPolicy> {
        &self.shared.seek
    }

    /// Wait for the configured start second, then run until `shutdown`
    /// resolves and stop every watcher.
    pub async fn run<F>(&self, shutdown: F) -> ShutdownReport
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        tokio::select! {
            _ = self.wait_for_alignment() => {}
            _ = &mut shutdown => {
                info!("Shutdown requested before watchers started");
                return ShutdownReport::default();
            }
        }

        let started = self.start();
        info!(started = started, configured = self.sources.len(), "Supervisor running");

        let period = self.report_interval;
        let mut report = tokio::time::interval_at(Instant::now() + period, period);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = report.tick() => self.report(),
                _ = &mut shutdown => break,
            }
        }

        self.shutdown().await
    }

    /// Block until the wall clock reaches the configured second, so watchers
    /// do not start right on an hour boundary.
    pub async fn wait_for_alignment(&self) {
        let Some(target) = self.start_second else {
            return;
        };

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let second = self.shared.clock.now().second();
            if second == target {
                return;
            }
            debug!(current = second, target = target, "Waiting for start second");
        }
    }

    /// Spawn a watcher for every source whose directory exists. Returns how
    /// many were started.
    pub fn start(&self) -> usize {
        let mut started = 0;
        for (source, dir) in &self.sources {
            if !dir.is_dir() {
                warn!(source = %source, dir = %dir.display(), "Source directory does not exist, skipping");
                continue;
            }
            self.spawn_watcher(source, dir.clone());
            started += 1;
        }

        if started == 0 {
            warn!("No source directories found, nothing to watch");
        }
        started
    }

    fn spawn_watcher(&self, source: &str, dir: PathBuf) {
        let cancel = CancellationToken::new();
        self.shared
            .registry
            .register(source, dir.clone(), cancel.clone());

        let watcher = RotationWatcher::new(
            source,
            dir,
            self.settings,
            self.shared.clone(),
            cancel,
        );
        let handle = tokio::spawn(watcher.run());
        self.shared.registry.attach(source, handle);
    }

    /// Log live task count and active watches.
    pub fn report(&self) {
        let tasks = tokio::runtime::Handle::current()
            .metrics()
            .num_alive_tasks();
        let watches = self.shared.registry.snapshot();
        info!(tasks = tasks, watches = watches.len(), "Status report");
        for watch in &watches {
            debug!(
                source = %watch.source,
                file = ?watch.current_file.as_ref().map(|p| p.display().to_string()),
                "Active watch"
            );
        }
    }

    /// Signal every registered watcher to stop and wait for them, bounded by
    /// the stop timeout. The registry is empty afterwards.
    pub async fn shutdown(&self) -> ShutdownReport {
        let entries = self.shared.registry.take_all();
        info!(watches = entries.len(), "Stopping watches");

        for (_, entry) in &entries {
            entry.cancel.cancel();
        }

        let deadline = Instant::now() + self.stop_timeout;
        let mut report = ShutdownReport::default();

        for (source, entry) in entries {
            let Some(mut handle) = entry.handle else {
                report.stopped += 1;
                continue;
            };

            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(exit)) => {
                    debug!(source = %source, exit = ?exit, "Watch joined");
                    report.stopped += 1;
                }
                Ok(Err(e)) => {
                    warn!(source = %source, error = %e, "Watch task failed during shutdown");
                    report.stopped += 1;
                }
                Err(_) => {
                    warn!(
                        source = %source,
                        timeout_ms = self.stop_timeout.as_millis() as u64,
                        "Watch did not stop in time, aborting"
                    );
                    handle.abort();
                    report.timed_out.push(source);
                }
            }
        }

        info!(
            stopped = report.stopped,
            timed_out = report.timed_out.len(),
            "All watches stopped"
        );
        report
    }
}
