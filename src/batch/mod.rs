use crate::upload::UploadError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The buffer reached the configured line count.
    Count,
    /// The periodic tick found a non-empty buffer.
    Timer,
    /// The file is being released (rotation, stop, or end of stream).
    Drain,
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlushTrigger::Count => write!(f, "count"),
            FlushTrigger::Timer => write!(f, "timer"),
            FlushTrigger::Drain => write!(f, "drain"),
        }
    }
}

/// A completed group of lines, each newline-terminated, ready for delivery.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Path of the file the lines were read from.
    pub filename: String,
    pub body: Vec<u8>,
    pub count: usize,
    pub trigger: FlushTrigger,
}

/// Destination for flushed batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn send(&self, batch: &Batch) -> Result<(), UploadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    pub count: usize,
    pub trigger: FlushTrigger,
    pub delivered: bool,
}

/// Per-file counters, logged when the file is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub lines_read: u64,
    pub lines_delivered: u64,
    pub lines_dropped: u64,
    pub count_flushes: u64,
    pub timer_flushes: u64,
    pub drain_flushes: u64,
    pub failed_flushes: u64,
}

/// Line buffer for one open file.
///
/// Owned by a single watcher task; `receive`, `on_tick` and `drain` are the
/// only entry points and all end in the same flush routine.
pub struct Batcher {
    filename: String,
    threshold: usize,
    buffer: Vec<u8>,
    count: usize,
    first_line_at: Option<Instant>,
    sink: Arc<dyn BatchSink>,
    stats: BatchStats,
}

impl Batcher {
    pub fn new(filename: impl Into<String>, threshold: usize, sink: Arc<dyn BatchSink>) -> Self {
        Self {
            filename: filename.into(),
            threshold: threshold.max(1),
            buffer: Vec::new(),
            count: 0,
            first_line_at: None,
            sink,
            stats: BatchStats::default(),
        }
    }

    /// Buffer one line; flushes synchronously once the threshold is reached.
    pub async fn receive(&mut self, line: &str) -> Option<FlushOutcome> {
        if self.count == 0 {
            self.first_line_at = Some(Instant::now());
        }
        self.buffer.extend_from_slice(line.as_bytes());
        self.buffer.push(b'\n');
        self.count += 1;
        self.stats.lines_read += 1;

        if self.count >= self.threshold {
            Some(self.flush(FlushTrigger::Count).await)
        } else {
            None
        }
    }

    /// Periodic tick: flushes whatever is buffered.
    pub async fn on_tick(&mut self) -> Option<FlushOutcome> {
        if self.count == 0 {
            return None;
        }
        Some(self.flush(FlushTrigger::Timer).await)
    }

    /// Final flush before the file is released.
    pub async fn drain(&mut self) -> Option<FlushOutcome> {
        if self.count == 0 {
            return None;
        }
        Some(self.flush(FlushTrigger::Drain).await)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Time since the oldest buffered line arrived.
    pub fn age(&self) -> Option<Duration> {
        self.first_line_at.map(|at| at.elapsed())
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    async fn flush(&mut self, trigger: FlushTrigger) -> FlushOutcome {
        // Reset before sending: a failed batch is dropped, never re-queued.
        let batch = Batch {
            filename: self.filename.clone(),
            body: std::mem::take(&mut self.buffer),
            count: std::mem::take(&mut self.count),
            trigger,
        };
        self.first_line_at = None;

        match trigger {
            FlushTrigger::Count => self.stats.count_flushes += 1,
            FlushTrigger::Timer => self.stats.timer_flushes += 1,
            FlushTrigger::Drain => self.stats.drain_flushes += 1,
        }

        let delivered = match self.sink.send(&batch).await {
            Ok(()) => {
                self.stats.lines_delivered += batch.count as u64;
                info!(
                    file = %batch.filename,
                    count = batch.count,
                    trigger = %trigger,
                    "Batch sent"
                );
                true
            }
            Err(e) => {
                self.stats.failed_flushes += 1;
                self.stats.lines_dropped += batch.count as u64;
                error!(
                    file = %batch.filename,
                    count = batch.count,
                    trigger = %trigger,
                    error = %e,
                    "Send failed, dropping batch"
                );
                false
            }
        };

        FlushOutcome {
            count: batch.count,
            trigger,
            delivered,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records every batch and answers with a fixed result.
    #[derive(Default)]
    pub struct RecordingSink {
        pub batches: Mutex<Vec<Batch>>,
        pub fail: bool,
    }

    impl RecordingSink {
        pub fn failing() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn taken(&self) -> Vec<Batch> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn send(&self, batch: &Batch) -> Result<(), UploadError> {
            self.batches.lock().unwrap().push(batch.clone());
            if self.fail {
                Err(UploadError::UnexpectedResponse {
                    status: 500,
                    body: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;

    fn batcher(threshold: usize, sink: &Arc<RecordingSink>) -> Batcher {
        let sink: Arc<dyn BatchSink> = sink.clone();
        Batcher::new("/logs/site/access-2025010110.log", threshold, sink)
    }

    #[tokio::test]
    async fn test_count_trigger_flushes_exactly_threshold() {
        let sink = Arc::new(RecordingSink::default());
        let mut b = batcher(3, &sink);

        assert!(b.receive("a").await.is_none());
        assert!(b.receive("b").await.is_none());
        let outcome = b.receive("c").await.unwrap();

        assert_eq!(outcome.count, 3);
        assert_eq!(outcome.trigger, FlushTrigger::Count);
        assert!(outcome.delivered);
        assert!(b.is_empty());

        let batches = sink.taken();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].body, b"a\nb\nc\n");
        assert_eq!(batches[0].count, 3);
        assert_eq!(batches[0].filename, "/logs/site/access-2025010110.log");
    }

    #[tokio::test]
    async fn test_timer_trigger_flushes_partial_batch() {
        let sink = Arc::new(RecordingSink::default());
        let mut b = batcher(100, &sink);

        b.receive("first").await;
        b.receive("second").await;
        let outcome = b.on_tick().await.unwrap();

        assert_eq!(outcome.trigger, FlushTrigger::Timer);
        assert_eq!(outcome.count, 2);
        assert!(b.is_empty());
        assert_eq!(sink.taken()[0].body, b"first\nsecond\n");
    }

    #[tokio::test]
    async fn test_tick_on_empty_buffer_does_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let mut b = batcher(10, &sink);

        assert!(b.on_tick().await.is_none());
        assert!(b.drain().await.is_none());
        assert!(sink.taken().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_drops_batch() {
        let sink = Arc::new(RecordingSink::failing());
        let mut b = batcher(2, &sink);

        b.receive("x").await;
        let outcome = b.receive("y").await.unwrap();
        assert!(!outcome.delivered);
        assert!(b.is_empty());

        b.receive("z").await;
        b.on_tick().await;

        let batches = sink.taken();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].body, b"z\n");

        let stats = b.stats();
        assert_eq!(stats.lines_read, 3);
        assert_eq!(stats.lines_delivered, 0);
        assert_eq!(stats.lines_dropped, 3);
        assert_eq!(stats.failed_flushes, 2);
    }

    #[tokio::test]
    async fn test_no_line_in_two_batches() {
        let sink = Arc::new(RecordingSink::default());
        let mut b = batcher(4, &sink);

        for i in 0..10 {
            b.receive(&format!("line-{}", i)).await;
            if i == 5 {
                b.on_tick().await;
            }
        }
        b.drain().await;

        let batches = sink.taken();
        let counts: Vec<_> = batches.iter().map(|b| (b.trigger, b.count)).collect();
        assert_eq!(
            counts,
            vec![
                (FlushTrigger::Count, 4),
                (FlushTrigger::Timer, 2),
                (FlushTrigger::Count, 4),
            ]
        );

        let joined: Vec<u8> = batches.iter().flat_map(|b| b.body.clone()).collect();
        let expected: String = (0..10).map(|i| format!("line-{}\n", i)).collect();
        assert_eq!(joined, expected.into_bytes());

        let stats = b.stats();
        assert_eq!(stats.count_flushes, 2);
        assert_eq!(stats.timer_flushes, 1);
        assert_eq!(stats.drain_flushes, 0);
        assert_eq!(stats.lines_delivered, 10);
    }

    #[tokio::test]
    async fn test_age_tracks_oldest_line() {
        let sink = Arc::new(RecordingSink::default());
        let mut b = batcher(10, &sink);

        assert!(b.age().is_none());
        b.receive("a").await;
        assert!(b.age().is_some());
        b.drain().await;
        assert!(b.age().is_none());
    }
}
