use crate::source::seek::Whence;
use std::fs::{File, Metadata};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum TailError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not a regular file")]
    NotAFile(PathBuf),
}

#[derive(Debug, Clone, Copy)]
pub struct TailConfig {
    /// How long to sleep at EOF before checking for new data.
    pub poll_interval: Duration,
    /// Capacity of the line channel.
    pub line_buffer: usize,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            line_buffer: 1024,
        }
    }
}

/// Follows one file and streams its complete lines in file order.
///
/// The stream ends when the file is removed or replaced, on a read error, or
/// after `stop` has been requested and the file has been read to EOF.
pub struct Tail {
    path: PathBuf,
    lines: mpsc::Receiver<String>,
    stop: CancellationToken,
    task: JoinHandle<()>,
    _stop_on_drop: DropGuard,
}

impl Tail {
    /// Start following `path`.
    ///
    /// A file that does not exist yet is waited for; once it appears it is
    /// read from the beginning. Any other open failure is returned.
    pub fn open(path: &Path, whence: Whence, config: TailConfig) -> Result<Self, TailError> {
        let follower = match File::open(path) {
            Ok(file) => Some(Follower::new(path, file, whence)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = %path.display(), "file not created yet, waiting");
                None
            }
            Err(e) => {
                return Err(TailError::Open {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let (tx, rx) = mpsc::channel(config.line_buffer.max(1));
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_follow(
            path.to_path_buf(),
            follower,
            tx,
            stop.clone(),
            config.poll_interval,
        ));

        Ok(Self {
            path: path.to_path_buf(),
            lines: rx,
            _stop_on_drop: stop.clone().drop_guard(),
            stop,
            task,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next line, or `None` once the stream has ended.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Stop following. Lines already written to the file are still read and
    /// returned, bounded by `grace`.
    pub async fn stop(mut self, grace: Duration) -> Vec<String> {
        self.stop.cancel();

        let mut rest = Vec::new();
        let lines = &mut self.lines;
        let drained = tokio::time::timeout(grace, async {
            while let Some(line) = lines.recv().await {
                rest.push(line);
            }
        })
        .await;

        match drained {
            Ok(()) => {
                if let Err(e) = self.task.await {
                    error!(file = %self.path.display(), error = %e, "Tail task join error");
                }
            }
            Err(_) => {
                warn!(
                    file = %self.path.display(),
                    grace_ms = grace.as_millis() as u64,
                    "Tail did not stop within grace period, aborting"
                );
                self.task.abort();
            }
        }

        rest
    }
}

struct Follower {
    reader: BufReader<File>,
    position: u64,
    inode: u64,
    pending: Vec<u8>,
}

impl Follower {
    fn new(path: &Path, file: File, whence: Whence) -> Result<Self, TailError> {
        let open_err = |source| TailError::Open {
            path: path.to_path_buf(),
            source,
        };

        let metadata = file.metadata().map_err(open_err)?;
        if !metadata.is_file() {
            return Err(TailError::NotAFile(path.to_path_buf()));
        }

        let mut reader = BufReader::new(file);
        let position = match whence {
            Whence::Start => reader.seek(SeekFrom::Start(0)).map_err(open_err)?,
            Whence::End => reader.seek(SeekFrom::End(0)).map_err(open_err)?,
        };

        Ok(Self {
            reader,
            position,
            inode: get_inode(&metadata),
            pending: Vec::new(),
        })
    }

    /// Next complete line, without its terminator. A trailing partial line is
    /// kept until the rest of it is written.
    fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.pending)?;
        self.position += read as u64;

        if self.pending.last() != Some(&b'\n') {
            return Ok(None);
        }

        self.pending.pop();
        if self.pending.last() == Some(&b'\r') {
            self.pending.pop();
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Ok(Some(line))
    }

    fn rewind(&mut self) -> std::io::Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.position = 0;
        self.pending.clear();
        Ok(())
    }
}

enum FileState {
    Same { len: u64 },
    Gone,
    Replaced,
}

fn check_file(path: &Path, inode: u64) -> std::io::Result<FileState> {
    match std::fs::metadata(path) {
        Ok(metadata) if get_inode(&metadata) != inode => Ok(FileState::Replaced),
        Ok(metadata) => Ok(FileState::Same {
            len: metadata.len(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileState::Gone),
        Err(e) => Err(e),
    }
}

async fn run_follow(
    path: PathBuf,
    mut follower: Option<Follower>,
    tx: mpsc::Sender<String>,
    stop: CancellationToken,
    poll_interval: Duration,
) {
    loop {
        if follower.is_none() {
            if stop.is_cancelled() {
                return;
            }
            match File::open(&path) {
                Ok(file) => match Follower::new(&path, file, Whence::Start) {
                    Ok(f) => {
                        info!(file = %path.display(), "File created, following");
                        follower = Some(f);
                        continue;
                    }
                    Err(e) => {
                        error!(file = %path.display(), error = %e, "Failed to open created file");
                        return;
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    error!(file = %path.display(), error = %e, "Failed to open file");
                    return;
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = stop.cancelled() => {}
            }
            continue;
        }
        let Some(active) = follower.as_mut() else {
            continue;
        };

        // Read everything currently available.
        loop {
            match active.read_line() {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(file = %path.display(), error = %e, "Read failed, ending tail");
                    return;
                }
            }
        }

        if stop.is_cancelled() {
            return;
        }

        match check_file(&path, active.inode) {
            Ok(FileState::Same { len }) if len < active.position => {
                warn!(
                    file = %path.display(),
                    previous_offset = active.position,
                    current_size = len,
                    "File truncated, reading from the beginning"
                );
                if let Err(e) = active.rewind() {
                    error!(file = %path.display(), error = %e, "Rewind failed, ending tail");
                    return;
                }
                continue;
            }
            Ok(FileState::Same { .. }) => {}
            Ok(FileState::Gone) => {
                error!(file = %path.display(), "File removed, ending tail");
                return;
            }
            Ok(FileState::Replaced) => {
                error!(file = %path.display(), "File replaced, ending tail");
                return;
            }
            Err(e) => {
                error!(file = %path.display(), error = %e, "Failed to stat file, ending tail");
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = stop.cancelled() => {}
        }
    }
}

#[cfg(unix)]
fn get_inode(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn get_inode(_metadata: &Metadata) -> u64 {
    0
}
