//! Append-only per-channel logs.
//!
//! A channel is an ordered sequence of records starting at number 0,
//! physically stored as numbered fixed-size chunk files in one logs
//! directory (see [`layout`]). [`ChannelLogs`] is the directory-level
//! manager; [`ChannelLog`] is a cheap-clone handle to one channel's
//! appender and tail watch.

mod coords;
mod error;
mod layout;
mod reader;
mod writer;

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

pub use coords::{
    FileCoord, check_and_get_last_file, coord_of_last_record, coord_of_record, find_in_file,
    skip_one_record,
};
pub use error::LogError;
pub use layout::{
    CHECKSUM_SIZE, FILE_NUMBER_DIGITS, FRAME_OVERHEAD, FileHeader, HEADER_SIZE, LENGTH_SIZE,
    log_file_name, log_file_path, parse_file_number, preallocate, valid_channel_name,
};
use logbus_proto::Record;
pub use reader::LogReader;
use tokio::sync::{mpsc, oneshot, watch};
use writer::{AppendRequest, Appender};

/// Default bytes per chunk file.
pub const DEFAULT_MAX_LOG_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Channel log configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory holding every channel's files.
    pub logs_dir: PathBuf,
    /// Exact size of every chunk file.
    pub max_log_chunk_size: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { logs_dir: PathBuf::from("logs"), max_log_chunk_size: DEFAULT_MAX_LOG_CHUNK_SIZE }
    }
}

/// Pending append resolving to the assigned record number.
///
/// The append's position in the channel was fixed when the request was
/// enqueued; awaiting only learns the outcome.
#[derive(Debug)]
pub struct AppendReceipt {
    rx: oneshot::Receiver<Result<u64, LogError>>,
}

impl AppendReceipt {
    /// Wait for durable persistence.
    pub async fn wait(self) -> Result<u64, LogError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(LogError::Closed),
        }
    }
}

struct LogShared {
    channel: String,
    dir: PathBuf,
    tx: mpsc::UnboundedSender<AppendRequest>,
    head: watch::Receiver<u64>,
}

/// Handle to one channel's log.
#[derive(Clone)]
pub struct ChannelLog {
    inner: Arc<LogShared>,
}

impl ChannelLog {
    /// Channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    /// Enqueue a record for appending.
    ///
    /// The relative order among appends on this channel is the enqueue
    /// order. The receipt resolves once the record is persisted.
    pub fn append(&self, record: Record) -> AppendReceipt {
        let (done, rx) = oneshot::channel();
        if let Err(rejected) = self.inner.tx.send(AppendRequest { record, done }) {
            let _ = rejected.0.done.send(Err(LogError::Closed));
        }
        AppendReceipt { rx }
    }

    /// Number of records appended so far (the next record number).
    #[must_use]
    pub fn head_count(&self) -> u64 {
        *self.inner.head.borrow()
    }

    /// Watch the head record count for tailing.
    #[must_use]
    pub fn watch_head(&self) -> watch::Receiver<u64> {
        self.inner.head.clone()
    }

    /// Open a sequential reader positioned at `from_record`.
    pub fn open_reader(&self, from_record: u64) -> Result<LogReader, LogError> {
        LogReader::open(&self.inner.dir, &self.inner.channel, from_record)
    }
}

impl std::fmt::Debug for ChannelLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLog")
            .field("channel", &self.inner.channel)
            .field("head_count", &self.head_count())
            .finish()
    }
}

/// Directory-level manager of channel logs.
///
/// Clones share the open-channel map. Appenders are spawned onto the
/// ambient tokio runtime, one task per channel.
#[derive(Clone)]
pub struct ChannelLogs {
    cfg: Arc<LogConfig>,
    open: Arc<Mutex<HashMap<String, ChannelLog>>>,
}

impl ChannelLogs {
    /// Create a manager, validating configuration and creating the logs
    /// directory.
    pub fn new(cfg: LogConfig) -> Result<Self, LogError> {
        if cfg.max_log_chunk_size <= HEADER_SIZE + FRAME_OVERHEAD {
            return Err(LogError::InvalidConfig(format!(
                "max_log_chunk_size {} cannot hold any record",
                cfg.max_log_chunk_size
            )));
        }
        std::fs::create_dir_all(&cfg.logs_dir)?;

        Ok(Self { cfg: Arc::new(cfg), open: Arc::new(Mutex::new(HashMap::new())) })
    }

    /// Open-or-create a channel. Used by the publish path.
    ///
    /// # Panics
    ///
    /// Panics if the open-channel mutex is poisoned (a thread panicked
    /// while holding the lock).
    #[allow(clippy::expect_used)]
    pub fn resolve(&self, channel: &str) -> Result<ChannelLog, LogError> {
        if !valid_channel_name(channel) {
            return Err(LogError::InvalidChannelName(channel.to_string()));
        }

        let mut open = self.open.lock().expect("channel map mutex poisoned");
        if let Some(log) = open.get(channel) {
            return Ok(log.clone());
        }

        let (appender, head_rx) =
            Appender::open(&self.cfg.logs_dir, channel, self.cfg.max_log_chunk_size)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(appender.run(rx));

        let log = ChannelLog {
            inner: Arc::new(LogShared {
                channel: channel.to_string(),
                dir: self.cfg.logs_dir.clone(),
                tx,
                head: head_rx,
            }),
        };
        open.insert(channel.to_string(), log.clone());
        Ok(log)
    }

    /// Open an existing channel. Used by the subscribe path.
    ///
    /// Returns `None` when the channel has never been published to: it is
    /// neither open nor present on disk.
    ///
    /// # Panics
    ///
    /// Panics if the open-channel mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn lookup(&self, channel: &str) -> Result<Option<ChannelLog>, LogError> {
        if !valid_channel_name(channel) {
            return Err(LogError::InvalidChannelName(channel.to_string()));
        }

        {
            let open = self.open.lock().expect("channel map mutex poisoned");
            if let Some(log) = open.get(channel) {
                return Ok(Some(log.clone()));
            }
        }

        if log_file_path(&self.cfg.logs_dir, channel, 0).exists() {
            return self.resolve(channel).map(Some);
        }
        Ok(None)
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &LogConfig {
        &self.cfg
    }
}

impl std::fmt::Debug for ChannelLogs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLogs").field("logs_dir", &self.cfg.logs_dir).finish()
    }
}
