//! The per-channel appender.
//!
//! One appender task owns a channel's head file. Append requests arrive on
//! an unbounded queue, so the relative order of two appends is fixed at the
//! moment the caller enqueues them, not when persistence completes. Each
//! completed append bumps the head record count published through a `watch`
//! channel, which is how tailing readers learn that new records exist.
//!
//! File I/O is synchronous: writes land in a pre-allocated file and the
//! appender is the only writer, so the straightforward `write_all` path is
//! the honest one.

use std::{
    fs::{File, OpenOptions},
    io::{Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use logbus_proto::Record;
use tokio::sync::{mpsc, oneshot, watch};

use super::{
    coords,
    error::LogError,
    layout::{self, FRAME_OVERHEAD, HEADER_SIZE},
};

/// One queued append.
pub(crate) struct AppendRequest {
    /// Record to persist.
    pub record: Record,
    /// Resolves with the assigned record number.
    pub done: oneshot::Sender<Result<u64, LogError>>,
}

/// Appender state: the open head file and the write cursor.
pub(crate) struct Appender {
    channel: String,
    dir: PathBuf,
    chunk_size: u64,
    file: File,
    file_number: u64,
    write_pos: u64,
    next_record: u64,
    head_tx: watch::Sender<u64>,
}

impl Appender {
    /// Open a channel for appending, recovering the tail position.
    ///
    /// Validates the channel's files, scans the head file for its last
    /// record, and positions the write cursor after it. Creates file 0 if
    /// the channel has no files yet.
    pub(crate) fn open(
        dir: &Path,
        channel: &str,
        chunk_size: u64,
    ) -> Result<(Self, watch::Receiver<u64>), LogError> {
        let head = coords::check_and_get_last_file(dir, channel, chunk_size)?;
        let path = layout::log_file_path(dir, channel, head);

        let (file, write_pos, next_record) = if path.exists() {
            let coord = coords::coord_of_last_record(dir, channel, head)?;
            let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
            let size = file.metadata()?.len();

            // coord points at the last record (or at HEADER_SIZE with a
            // record_number of first_record - 1 when the file is empty);
            // one more skip lands on the write position either way.
            let end = match coords::skip_one_record(&mut file, size, coord.offset)? {
                0 => HEADER_SIZE,
                n => n,
            };
            (file, end, (coord.record_number + 1) as u64)
        } else {
            let file = layout::preallocate(&path, 0, chunk_size)?;
            (file, HEADER_SIZE, 0)
        };

        let (head_tx, head_rx) = watch::channel(next_record);

        tracing::debug!(
            channel,
            file = head,
            next_record,
            write_pos,
            "channel log opened"
        );

        Ok((
            Self {
                channel: channel.to_string(),
                dir: dir.to_path_buf(),
                chunk_size,
                file,
                file_number: head,
                write_pos,
                next_record,
                head_tx,
            },
            head_rx,
        ))
    }

    /// Process append requests until every sender is dropped.
    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AppendRequest>) {
        while let Some(request) = rx.recv().await {
            let result = self.append_one(&request.record);
            if let Err(err) = &result {
                tracing::error!(channel = %self.channel, error = %err, "append failed");
            }
            let _ = request.done.send(result);
        }
        tracing::debug!(channel = %self.channel, "appender shut down");
    }

    /// Persist one record and return its record number.
    fn append_one(&mut self, record: &Record) -> Result<u64, LogError> {
        let payload = record.encode()?;
        let framed_len = FRAME_OVERHEAD + payload.len() as u64;

        let capacity = self.chunk_size - HEADER_SIZE;
        if framed_len > capacity {
            return Err(LogError::RecordTooLarge { size: framed_len, max: capacity });
        }

        if self.write_pos + framed_len > self.chunk_size {
            self.roll()?;
        }

        let mut frame = Vec::with_capacity(framed_len as usize);
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);

        self.file.seek(SeekFrom::Start(self.write_pos))?;
        self.file.write_all(&frame)?;

        let record_number = self.next_record;
        self.write_pos += framed_len;
        self.next_record += 1;

        // Publish only after write_all returned, so a reader woken by this
        // never observes a partially written frame.
        let _ = self.head_tx.send(self.next_record);

        Ok(record_number)
    }

    /// Allocate the next head file and move the cursor into it.
    fn roll(&mut self) -> Result<(), LogError> {
        let next_file = self.file_number + 1;
        let path = layout::log_file_path(&self.dir, &self.channel, next_file);

        self.file = layout::preallocate(&path, self.next_record, self.chunk_size)?;
        self.file_number = next_file;
        self.write_pos = HEADER_SIZE;

        tracing::info!(channel = %self.channel, file = next_file, "rolled to new log file");
        Ok(())
    }
}
