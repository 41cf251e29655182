//! Sequential channel log reader.
//!
//! A [`LogReader`] streams `(record_number, record)` pairs from a position
//! resolved by the coordinate resolver, following file rollovers. `None`
//! from [`LogReader::next`] means "caught up": the reader holds its
//! position, and a later call re-examines the same offset, so a tailing
//! consumer simply waits for the appender's head watch to move and polls
//! again.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use logbus_proto::Record;

use super::{
    coords,
    error::LogError,
    layout::{self, FRAME_OVERHEAD, HEADER_SIZE},
};

/// Positioned reader over one channel's files.
#[derive(Debug)]
pub struct LogReader {
    dir: PathBuf,
    channel: String,
    file: File,
    file_number: u64,
    file_size: u64,
    pos: u64,
    next_number: i64,
}

impl LogReader {
    /// Open a reader positioned at (or just before) `from_record`.
    ///
    /// When `from_record` lies past the tail the reader is positioned at the
    /// last existing record; callers filter on the returned record numbers.
    pub(crate) fn open(dir: &Path, channel: &str, from_record: u64) -> Result<Self, LogError> {
        let coord = coords::coord_of_record(dir, channel, from_record as i64)?;
        let (file_number, offset) = if coord.is_valid() {
            (coord.file_number, coord.offset)
        } else {
            (0, HEADER_SIZE)
        };

        let mut file = File::open(layout::log_file_path(dir, channel, file_number))?;
        let file_size = file.metadata()?.len();
        let header = coords::read_header(&mut file, channel, file_number)?;

        // The record at `offset` is coord.record_number, except when the
        // coordinate is the empty-file sentinel (first_record - 1), where
        // the next record written there will be first_record.
        let next_number = coord.record_number.max(header.first_record as i64);

        Ok(Self {
            dir: dir.to_path_buf(),
            channel: channel.to_string(),
            file,
            file_number,
            file_size,
            pos: offset,
            next_number,
        })
    }

    /// Read the record at the current position, if one exists.
    ///
    /// Returns `Ok(None)` when the reader has caught up with the appender.
    pub fn next(&mut self) -> Result<Option<(u64, Record)>, LogError> {
        loop {
            if self.file_size.saturating_sub(self.pos) < FRAME_OVERHEAD {
                if !self.roll()? {
                    return Ok(None);
                }
                continue;
            }

            self.file.seek(SeekFrom::Start(self.pos))?;
            let mut framing = [0u8; FRAME_OVERHEAD as usize];
            self.file.read_exact(&mut framing)?;

            let crc = u32::from_le_bytes([framing[0], framing[1], framing[2], framing[3]]);
            let len =
                u64::from(u32::from_le_bytes([framing[4], framing[5], framing[6], framing[7]]));

            if len == 0 || self.pos + FRAME_OVERHEAD + len > self.file_size {
                if !self.roll()? {
                    return Ok(None);
                }
                continue;
            }

            let mut payload = vec![0u8; len as usize];
            self.file.read_exact(&mut payload)?;

            if crc32fast::hash(&payload) != crc {
                return Err(LogError::ChecksumMismatch {
                    channel: self.channel.clone(),
                    record: self.next_number as u64,
                });
            }

            let record = Record::decode(&payload)?;
            let number = self.next_number as u64;
            self.next_number += 1;
            self.pos += FRAME_OVERHEAD + len;

            return Ok(Some((number, record)));
        }
    }

    /// Advance into the successor file if one exists.
    ///
    /// Records never span files, so hitting the zero tail of file `n` means
    /// either the channel rolled (file `n+1` exists) or we are at the head.
    fn roll(&mut self) -> Result<bool, LogError> {
        let next_file = self.file_number + 1;
        let path = layout::log_file_path(&self.dir, &self.channel, next_file);
        if !path.exists() {
            return Ok(false);
        }

        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let header = coords::read_header(&mut file, &self.channel, next_file)?;

        self.file = file;
        self.file_number = next_file;
        self.file_size = file_size;
        self.pos = HEADER_SIZE;
        self.next_number = header.first_record as i64;
        Ok(true)
    }

    /// Number the next returned record will carry.
    #[must_use]
    pub fn next_record_number(&self) -> u64 {
        self.next_number.max(0) as u64
    }
}
