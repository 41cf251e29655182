//! On-disk layout of a channel log.
//!
//! A channel is a flat sequence of chunk files in one logs directory:
//!
//! ```text
//! <channel>-<NNNNNNNNNNNN>.log      (file number, 12-digit zero-padded)
//! ```
//!
//! Every file is pre-allocated to the configured chunk size and zero-filled.
//! The first [`HEADER_SIZE`] bytes are the file header; records follow
//! back-to-back, each framed as:
//!
//! ```text
//! [crc32 of payload: u32 LE][payload length: u32 LE][payload: CBOR record]
//! ```
//!
//! A zero length field, or fewer than [`FRAME_OVERHEAD`] bytes remaining,
//! marks the end of the records in a file. File sizes are the primary
//! integrity signal: every file below the head must be exactly chunk-sized.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use super::error::LogError;

/// Size of the per-file header.
pub const HEADER_SIZE: u64 = 16;

/// Size of the per-record checksum field.
pub const CHECKSUM_SIZE: u64 = 4;

/// Size of the per-record length field.
pub const LENGTH_SIZE: u64 = 4;

/// Per-record framing overhead (checksum + length).
pub const FRAME_OVERHEAD: u64 = CHECKSUM_SIZE + LENGTH_SIZE;

/// Digits in the zero-padded file number.
pub const FILE_NUMBER_DIGITS: usize = 12;

/// File header magic, `"LGBS"`.
const MAGIC: [u8; 4] = *b"LGBS";

/// Current file format version.
const FORMAT_VERSION: u8 = 1;

/// Preallocation writes zeros in slabs of at most this size.
const PREALLOC_SLAB: usize = 10 * 1024 * 1024;

/// Validate a channel name.
///
/// Names must be non-empty printable ASCII without `-` (which separates the
/// file number in log filenames) and without path separators.
#[must_use]
pub fn valid_channel_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name.bytes().all(|b| b.is_ascii_graphic() && b != b'-' && b != b'/' && b != b'\\')
}

/// Log filename for a channel chunk.
#[must_use]
pub fn log_file_name(channel: &str, file_number: u64) -> String {
    format!("{channel}-{file_number:0width$}.log", width = FILE_NUMBER_DIGITS)
}

/// Full path of a channel chunk file.
#[must_use]
pub fn log_file_path(dir: &Path, channel: &str, file_number: u64) -> PathBuf {
    dir.join(log_file_name(channel, file_number))
}

/// Parse the file number out of a filename, if it belongs to `channel`.
///
/// Accepts only the exact `<channel>-<12 digits>.log` shape.
#[must_use]
pub fn parse_file_number(file_name: &str, channel: &str) -> Option<u64> {
    let rest = file_name.strip_prefix(channel)?.strip_prefix('-')?;
    let digits = rest.strip_suffix(".log")?;

    if digits.len() != FILE_NUMBER_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Fixed-size chunk file header.
///
/// Carries the record number of the first record stored in the file, which
/// anchors the coordinate resolver's per-file scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Record number of the first record in this file (0 for file 0).
    pub first_record: u64,
}

impl FileHeader {
    /// Serialize to the on-disk header bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut out = [0u8; HEADER_SIZE as usize];
        out[0..4].copy_from_slice(&MAGIC);
        out[4] = FORMAT_VERSION;
        // bytes 5..8 reserved
        out[8..16].copy_from_slice(&self.first_record.to_be_bytes());
        out
    }

    /// Parse and validate header bytes.
    pub fn decode(bytes: &[u8; HEADER_SIZE as usize], channel: &str, file: u64) -> Result<Self, LogError> {
        if bytes[0..4] != MAGIC || bytes[4] != FORMAT_VERSION {
            return Err(LogError::BadHeader { channel: channel.to_string(), file });
        }

        let mut first = [0u8; 8];
        first.copy_from_slice(&bytes[8..16]);
        Ok(Self { first_record: u64::from_be_bytes(first) })
    }
}

/// Create and pre-allocate a new chunk file.
///
/// Writes the header followed by zeros in slabs of at most 10 MiB until the
/// file reaches `chunk_size`, then fsyncs. Returns the open read/write
/// handle.
///
/// # Errors
///
/// Fails if the file already exists or on any I/O error.
pub fn preallocate(
    path: &Path,
    first_record: u64,
    chunk_size: u64,
) -> Result<File, LogError> {
    let mut file = OpenOptions::new().read(true).write(true).create_new(true).open(path)?;

    file.write_all(&FileHeader { first_record }.encode())?;

    let mut remaining = chunk_size - HEADER_SIZE;
    let slab = vec![0u8; PREALLOC_SLAB.min(remaining as usize)];
    while remaining > 0 {
        let n = slab.len().min(remaining as usize);
        file.write_all(&slab[..n])?;
        remaining -= n as u64;
    }

    file.sync_all()?;
    Ok(file)
}
