//! Logbus storage core.
//!
//! Three concerns live here, all consumed by the protocol engine in
//! `logbus-server`:
//!
//! - **Channel logs** ([`log`]): append-only per-channel logs laid out as
//!   numbered fixed-size chunk files, with the coordinate resolver that maps
//!   record numbers to `(file, offset)` and rediscovers the tail at startup.
//! - **Documents** ([`docs`]): the binder/document store behind QUERY frames
//!   and the durable subscription cursor table.
//! - **Subscriptions** ([`subscription`]): start-position descriptors and
//!   matcher evaluation shared by the delivery layer.

pub mod docs;
pub mod log;
pub mod subscription;

pub use docs::{DocStore, DocStoreError, MemoryDocStore, RedbDocStore, StoredCursor};
pub use log::{
    ChannelLog, ChannelLogs, FileCoord, LogConfig, LogError, LogReader, valid_channel_name,
};
pub use subscription::{SubDescriptor, matches};
