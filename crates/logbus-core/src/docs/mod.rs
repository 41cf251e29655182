//! Document bindings and durable subscription cursors.
//!
//! Trait-based abstraction over the store behind QUERY frames. A *binder*
//! is a named collection of documents addressed by string id; documents are
//! records. The same store keeps durable subscription cursors so a durable
//! subscriber's position survives disconnects and restarts.
//!
//! The trait is synchronous (no async) to maintain a clean synchronous API
//! design; implementations share internal state via `Arc`, so clones access
//! the same underlying storage.

mod error;
mod memory;
mod redb;

pub use error::DocStoreError;
use logbus_proto::Record;
pub use memory::MemoryDocStore;
use serde::{Deserialize, Serialize};

pub use self::redb::RedbDocStore;

/// Persisted position of a durable subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCursor {
    /// Channel the subscription reads.
    pub channel: String,
    /// Last acknowledged record number.
    pub pos: i64,
}

/// Storage abstraction for binder documents and durable cursors.
///
/// Must be `Clone` (handed to every connection), `Send + Sync`
/// (thread-safe), and synchronous.
pub trait DocStore: Clone + Send + Sync + 'static {
    /// Store a document under `(binder, doc_id)`, overwriting any existing
    /// document.
    fn put_doc(&self, binder: &str, doc_id: &str, doc: &Record) -> Result<(), DocStoreError>;

    /// Load a document. `None` if the binder or document does not exist.
    fn get_doc(&self, binder: &str, doc_id: &str) -> Result<Option<Record>, DocStoreError>;

    /// All documents in a binder, in id order. Empty for an unknown binder.
    fn list_docs(&self, binder: &str) -> Result<Vec<(String, Record)>, DocStoreError>;

    /// Delete a document. Returns whether it existed.
    fn delete_doc(&self, binder: &str, doc_id: &str) -> Result<bool, DocStoreError>;

    /// Persist a durable subscription cursor, overwriting any existing one.
    fn save_cursor(&self, durable_id: &str, cursor: &StoredCursor) -> Result<(), DocStoreError>;

    /// Load a durable subscription cursor. `None` if never saved.
    fn load_cursor(&self, durable_id: &str) -> Result<Option<StoredCursor>, DocStoreError>;

    /// Discard a durable subscription cursor. Returns whether it existed.
    fn delete_cursor(&self, durable_id: &str) -> Result<bool, DocStoreError>;
}
