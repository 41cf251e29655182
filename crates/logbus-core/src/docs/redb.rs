//! Redb-backed durable document store.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! Documents and durable cursors survive server restarts.

use std::{path::Path, sync::Arc};

use logbus_proto::Record;
use redb::{Database, TableDefinition};

use super::{DocStore, DocStoreError, StoredCursor};

/// Table: documents
/// Key: `[binder length: u16 BE][binder bytes][doc id bytes]`
/// Value: CBOR-encoded document record
const DOCS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("documents");

/// Table: cursors
/// Key: durable id bytes
/// Value: CBOR-encoded `StoredCursor`
const CURSORS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("cursors");

/// Durable [`DocStore`] backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbDocStore {
    db: Arc<Database>,
}

impl RedbDocStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreError::Io`] if the database cannot be opened or
    /// created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DocStoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| DocStoreError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| DocStoreError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(DOCS).map_err(|e| DocStoreError::Io(e.to_string()))?;
            let _ = txn.open_table(CURSORS).map_err(|e| DocStoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| DocStoreError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl DocStore for RedbDocStore {
    fn put_doc(&self, binder: &str, doc_id: &str, doc: &Record) -> Result<(), DocStoreError> {
        let bytes = doc.encode().map_err(|e| DocStoreError::Serialization(e.to_string()))?;

        let txn = self.db.begin_write().map_err(|e| DocStoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(DOCS).map_err(|e| DocStoreError::Io(e.to_string()))?;
            let key = encode_doc_key(binder, doc_id);
            table
                .insert(key.as_slice(), bytes.as_slice())
                .map_err(|e| DocStoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| DocStoreError::Io(e.to_string()))?;

        Ok(())
    }

    fn get_doc(&self, binder: &str, doc_id: &str) -> Result<Option<Record>, DocStoreError> {
        let txn = self.db.begin_read().map_err(|e| DocStoreError::Io(e.to_string()))?;
        let table = txn.open_table(DOCS).map_err(|e| DocStoreError::Io(e.to_string()))?;

        let key = encode_doc_key(binder, doc_id);
        match table.get(key.as_slice()).map_err(|e| DocStoreError::Io(e.to_string()))? {
            Some(value) => {
                let doc = Record::decode(value.value())
                    .map_err(|e| DocStoreError::Serialization(e.to_string()))?;
                Ok(Some(doc))
            },
            None => Ok(None),
        }
    }

    fn list_docs(&self, binder: &str) -> Result<Vec<(String, Record)>, DocStoreError> {
        let txn = self.db.begin_read().map_err(|e| DocStoreError::Io(e.to_string()))?;
        let table = txn.open_table(DOCS).map_err(|e| DocStoreError::Io(e.to_string()))?;

        let prefix = encode_doc_key(binder, "");
        let results = table
            .range(prefix.as_slice()..)
            .map_err(|e| DocStoreError::Io(e.to_string()))?;

        let mut docs = Vec::new();
        for result in results {
            let (key, value) = result.map_err(|e| DocStoreError::Io(e.to_string()))?;
            let key = key.value();

            // Keys sharing the binder prefix are contiguous; stop at the
            // first key beyond it.
            if !key.starts_with(&prefix) {
                break;
            }

            let doc_id = String::from_utf8(key[prefix.len()..].to_vec())
                .map_err(|e| DocStoreError::Serialization(e.to_string()))?;
            let doc = Record::decode(value.value())
                .map_err(|e| DocStoreError::Serialization(e.to_string()))?;
            docs.push((doc_id, doc));
        }

        Ok(docs)
    }

    fn delete_doc(&self, binder: &str, doc_id: &str) -> Result<bool, DocStoreError> {
        let txn = self.db.begin_write().map_err(|e| DocStoreError::Io(e.to_string()))?;
        let existed = {
            let mut table = txn.open_table(DOCS).map_err(|e| DocStoreError::Io(e.to_string()))?;
            let key = encode_doc_key(binder, doc_id);
            table.remove(key.as_slice()).map_err(|e| DocStoreError::Io(e.to_string()))?.is_some()
        };
        txn.commit().map_err(|e| DocStoreError::Io(e.to_string()))?;

        Ok(existed)
    }

    fn save_cursor(&self, durable_id: &str, cursor: &StoredCursor) -> Result<(), DocStoreError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(cursor, &mut bytes)
            .map_err(|e| DocStoreError::Serialization(e.to_string()))?;

        let txn = self.db.begin_write().map_err(|e| DocStoreError::Io(e.to_string()))?;
        {
            let mut table =
                txn.open_table(CURSORS).map_err(|e| DocStoreError::Io(e.to_string()))?;
            table
                .insert(durable_id.as_bytes(), bytes.as_slice())
                .map_err(|e| DocStoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| DocStoreError::Io(e.to_string()))?;

        Ok(())
    }

    fn load_cursor(&self, durable_id: &str) -> Result<Option<StoredCursor>, DocStoreError> {
        let txn = self.db.begin_read().map_err(|e| DocStoreError::Io(e.to_string()))?;
        let table = txn.open_table(CURSORS).map_err(|e| DocStoreError::Io(e.to_string()))?;

        match table.get(durable_id.as_bytes()).map_err(|e| DocStoreError::Io(e.to_string()))? {
            Some(value) => {
                let cursor: StoredCursor = ciborium::from_reader(value.value())
                    .map_err(|e| DocStoreError::Serialization(e.to_string()))?;
                Ok(Some(cursor))
            },
            None => Ok(None),
        }
    }

    fn delete_cursor(&self, durable_id: &str) -> Result<bool, DocStoreError> {
        let txn = self.db.begin_write().map_err(|e| DocStoreError::Io(e.to_string()))?;
        let existed = {
            let mut table =
                txn.open_table(CURSORS).map_err(|e| DocStoreError::Io(e.to_string()))?;
            table
                .remove(durable_id.as_bytes())
                .map_err(|e| DocStoreError::Io(e.to_string()))?
                .is_some()
        };
        txn.commit().map_err(|e| DocStoreError::Io(e.to_string()))?;

        Ok(existed)
    }
}

/// Encode a document key: `[binder length: u16 BE][binder][doc id]`.
///
/// The length prefix keeps binders with common name prefixes from
/// interleaving their documents.
fn encode_doc_key(binder: &str, doc_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + binder.len() + doc_id.len());
    key.extend_from_slice(&(binder.len() as u16).to_be_bytes());
    key.extend_from_slice(binder.as_bytes());
    key.extend_from_slice(doc_id.as_bytes());
    key
}
