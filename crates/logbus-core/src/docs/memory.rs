//! In-memory document store for tests.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use logbus_proto::Record;

use super::{DocStore, DocStoreError, StoredCursor};

/// In-memory [`DocStore`] implementation.
///
/// Uses `BTreeMap` so `list_docs` comes back in id order for free. All
/// state is behind `Arc<Mutex<>>` to allow `Clone` and concurrent access;
/// `lock().expect()` will panic if the mutex is poisoned, which is
/// acceptable for test code.
#[derive(Clone, Default)]
pub struct MemoryDocStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// binder → (doc id → document)
    docs: BTreeMap<String, BTreeMap<String, Record>>,
    /// durable id → cursor
    cursors: BTreeMap<String, StoredCursor>,
}

impl MemoryDocStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocStore for MemoryDocStore {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    fn put_doc(&self, binder: &str, doc_id: &str, doc: &Record) -> Result<(), DocStoreError> {
        self.inner
            .lock()
            .expect("mutex poisoned")
            .docs
            .entry(binder.to_string())
            .or_default()
            .insert(doc_id.to_string(), doc.clone());
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    fn get_doc(&self, binder: &str, doc_id: &str) -> Result<Option<Record>, DocStoreError> {
        let inner = self.inner.lock().expect("mutex poisoned");
        Ok(inner.docs.get(binder).and_then(|docs| docs.get(doc_id)).cloned())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    fn list_docs(&self, binder: &str) -> Result<Vec<(String, Record)>, DocStoreError> {
        let inner = self.inner.lock().expect("mutex poisoned");
        Ok(inner
            .docs
            .get(binder)
            .map(|docs| docs.iter().map(|(id, doc)| (id.clone(), doc.clone())).collect())
            .unwrap_or_default())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    fn delete_doc(&self, binder: &str, doc_id: &str) -> Result<bool, DocStoreError> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        Ok(inner.docs.get_mut(binder).is_some_and(|docs| docs.remove(doc_id).is_some()))
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    fn save_cursor(&self, durable_id: &str, cursor: &StoredCursor) -> Result<(), DocStoreError> {
        self.inner
            .lock()
            .expect("mutex poisoned")
            .cursors
            .insert(durable_id.to_string(), cursor.clone());
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    fn load_cursor(&self, durable_id: &str) -> Result<Option<StoredCursor>, DocStoreError> {
        Ok(self.inner.lock().expect("mutex poisoned").cursors.get(durable_id).cloned())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    fn delete_cursor(&self, durable_id: &str) -> Result<bool, DocStoreError> {
        Ok(self.inner.lock().expect("mutex poisoned").cursors.remove(durable_id).is_some())
    }
}
