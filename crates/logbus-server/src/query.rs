//! Query execution.
//!
//! Two query shapes arrive over the wire: a single-shot document lookup
//! (binder + doc id, answered inline by the connection) and a named query
//! (resolved through the [`QueryRegistry`], streamed by a task under byte
//! credit, with `last` set on the final row).

use std::{collections::HashMap, sync::Arc};

use logbus_proto::{Frame, Record, encode_frame};
use tokio::sync::mpsc;

use crate::connection::ConnEvent;

/// Predicate deciding whether a document belongs in a query's result set.
type QueryPredicate = Arc<dyn Fn(&Record, &Record) -> bool + Send + Sync>;

/// A registered named query: the binder it scans and the row filter.
#[derive(Clone)]
pub struct QueryDef {
    binder: String,
    predicate: QueryPredicate,
}

impl QueryDef {
    /// Binder this query scans.
    #[must_use]
    pub fn binder(&self) -> &str {
        &self.binder
    }

    /// Evaluate the filter for one document.
    #[must_use]
    pub fn accepts(&self, params: &Record, doc: &Record) -> bool {
        (self.predicate)(params, doc)
    }
}

impl std::fmt::Debug for QueryDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryDef").field("binder", &self.binder).finish()
    }
}

/// Registry of named queries, populated before the server starts.
#[derive(Debug, Default)]
pub struct QueryRegistry {
    queries: HashMap<String, QueryDef>,
}

impl QueryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named query over a binder.
    ///
    /// The predicate receives the client's parameter record and a candidate
    /// document; returning `true` includes the document in the result
    /// stream.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        binder: impl Into<String>,
        predicate: impl Fn(&Record, &Record) -> bool + Send + Sync + 'static,
    ) {
        self.queries.insert(
            name.into(),
            QueryDef { binder: binder.into(), predicate: Arc::new(predicate) },
        );
    }

    /// Look up a named query.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&QueryDef> {
        self.queries.get(name)
    }
}

/// Control messages from the connection to a query execution.
#[derive(Debug)]
enum QueryCtrl {
    /// Replenish result credit.
    Ack(i64),
    /// Abandon the execution.
    Close,
}

/// Connection-side handle to a running query execution.
#[derive(Debug)]
pub(crate) struct QueryHandle {
    ctrl: mpsc::UnboundedSender<QueryCtrl>,
}

impl QueryHandle {
    /// Forward a QUERYACK's byte credit.
    pub(crate) fn handle_ack(&self, bytes: i64) {
        let _ = self.ctrl.send(QueryCtrl::Ack(bytes));
    }

    /// Abandon the execution.
    pub(crate) fn close(&self) {
        let _ = self.ctrl.send(QueryCtrl::Close);
    }
}

/// Spawn a streaming execution over an already-filtered result set.
pub(crate) fn spawn(
    query_id: i32,
    rows: Vec<Record>,
    initial_credit: i64,
    events: mpsc::UnboundedSender<ConnEvent>,
) -> QueryHandle {
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
    tokio::spawn(stream(query_id, rows, initial_credit, events, ctrl_rx));
    QueryHandle { ctrl: ctrl_tx }
}

async fn stream(
    query_id: i32,
    rows: Vec<Record>,
    initial_credit: i64,
    events: mpsc::UnboundedSender<ConnEvent>,
    mut ctrl_rx: mpsc::UnboundedReceiver<QueryCtrl>,
) {
    let total = rows.len();
    let mut credit = initial_credit;

    for (index, row) in rows.into_iter().enumerate() {
        while credit <= 0 {
            match ctrl_rx.recv().await {
                Some(QueryCtrl::Ack(bytes)) => credit += bytes,
                Some(QueryCtrl::Close) | None => return,
            }
        }

        let last = index + 1 == total;
        let frame = Frame::query_result(query_id, row, last);
        let wire = match encode_frame(&frame) {
            Ok(wire) => wire,
            Err(err) => {
                tracing::warn!(query_id, error = %err, "failed to encode query result");
                return;
            },
        };

        credit -= wire.len() as i64;
        if events.send(ConnEvent::Push(wire)).is_err() {
            return;
        }
    }

    let _ = events.send(ConnEvent::QueryFinished(query_id));
}
