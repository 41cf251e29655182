//! Per-connection protocol engine.
//!
//! One tokio task owns everything a connection touches: the socket halves,
//! the streaming frame parser, the state machine, and the mailbox receiver.
//! Asynchronous completions (log appends, delivery frames, query results)
//! re-enter through the mailbox, so every piece of state below is accessed
//! from exactly one task. The mailbox is the connection's serial executor.
//!
//! Responses are sequenced: each gets an issue ordinal from `write_seq` at
//! handling time and passes through the [`ResponseSequencer`], which
//! restores issue order over out-of-order completions. Server-initiated
//! frames (RECEV, QUERYRESULT) bypass the sequencer but are still written
//! by this task, after whatever response bytes are already due.
//!
//! Protocol violations are fatal: the error is logged, the transport
//! closes, and no response is sent.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::{Bytes, BytesMut};
use logbus_core::{ChannelLog, DocStore, LogError, SubDescriptor, subscription::START_POS_NEXT};
use logbus_proto::{Frame, FrameParser, Record, encode_frame, fields, kind};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
};

use crate::{
    ServerState,
    error::ServerError,
    query::{self, QueryHandle},
    sequencer::ResponseSequencer,
    subscription::{self, SubscriptionHandle},
};

/// Completions and server-initiated frames re-entering the connection's
/// context through its mailbox.
#[derive(Debug)]
pub(crate) enum ConnEvent {
    /// A log append resolved; the response goes out at `order`.
    AppendDone {
        /// Issue ordinal assigned when the PUBLISH was handled.
        order: i64,
        /// Persistence outcome.
        result: Result<u64, LogError>,
    },
    /// Pre-encoded non-response frame (RECEV, QUERYRESULT): written
    /// directly, unordered against responses.
    Push(Bytes),
    /// A query execution sent its last row.
    QueryFinished(i32),
}

/// Per-connection protocol state.
pub(crate) struct Connection<D: DocStore> {
    id: u64,
    authorised: bool,
    sub_seq: i32,
    write_seq: i64,
    sequencer: ResponseSequencer,
    subscriptions: HashMap<i32, SubscriptionHandle<D>>,
    queries: HashMap<i32, QueryHandle>,
    events_tx: mpsc::UnboundedSender<ConnEvent>,
    state: Arc<ServerState<D>>,
}

/// Serve one accepted connection until the peer disconnects or a
/// protocol-fatal error closes it.
pub(crate) async fn run<D: DocStore>(
    stream: TcpStream,
    conn_id: u64,
    state: Arc<ServerState<D>>,
) -> Result<(), ServerError> {
    let (mut read_half, mut write_half) = stream.into_split();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut parser = FrameParser::new(state.config.max_frame_size);
    let mut conn = Connection::new(conn_id, events_tx, state);
    let mut readbuf = BytesMut::with_capacity(64 * 1024);

    let result: Result<(), ServerError> = 'conn: loop {
        let outputs = tokio::select! {
            read = read_half.read_buf(&mut readbuf) => match read {
                Ok(0) => break 'conn Ok(()),
                Ok(_) => {
                    parser.feed(&readbuf);
                    readbuf.clear();

                    let mut outputs = Vec::new();
                    loop {
                        match parser.next_frame() {
                            Ok(Some(frame)) => match conn.handle_frame(&frame) {
                                Ok(bufs) => outputs.extend(bufs),
                                Err(err) => break 'conn Err(err),
                            },
                            Ok(None) => break,
                            Err(err) => break 'conn Err(err.into()),
                        }
                    }
                    outputs
                },
                Err(err) => break 'conn Err(err.into()),
            },
            event = events_rx.recv() => match event {
                Some(event) => match conn.handle_event(event) {
                    Ok(bufs) => bufs,
                    Err(err) => break 'conn Err(err),
                },
                // Unreachable while the connection holds a sender.
                None => break 'conn Ok(()),
            },
        };

        for buf in outputs {
            if let Err(err) = write_half.write_all(&buf).await {
                break 'conn Err(err.into());
            }
        }
    };

    conn.close();
    result
}

impl<D: DocStore> Connection<D> {
    pub(crate) fn new(
        id: u64,
        events_tx: mpsc::UnboundedSender<ConnEvent>,
        state: Arc<ServerState<D>>,
    ) -> Self {
        Self {
            id,
            authorised: false,
            sub_seq: 0,
            write_seq: 0,
            sequencer: ResponseSequencer::new(),
            subscriptions: HashMap::new(),
            queries: HashMap::new(),
            events_tx,
            state,
        }
    }

    /// Dispatch one inbound frame, returning the bytes to write now.
    pub(crate) fn handle_frame(&mut self, frame: &Frame) -> Result<Vec<Bytes>, ServerError> {
        if !self.authorised && frame.kind() != kind::CONNECT {
            return Err(ServerError::Unauthorised(frame.kind().to_string()));
        }

        match frame.kind() {
            kind::CONNECT => self.handle_connect(),
            kind::PUBLISH => self.handle_publish(frame),
            kind::SUBSCRIBE => self.handle_subscribe(frame),
            kind::SUBCLOSE => self.handle_sub_close(frame, kind::SUBCLOSE, false),
            kind::UNSUBSCRIBE => self.handle_sub_close(frame, kind::UNSUBSCRIBE, true),
            kind::ACKEV => self.handle_ack_event(frame),
            kind::QUERY => self.handle_query(frame),
            kind::QUERYACK => self.handle_query_ack(frame),
            kind::PING => Ok(Vec::new()),
            kind::STARTTX | kind::COMMITTX | kind::ABORTTX => {
                tracing::debug!(conn = self.id, kind = frame.kind(), "transaction frames are accepted but not implemented");
                Ok(Vec::new())
            },
            other => Err(ServerError::UnknownFrameKind(other.to_string())),
        }
    }

    /// Handle a mailbox event, returning the bytes to write now.
    pub(crate) fn handle_event(&mut self, event: ConnEvent) -> Result<Vec<Bytes>, ServerError> {
        match event {
            ConnEvent::AppendDone { order, result } => match result {
                Ok(record_number) => {
                    tracing::trace!(conn = self.id, record_number, "publish persisted");
                    self.respond(order, &Frame::response(true, None))
                },
                Err(err) => {
                    tracing::warn!(conn = self.id, error = %err, "publish failed to persist");
                    self.respond(order, &Frame::response(false, Some("Failed to persist")))
                },
            },
            ConnEvent::Push(wire) => Ok(vec![wire]),
            ConnEvent::QueryFinished(query_id) => {
                self.queries.remove(&query_id);
                Ok(Vec::new())
            },
        }
    }

    /// Release resources held by the connection.
    ///
    /// Marks the connection unauthorised and closes every live
    /// subscription and query execution; durable cursors are retained.
    pub(crate) fn close(&mut self) {
        self.authorised = false;
        for (_, handle) in self.subscriptions.drain() {
            handle.close();
        }
        for (_, handle) in self.queries.drain() {
            handle.close();
        }
    }

    fn handle_connect(&mut self) -> Result<Vec<Bytes>, ServerError> {
        // Authentication config is reserved; every CONNECT is accepted.
        self.authorised = true;
        let order = self.next_order()?;
        self.respond(order, &Frame::response(true, None))
    }

    fn handle_publish(&mut self, frame: &Frame) -> Result<Vec<Bytes>, ServerError> {
        let channel = require_str(frame, kind::PUBLISH, fields::CHANNEL)?;
        let event = frame
            .fields()
            .get_record(fields::EVENT)
            .ok_or(ServerError::MissingField { kind: kind::PUBLISH, field: fields::EVENT })?
            .clone();

        // The issue ordinal is fixed here, before persistence starts.
        let order = self.next_order()?;

        let log = match self.state.logs.resolve(channel) {
            Ok(log) => log,
            Err(err @ LogError::InvalidChannelName(_)) => return Err(err.into()),
            Err(err) => {
                tracing::warn!(conn = self.id, channel, error = %err, "failed to open channel log");
                return self.respond(order, &Frame::response(false, Some("Failed to persist")));
            },
        };

        let stored = Record::new().put(fields::TIMESTAMP, now_millis()).put(fields::EVENT, event);
        let receipt = log.append(stored);

        // Completion lands on an arbitrary context; route it back through
        // the mailbox so the response is built on this connection's task.
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = receipt.wait().await;
            let _ = events_tx.send(ConnEvent::AppendDone { order, result });
        });

        Ok(Vec::new())
    }

    fn handle_subscribe(&mut self, frame: &Frame) -> Result<Vec<Bytes>, ServerError> {
        let channel = require_str(frame, kind::SUBSCRIBE, fields::CHANNEL)?.to_string();
        let descriptor = SubDescriptor {
            channel: channel.clone(),
            start_pos: frame.fields().get_i64(fields::START_POS).unwrap_or(START_POS_NEXT),
            start_timestamp: frame.fields().get_i64(fields::START_TIMESTAMP),
            durable_id: frame.fields().get_str(fields::DURABLE_ID).map(str::to_string),
            matcher: frame.fields().get_record(fields::MATCHER).cloned(),
        };

        let log = self
            .state
            .logs
            .lookup(&channel)?
            .ok_or(ServerError::UnknownChannel(channel))?;

        let order = self.next_order()?;
        let sub_id = self.next_sub_id()?;
        let start = self.resolve_start(&descriptor, &log)?;

        tracing::debug!(
            conn = self.id,
            sub_id,
            channel = %descriptor.channel,
            start,
            "subscription opened"
        );

        let handle = subscription::spawn(
            sub_id,
            descriptor,
            start,
            self.state.config.initial_credit,
            log,
            self.state.docs.clone(),
            self.events_tx.clone(),
        );
        self.subscriptions.insert(sub_id, handle);

        self.respond(order, &Frame::sub_response(true, sub_id))
    }

    /// First record number to deliver, in descending precedence: durable
    /// cursor, explicit start position, timestamp scan, next unseen.
    fn resolve_start(
        &self,
        descriptor: &SubDescriptor,
        log: &ChannelLog,
    ) -> Result<u64, ServerError> {
        if let Some(durable_id) = &descriptor.durable_id {
            if let Some(cursor) = self.state.docs.load_cursor(durable_id)? {
                if cursor.channel == descriptor.channel {
                    return Ok((cursor.pos + 1).max(0) as u64);
                }
                tracing::warn!(
                    %durable_id,
                    stored = %cursor.channel,
                    requested = %descriptor.channel,
                    "durable cursor bound to another channel; starting fresh"
                );
            }
        }

        if descriptor.start_pos >= 0 {
            return Ok(descriptor.start_pos as u64);
        }
        if descriptor.start_timestamp.is_some() {
            // Scan from the beginning; delivery filters on the timestamp.
            return Ok(0);
        }
        Ok(log.head_count())
    }

    fn handle_sub_close(
        &mut self,
        frame: &Frame,
        frame_kind: &'static str,
        discard_durable: bool,
    ) -> Result<Vec<Bytes>, ServerError> {
        let sub_id = require_i32(frame, frame_kind, fields::SUB_ID)?;
        let handle = self
            .subscriptions
            .remove(&sub_id)
            .ok_or(ServerError::UnknownSubscription(sub_id))?;

        if discard_durable {
            handle.unsubscribe();
        } else {
            handle.close();
        }

        let order = self.next_order()?;
        self.respond(order, &Frame::response(true, None))
    }

    fn handle_ack_event(&mut self, frame: &Frame) -> Result<Vec<Bytes>, ServerError> {
        let sub_id = require_i32(frame, kind::ACKEV, fields::SUB_ID)?;
        let bytes = require_i32(frame, kind::ACKEV, fields::BYTES)?;
        let pos = require_i64(frame, kind::ACKEV, fields::POS)?;

        let handle = self
            .subscriptions
            .get(&sub_id)
            .ok_or(ServerError::UnknownSubscription(sub_id))?;
        handle.handle_ack(pos, i64::from(bytes));

        Ok(Vec::new())
    }

    fn handle_query(&mut self, frame: &Frame) -> Result<Vec<Bytes>, ServerError> {
        let query_id = require_i32(frame, kind::QUERY, fields::QUERY_ID)?;
        let body = frame.fields();

        if let (Some(binder), Some(doc_id)) =
            (body.get_str(fields::BINDER), body.get_str(fields::DOC_ID))
        {
            // Single-shot document lookup.
            return match self.state.docs.get_doc(binder, doc_id) {
                Ok(Some(doc)) => {
                    let wire = encode_frame(&Frame::query_result(query_id, doc, true))?;
                    Ok(vec![wire])
                },
                Ok(None) => {
                    let order = self.next_order()?;
                    self.respond(order, &Frame::response(false, Some("No such binder or document")))
                },
                Err(err) => {
                    tracing::warn!(conn = self.id, binder, doc_id, error = %err, "document lookup failed");
                    let order = self.next_order()?;
                    self.respond(order, &Frame::response(false, Some("Query failed")))
                },
            };
        }

        let Some(name) = body.get_str(fields::NAME) else {
            return Err(ServerError::MissingField { kind: kind::QUERY, field: fields::NAME });
        };
        let params = body.get_record(fields::PARAMS).cloned().unwrap_or_default();

        let Some(def) = self.state.queries.get(name).cloned() else {
            let order = self.next_order()?;
            return self.respond(order, &Frame::response(false, Some("No such query")));
        };

        match self.state.docs.list_docs(def.binder()) {
            Ok(docs) => {
                let rows: Vec<Record> = docs
                    .into_iter()
                    .filter(|(_, doc)| def.accepts(&params, doc))
                    .map(|(_, doc)| doc)
                    .collect();

                if rows.is_empty() {
                    let wire = encode_frame(&Frame::query_result(query_id, Record::new(), true))?;
                    return Ok(vec![wire]);
                }

                let handle = query::spawn(
                    query_id,
                    rows,
                    self.state.config.initial_credit,
                    self.events_tx.clone(),
                );
                self.queries.insert(query_id, handle);
                Ok(Vec::new())
            },
            Err(err) => {
                tracing::warn!(conn = self.id, query = name, error = %err, "named query failed");
                let order = self.next_order()?;
                self.respond(order, &Frame::response(false, Some("Query failed")))
            },
        }
    }

    fn handle_query_ack(&mut self, frame: &Frame) -> Result<Vec<Bytes>, ServerError> {
        let query_id = require_i32(frame, kind::QUERYACK, fields::QUERY_ID)?;
        let bytes = require_i32(frame, kind::QUERYACK, fields::BYTES)?;

        let handle =
            self.queries.get(&query_id).ok_or(ServerError::UnknownQuery(query_id))?;
        handle.handle_ack(i64::from(bytes));

        Ok(Vec::new())
    }

    /// Encode a sequenced response and collect everything now writable.
    fn respond(&mut self, order: i64, frame: &Frame) -> Result<Vec<Bytes>, ServerError> {
        let wire = encode_frame(frame)?;
        self.sequencer.submit(order, wire)
    }

    /// Allocate the next response issue ordinal.
    fn next_order(&mut self) -> Result<i64, ServerError> {
        let order = self.write_seq;
        self.write_seq = self.write_seq.wrapping_add(1);
        if self.write_seq == i64::MIN {
            tracing::error!(conn = self.id, "int wrapped!");
            return Err(ServerError::CounterWrapped);
        }
        Ok(order)
    }

    /// Allocate the next subscription id.
    fn next_sub_id(&mut self) -> Result<i32, ServerError> {
        let sub_id = self.sub_seq;
        self.sub_seq = self.sub_seq.wrapping_add(1);
        if self.sub_seq == i32::MIN {
            tracing::error!(conn = self.id, "int wrapped!");
            return Err(ServerError::CounterWrapped);
        }
        Ok(sub_id)
    }
}

fn require_str<'frame>(
    frame: &'frame Frame,
    frame_kind: &'static str,
    field: &'static str,
) -> Result<&'frame str, ServerError> {
    frame
        .fields()
        .get_str(field)
        .ok_or(ServerError::MissingField { kind: frame_kind, field })
}

fn require_i32(
    frame: &Frame,
    frame_kind: &'static str,
    field: &'static str,
) -> Result<i32, ServerError> {
    frame
        .fields()
        .get_i32(field)
        .ok_or(ServerError::MissingField { kind: frame_kind, field })
}

fn require_i64(
    frame: &Frame,
    frame_kind: &'static str,
    field: &'static str,
) -> Result<i64, ServerError> {
    frame
        .fields()
        .get_i64(field)
        .ok_or(ServerError::MissingField { kind: frame_kind, field })
}

/// Wall-clock milliseconds since the Unix epoch, stamped on every
/// persisted record.
fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
