//! Subscription delivery.
//!
//! Each subscription runs as its own task reading the channel log and
//! pushing RECEV frames into the connection's mailbox. Delivery is gated by
//! byte credit: the task never pushes once the outstanding credit is
//! exhausted, and ACKEV replenishes it through the control channel.
//!
//! Durable cursor maintenance lives on the [`SubscriptionHandle`], which is
//! only ever called from the connection's task: an ack persists the cursor
//! before the credit is forwarded, and unsubscribe discards it before the
//! task is stopped.

use logbus_core::{ChannelLog, DocStore, StoredCursor, SubDescriptor, matches};
use logbus_proto::{Frame, encode_frame, fields};
use tokio::sync::mpsc;

use crate::connection::ConnEvent;

/// Control messages from the connection to the delivery task.
#[derive(Debug)]
enum SubCtrl {
    /// Replenish byte credit.
    Ack(i64),
    /// Stop delivery.
    Close,
}

/// Connection-side handle to a live subscription.
pub(crate) struct SubscriptionHandle<D: DocStore> {
    ctrl: mpsc::UnboundedSender<SubCtrl>,
    channel: String,
    durable_id: Option<String>,
    docs: D,
}

impl<D: DocStore> SubscriptionHandle<D> {
    /// Forward an ACKEV: persist the durable cursor, then replenish
    /// credit.
    pub(crate) fn handle_ack(&self, pos: i64, bytes: i64) {
        if let Some(durable_id) = &self.durable_id {
            let cursor = StoredCursor { channel: self.channel.clone(), pos };
            if let Err(err) = self.docs.save_cursor(durable_id, &cursor) {
                tracing::warn!(%durable_id, error = %err, "failed to persist durable cursor");
            }
        }
        let _ = self.ctrl.send(SubCtrl::Ack(bytes));
    }

    /// Stop delivery, keeping any durable cursor.
    pub(crate) fn close(&self) {
        let _ = self.ctrl.send(SubCtrl::Close);
    }

    /// Stop delivery and discard the durable cursor.
    pub(crate) fn unsubscribe(&self) {
        if let Some(durable_id) = &self.durable_id {
            if let Err(err) = self.docs.delete_cursor(durable_id) {
                tracing::warn!(%durable_id, error = %err, "failed to discard durable cursor");
            }
        }
        let _ = self.ctrl.send(SubCtrl::Close);
    }
}

impl<D: DocStore> std::fmt::Debug for SubscriptionHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("channel", &self.channel)
            .field("durable_id", &self.durable_id)
            .finish()
    }
}

/// Spawn a delivery task for an opened subscription.
///
/// `start` is the resolved first record number to deliver; records below it
/// (possible when the resolver clamped to the tail) are skipped.
pub(crate) fn spawn<D: DocStore>(
    sub_id: i32,
    descriptor: SubDescriptor,
    start: u64,
    initial_credit: i64,
    log: ChannelLog,
    docs: D,
    events: mpsc::UnboundedSender<ConnEvent>,
) -> SubscriptionHandle<D> {
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
    let handle = SubscriptionHandle {
        ctrl: ctrl_tx,
        channel: descriptor.channel.clone(),
        durable_id: descriptor.durable_id.clone(),
        docs,
    };

    tokio::spawn(deliver(sub_id, descriptor, start, initial_credit, log, events, ctrl_rx));
    handle
}

async fn deliver(
    sub_id: i32,
    descriptor: SubDescriptor,
    start: u64,
    initial_credit: i64,
    log: ChannelLog,
    events: mpsc::UnboundedSender<ConnEvent>,
    mut ctrl_rx: mpsc::UnboundedReceiver<SubCtrl>,
) {
    let mut reader = match log.open_reader(start) {
        Ok(reader) => reader,
        Err(err) => {
            tracing::warn!(sub_id, channel = %descriptor.channel, error = %err, "subscription reader failed to open");
            return;
        },
    };
    let mut head = log.watch_head();
    let mut credit = initial_credit;

    loop {
        // Deliver while credit remains and published records exist. The head
        // watch is bumped only after a record is fully written, so the
        // reader never observes a partial frame.
        while credit > 0 {
            if reader.next_record_number() >= *head.borrow() {
                break;
            }

            let (number, record) = match reader.next() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(sub_id, channel = %descriptor.channel, error = %err, "subscription read failed");
                    return;
                },
            };

            if number < start {
                continue;
            }
            if let Some(since) = descriptor.start_timestamp {
                if record.get_i64(fields::TIMESTAMP).is_none_or(|ts| ts < since) {
                    continue;
                }
            }
            if let Some(matcher) = &descriptor.matcher {
                let Some(event) = record.get_record(fields::EVENT) else {
                    continue;
                };
                if !matches(matcher, event) {
                    continue;
                }
            }

            let frame = Frame::recev(sub_id, number as i64, record);
            let wire = match encode_frame(&frame) {
                Ok(wire) => wire,
                Err(err) => {
                    tracing::warn!(sub_id, error = %err, "failed to encode delivery frame");
                    return;
                },
            };

            credit -= wire.len() as i64;
            if events.send(ConnEvent::Push(wire)).is_err() {
                return;
            }
        }

        tokio::select! {
            ctrl = ctrl_rx.recv() => match ctrl {
                Some(SubCtrl::Ack(bytes)) => credit += bytes,
                Some(SubCtrl::Close) | None => return,
            },
            changed = head.changed() => {
                if changed.is_err() {
                    // Appender gone; nothing more will be published.
                    return;
                }
            },
        }
    }
}
