//! Transport frames: a frame kind plus named fields.
//!
//! The frame kind travels as the **first** entry of the encoded map under the
//! reserved name `frame`, so a receiver can identify the frame before looking
//! at any field. The remaining entries are the frame's fields.
//!
//! Typed constructors cover every frame the server emits; field access goes
//! through the [`Record`] accessors.

use ciborium::value::Value as Cbor;

use crate::{
    errors::{ProtocolError, Result},
    record::Record,
};

/// Frame kind names.
pub mod kind {
    /// Authorize the connection. No fields.
    pub const CONNECT: &str = "CONNECT";
    /// Generic sequenced reply.
    pub const RESPONSE: &str = "RESPONSE";
    /// Publish an event to a channel.
    pub const PUBLISH: &str = "PUBLISH";
    /// Open a subscription.
    pub const SUBSCRIBE: &str = "SUBSCRIBE";
    /// Reply to SUBSCRIBE carrying the subscription id.
    pub const SUBRESPONSE: &str = "SUBRESPONSE";
    /// Acknowledge consumption and replenish credit.
    pub const ACKEV: &str = "ACKEV";
    /// Close a subscription, keeping any durable cursor.
    pub const SUBCLOSE: &str = "SUBCLOSE";
    /// Close a subscription and discard its durable cursor.
    pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
    /// Event delivery to a subscriber.
    pub const RECEV: &str = "RECEV";
    /// Document lookup or named query.
    pub const QUERY: &str = "QUERY";
    /// Streamed query result row.
    pub const QUERYRESULT: &str = "QUERYRESULT";
    /// Replenish query result credit.
    pub const QUERYACK: &str = "QUERYACK";
    /// Keepalive. No fields, no reply.
    pub const PING: &str = "PING";
    /// Reserved transaction frame.
    pub const STARTTX: &str = "STARTTX";
    /// Reserved transaction frame.
    pub const COMMITTX: &str = "COMMITTX";
    /// Reserved transaction frame.
    pub const ABORTTX: &str = "ABORTTX";
}

/// Field names used by the frames in [`kind`].
pub mod fields {
    /// Reserved name carrying the frame kind.
    pub const FRAME: &str = "frame";
    /// Channel name.
    pub const CHANNEL: &str = "channel";
    /// Client event record.
    pub const EVENT: &str = "event";
    /// Success flag on RESPONSE/SUBRESPONSE.
    pub const OK: &str = "ok";
    /// Error message on a negative RESPONSE.
    pub const ERR_MSG: &str = "errMsg";
    /// Subscription id.
    pub const SUB_ID: &str = "subID";
    /// Requested start record number (-1 = next unseen).
    pub const START_POS: &str = "startPos";
    /// Requested start timestamp (ms since epoch).
    pub const START_TIMESTAMP: &str = "startTimestamp";
    /// Durable subscription identifier.
    pub const DURABLE_ID: &str = "durableID";
    /// Matcher record for filtered subscriptions.
    pub const MATCHER: &str = "matcher";
    /// Byte credit on ACKEV/QUERYACK.
    pub const BYTES: &str = "bytes";
    /// Record number on ACKEV/RECEV.
    pub const POS: &str = "pos";
    /// Query id.
    pub const QUERY_ID: &str = "queryID";
    /// Binder name on a document lookup.
    pub const BINDER: &str = "binder";
    /// Document id on a document lookup.
    pub const DOC_ID: &str = "docID";
    /// Registered query name.
    pub const NAME: &str = "name";
    /// Query parameter record.
    pub const PARAMS: &str = "params";
    /// Result record on QUERYRESULT.
    pub const RESULT: &str = "result";
    /// Final-row flag on QUERYRESULT.
    pub const LAST: &str = "last";
    /// Persisted record on RECEV.
    pub const RECORD: &str = "record";
    /// Persistence timestamp inside a stored record.
    pub const TIMESTAMP: &str = "timestamp";
}

/// A protocol frame: kind plus fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: String,
    fields: Record,
}

impl Frame {
    /// Create a frame with no fields.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), fields: Record::new() }
    }

    /// Create a frame from an existing field record.
    #[must_use]
    pub fn with(kind: impl Into<String>, fields: Record) -> Self {
        Self { kind: kind.into(), fields }
    }

    /// Add a field, consuming and returning the frame for chaining.
    #[must_use]
    pub fn put(mut self, name: impl Into<String>, value: impl Into<crate::Value>) -> Self {
        self.fields.set(name, value);
        self
    }

    /// Frame kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Frame fields.
    #[must_use]
    pub fn fields(&self) -> &Record {
        &self.fields
    }

    /// Consume the frame, returning its fields.
    #[must_use]
    pub fn into_fields(self) -> Record {
        self.fields
    }

    /// Encode the frame body (the CBOR record, without the length prefix).
    ///
    /// The `frame` kind entry is emitted first.
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        let mut entries = Vec::with_capacity(self.fields.len() + 1);
        entries.push((Cbor::Text(fields::FRAME.to_string()), Cbor::Text(self.kind.clone())));
        entries.extend(self.fields.clone().into_cbor_entries());

        let mut out = Vec::new();
        ciborium::ser::into_writer(&Cbor::Map(entries), &mut out)
            .map_err(|e| ProtocolError::InvalidRecord(e.to_string()))?;
        Ok(out)
    }

    /// Decode a frame body.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::NotARecord`] if the payload is not a text-keyed map
    /// - [`ProtocolError::MissingKind`] if the first entry is not the `frame`
    ///   kind entry
    pub fn decode_payload(bytes: &[u8]) -> Result<Self> {
        let cbor: Cbor = ciborium::de::from_reader(bytes)
            .map_err(|e| ProtocolError::InvalidRecord(e.to_string()))?;
        let Cbor::Map(mut entries) = cbor else {
            return Err(ProtocolError::NotARecord);
        };

        if entries.is_empty() {
            return Err(ProtocolError::MissingKind);
        }

        let (first_key, first_value) = entries.remove(0);
        let kind = match (first_key, first_value) {
            (Cbor::Text(name), Cbor::Text(kind)) if name == fields::FRAME => kind,
            _ => return Err(ProtocolError::MissingKind),
        };

        Ok(Self { kind, fields: Record::from_cbor_entries(entries)? })
    }

    /// Generic RESPONSE. A negative response carries the error message.
    #[must_use]
    pub fn response(ok: bool, err_msg: Option<&str>) -> Self {
        let mut frame = Self::new(kind::RESPONSE).put(fields::OK, ok);
        if let Some(msg) = err_msg {
            frame = frame.put(fields::ERR_MSG, msg);
        }
        frame
    }

    /// SUBRESPONSE carrying the allocated subscription id.
    #[must_use]
    pub fn sub_response(ok: bool, sub_id: i32) -> Self {
        Self::new(kind::SUBRESPONSE).put(fields::OK, ok).put(fields::SUB_ID, sub_id)
    }

    /// RECEV event delivery.
    #[must_use]
    pub fn recev(sub_id: i32, pos: i64, record: Record) -> Self {
        Self::new(kind::RECEV)
            .put(fields::SUB_ID, sub_id)
            .put(fields::POS, pos)
            .put(fields::RECORD, record)
    }

    /// QUERYRESULT row.
    #[must_use]
    pub fn query_result(query_id: i32, result: Record, last: bool) -> Self {
        Self::new(kind::QUERYRESULT)
            .put(fields::QUERY_ID, query_id)
            .put(fields::RESULT, result)
            .put(fields::LAST, last)
    }

    /// Client-side PUBLISH.
    #[must_use]
    pub fn publish(channel: &str, event: Record) -> Self {
        Self::new(kind::PUBLISH).put(fields::CHANNEL, channel).put(fields::EVENT, event)
    }

    /// Client-side SUBSCRIBE from an explicit start position.
    #[must_use]
    pub fn subscribe(channel: &str, start_pos: i64) -> Self {
        Self::new(kind::SUBSCRIBE).put(fields::CHANNEL, channel).put(fields::START_POS, start_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let frame = Frame::publish("orders", Record::new().put("id", 1));

        let payload = frame.encode_payload().unwrap();
        let parsed = Frame::decode_payload(&payload).unwrap();

        assert_eq!(parsed.kind(), kind::PUBLISH);
        assert_eq!(parsed.fields().get_str(fields::CHANNEL), Some("orders"));
        assert_eq!(parsed, frame);
    }

    #[test]
    fn kind_entry_is_first() {
        let payload = Frame::new(kind::CONNECT).encode_payload().unwrap();
        let cbor: Cbor = ciborium::de::from_reader(payload.as_slice()).unwrap();

        let Cbor::Map(entries) = cbor else { panic!("expected map") };
        assert_eq!(entries[0].0, Cbor::Text(fields::FRAME.to_string()));
        assert_eq!(entries[0].1, Cbor::Text(kind::CONNECT.to_string()));
    }

    #[test]
    fn reject_payload_without_kind() {
        let payload = Record::new().put("channel", "orders").encode().unwrap();
        assert_eq!(Frame::decode_payload(&payload), Err(ProtocolError::MissingKind));
    }

    #[test]
    fn reject_empty_map() {
        let mut out = Vec::new();
        ciborium::ser::into_writer(&Cbor::Map(Vec::new()), &mut out).unwrap();
        assert_eq!(Frame::decode_payload(&out), Err(ProtocolError::MissingKind));
    }

    #[test]
    fn negative_response_carries_message() {
        let frame = Frame::response(false, Some("Failed to persist"));
        assert_eq!(frame.fields().get_bool(fields::OK), Some(false));
        assert_eq!(frame.fields().get_str(fields::ERR_MSG), Some("Failed to persist"));
    }
}
