//! Property-based tests for frame encoding/decoding.
//!
//! These tests verify that frame serialization is correct for ALL valid
//! inputs, not just specific examples. Uses proptest to generate arbitrary
//! frames and verify round-trip and streaming-parse properties.

use bytes::Bytes;
use logbus_proto::{Frame, FrameParser, Record, Value, encode_frame, kind};
use proptest::prelude::*;

/// Strategy for generating arbitrary frame kinds
fn arbitrary_kind() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just(kind::CONNECT),
        Just(kind::RESPONSE),
        Just(kind::PUBLISH),
        Just(kind::SUBSCRIBE),
        Just(kind::SUBRESPONSE),
        Just(kind::ACKEV),
        Just(kind::SUBCLOSE),
        Just(kind::UNSUBSCRIBE),
        Just(kind::RECEV),
        Just(kind::QUERY),
        Just(kind::QUERYRESULT),
        Just(kind::QUERYACK),
        Just(kind::PING),
    ]
}

/// Strategy for leaf field values.
///
/// Integers outside the i32 range stay I64 after decoding; values inside it
/// are generated as I32 so round-trips compare equal (CBOR integers carry no
/// width).
fn arbitrary_leaf() -> impl Strategy<Value = Value> + Clone {
    prop_oneof![
        "[a-zA-Z0-9 ]{0,32}".prop_map(Value::Str),
        any::<i32>().prop_map(Value::I32),
        (i64::from(i32::MAX) + 1..i64::MAX).prop_map(Value::I64),
        (i64::MIN..i64::from(i32::MIN) - 1).prop_map(Value::I64),
        any::<bool>().prop_map(Value::Bool),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(|b| Value::Bytes(Bytes::from(b))),
    ]
}

/// Strategy for records: leaf fields plus one level of nesting
fn arbitrary_record() -> impl Strategy<Value = Record> {
    let flat = prop::collection::btree_map("[a-z]{1,8}", arbitrary_leaf(), 0..6).prop_map(|m| {
        let mut record = Record::new();
        for (k, v) in m {
            record.set(k, v);
        }
        record
    });

    (flat.clone(), prop::option::of(flat)).prop_map(|(mut outer, nested)| {
        if let Some(inner) = nested {
            outer.set("nested", inner);
        }
        outer
    })
}

fn arbitrary_frame() -> impl Strategy<Value = Frame> {
    (arbitrary_kind(), arbitrary_record()).prop_map(|(k, fields)| Frame::with(k, fields))
}

proptest! {
    #[test]
    fn frame_round_trip(frame in arbitrary_frame()) {
        let wire = encode_frame(&frame).unwrap();

        let mut parser = FrameParser::default();
        parser.feed(&wire);

        let parsed = parser.next_frame().unwrap().unwrap();
        prop_assert_eq!(parsed, frame);
        prop_assert_eq!(parser.next_frame().unwrap(), None);
    }

    #[test]
    fn parse_is_split_invariant(
        frames in prop::collection::vec(arbitrary_frame(), 1..5),
        chunk in 1usize..17,
    ) {
        let mut wire = Vec::new();
        for frame in &frames {
            wire.extend_from_slice(&encode_frame(frame).unwrap());
        }

        // Feeding in arbitrary chunk sizes yields the same frame sequence.
        let mut parser = FrameParser::default();
        let mut parsed = Vec::new();
        for piece in wire.chunks(chunk) {
            parser.feed(piece);
            while let Some(frame) = parser.next_frame().unwrap() {
                parsed.push(frame);
            }
        }

        prop_assert_eq!(parsed, frames);
        prop_assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn truncated_frame_never_parses(frame in arbitrary_frame()) {
        let wire = encode_frame(&frame).unwrap();

        let mut parser = FrameParser::default();
        parser.feed(&wire[..wire.len() - 1]);
        prop_assert_eq!(parser.next_frame().unwrap(), None);
    }
}
