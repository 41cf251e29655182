//! Subscription descriptors and matcher evaluation.

use logbus_proto::Record;

/// Start position meaning "from the next unseen record".
pub const START_POS_NEXT: i64 = -1;

/// Everything needed to open a subscription.
///
/// Built by the protocol engine from a SUBSCRIBE frame; consumed by the
/// delivery layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubDescriptor {
    /// Channel to read.
    pub channel: String,
    /// Requested start record number; [`START_POS_NEXT`] means "next
    /// unseen".
    pub start_pos: i64,
    /// Deliver only records persisted at or after this timestamp.
    pub start_timestamp: Option<i64>,
    /// Identifier of a durable cursor to resume and maintain.
    pub durable_id: Option<String>,
    /// Filter applied to each event before delivery.
    pub matcher: Option<Record>,
}

impl SubDescriptor {
    /// Descriptor for a plain subscription from the next unseen record.
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            start_pos: START_POS_NEXT,
            start_timestamp: None,
            durable_id: None,
            matcher: None,
        }
    }
}

/// Evaluate a matcher against an event.
///
/// An event matches when every matcher field is present in the event with
/// an equal value; nested records compare structurally. An empty matcher
/// matches everything. Records that fail the matcher are skipped silently
/// by the delivery layer.
#[must_use]
pub fn matches(matcher: &Record, event: &Record) -> bool {
    matcher.iter().all(|(name, wanted)| event.get(name) == Some(wanted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_matcher_matches_everything() {
        assert!(matches(&Record::new(), &Record::new().put("id", 1)));
        assert!(matches(&Record::new(), &Record::new()));
    }

    #[test]
    fn matcher_is_a_conjunction() {
        let event = Record::new().put("kind", "order").put("region", "eu").put("total", 10);

        assert!(matches(&Record::new().put("kind", "order"), &event));
        assert!(matches(&Record::new().put("kind", "order").put("region", "eu"), &event));
        assert!(!matches(&Record::new().put("kind", "order").put("region", "us"), &event));
        assert!(!matches(&Record::new().put("missing", true), &event));
    }

    #[test]
    fn nested_records_compare_structurally() {
        let event = Record::new().put("meta", Record::new().put("source", "web"));

        assert!(matches(&Record::new().put("meta", Record::new().put("source", "web")), &event));
        assert!(!matches(&Record::new().put("meta", Record::new().put("source", "app")), &event));
    }

    #[test]
    fn integer_widths_compare_equal_after_decode() {
        // A matcher arriving off the wire holds I32 for small values; the
        // stored event decodes the same way, so equality holds.
        let matcher = Record::decode(&Record::new().put("n", 5_i64).encode().unwrap()).unwrap();
        let event = Record::decode(&Record::new().put("n", 5).encode().unwrap()).unwrap();
        assert!(matches(&matcher, &event));
    }
}
