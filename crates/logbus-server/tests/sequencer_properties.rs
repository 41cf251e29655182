//! Property-based tests for the ordered-response serializer.
//!
//! Whatever order persistence completions arrive in, the bytes released to
//! the transport must be the responses in issue order, each exactly once.

use bytes::Bytes;
use logbus_server::ResponseSequencer;
use proptest::prelude::*;

fn permutations() -> impl Strategy<Value = Vec<i64>> {
    (1usize..32)
        .prop_flat_map(|n| Just((0..n as i64).collect::<Vec<i64>>()).prop_shuffle())
}

proptest! {
    #[test]
    fn any_completion_order_releases_in_issue_order(permutation in permutations()) {
        let mut seq = ResponseSequencer::new();

        let mut released = Vec::new();
        for order in &permutation {
            let buf = Bytes::copy_from_slice(&order.to_be_bytes());
            for out in seq.submit(*order, buf).unwrap() {
                released.push(i64::from_be_bytes(out.as_ref().try_into().unwrap()));
            }
        }

        let expected: Vec<i64> = (0..permutation.len() as i64).collect();
        prop_assert_eq!(released, expected);
        prop_assert_eq!(seq.pending_len(), 0);
    }

    #[test]
    fn nothing_releases_while_ordinal_zero_is_outstanding(
        orders in proptest::collection::hash_set(1i64..64, 1..16)
    ) {
        let mut seq = ResponseSequencer::new();

        for order in &orders {
            let released = seq.submit(*order, Bytes::new()).unwrap();
            prop_assert!(released.is_empty());
        }
        prop_assert_eq!(seq.pending_len(), orders.len());
        prop_assert_eq!(seq.expected_resp_no(), 0);
    }
}
