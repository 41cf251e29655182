//! End-to-end publish/subscribe tests over real TCP.

mod common;

use common::{QUIET_WINDOW, TestClient, start_server};
use logbus_proto::{Frame, Record, fields, kind};

fn event(n: i32) -> Record {
    Record::new().put("id", n)
}

fn ackev(sub_id: i32, bytes: i32, pos: i64) -> Frame {
    Frame::new(kind::ACKEV)
        .put(fields::SUB_ID, sub_id)
        .put(fields::BYTES, bytes)
        .put(fields::POS, pos)
}

/// Assert a RECEV frame and return `(pos, event record)`.
fn expect_recev(frame: &Frame, sub_id: i32) -> (i64, Record) {
    assert_eq!(frame.kind(), kind::RECEV);
    assert_eq!(frame.fields().get_i32(fields::SUB_ID), Some(sub_id));

    let record = frame.fields().get_record(fields::RECORD).unwrap();
    assert!(record.get_i64(fields::TIMESTAMP).is_some_and(|ts| ts > 0));

    (frame.fields().get_i64(fields::POS).unwrap(), record.get_record(fields::EVENT).unwrap().clone())
}

#[tokio::test]
async fn publish_subscribe_round_trip() {
    let server = start_server().await;

    // Client A publishes two events.
    let mut publisher = TestClient::handshake(server.addr).await;
    publisher.send(&Frame::publish("orders", event(1))).await;
    publisher.send(&Frame::publish("orders", event(2))).await;

    for _ in 0..2 {
        let reply = publisher.recv().await;
        assert_eq!(reply.kind(), kind::RESPONSE);
        assert_eq!(reply.fields().get_bool(fields::OK), Some(true));
    }

    // Client B replays the channel from the start.
    let mut subscriber = TestClient::handshake(server.addr).await;
    subscriber.send(&Frame::subscribe("orders", 0)).await;

    let sub_reply = subscriber.recv().await;
    assert_eq!(sub_reply.kind(), kind::SUBRESPONSE);
    assert_eq!(sub_reply.fields().get_bool(fields::OK), Some(true));
    let sub_id = sub_reply.fields().get_i32(fields::SUB_ID).unwrap();

    let (pos, first) = expect_recev(&subscriber.recv().await, sub_id);
    assert_eq!(pos, 0);
    assert_eq!(first.get_i32("id"), Some(1));

    let (pos, second) = expect_recev(&subscriber.recv().await, sub_id);
    assert_eq!(pos, 1);
    assert_eq!(second.get_i32("id"), Some(2));
}

#[tokio::test]
async fn pipelined_publishes_respond_in_issue_order() {
    let server = start_server().await;
    let mut client = TestClient::handshake(server.addr).await;

    // Fire publishes across two channels without waiting; every response
    // must still come back in issue order, all positive.
    for n in 0..10 {
        let channel = if n % 2 == 0 { "even" } else { "odd" };
        client.send(&Frame::publish(channel, event(n))).await;
    }
    for _ in 0..10 {
        let reply = client.recv().await;
        assert_eq!(reply.kind(), kind::RESPONSE);
        assert_eq!(reply.fields().get_bool(fields::OK), Some(true));
    }
}

#[tokio::test]
async fn live_subscriber_tails_new_events() {
    let server = start_server().await;

    let mut publisher = TestClient::handshake(server.addr).await;
    publisher.send(&Frame::publish("orders", event(1))).await;
    publisher.recv().await;

    // Subscribe from "next unseen": the existing event is not replayed.
    let mut subscriber = TestClient::handshake(server.addr).await;
    subscriber.send(&Frame::new(kind::SUBSCRIBE).put(fields::CHANNEL, "orders")).await;
    let sub_id = subscriber.recv().await.fields().get_i32(fields::SUB_ID).unwrap();

    assert!(subscriber.try_recv(QUIET_WINDOW).await.is_none());

    publisher.send(&Frame::publish("orders", event(2))).await;
    publisher.recv().await;

    let (pos, record) = expect_recev(&subscriber.recv().await, sub_id);
    assert_eq!(pos, 1);
    assert_eq!(record.get_i32("id"), Some(2));
}

#[tokio::test]
async fn matcher_filters_events() {
    let server = start_server().await;

    let mut publisher = TestClient::handshake(server.addr).await;
    for (n, region) in [(0, "eu"), (1, "us"), (2, "eu")] {
        publisher
            .send(&Frame::publish("orders", Record::new().put("id", n).put("region", region)))
            .await;
        publisher.recv().await;
    }

    let mut subscriber = TestClient::handshake(server.addr).await;
    subscriber
        .send(
            &Frame::subscribe("orders", 0)
                .put(fields::MATCHER, Record::new().put("region", "eu")),
        )
        .await;
    let sub_id = subscriber.recv().await.fields().get_i32(fields::SUB_ID).unwrap();

    // Non-matching records are skipped silently.
    let (pos, _) = expect_recev(&subscriber.recv().await, sub_id);
    assert_eq!(pos, 0);
    let (pos, _) = expect_recev(&subscriber.recv().await, sub_id);
    assert_eq!(pos, 2);
    assert!(subscriber.try_recv(QUIET_WINDOW).await.is_none());
}

#[tokio::test]
async fn durable_subscription_resumes_from_cursor() {
    let server = start_server().await;

    let mut publisher = TestClient::handshake(server.addr).await;
    for n in 0..2 {
        publisher.send(&Frame::publish("jobs", event(n))).await;
        publisher.recv().await;
    }

    let mut worker = TestClient::handshake(server.addr).await;
    worker
        .send(&Frame::subscribe("jobs", 0).put(fields::DURABLE_ID, "worker-1"))
        .await;
    let sub_id = worker.recv().await.fields().get_i32(fields::SUB_ID).unwrap();

    let (pos, _) = expect_recev(&worker.recv().await, sub_id);
    assert_eq!(pos, 0);
    let (pos, _) = expect_recev(&worker.recv().await, sub_id);
    assert_eq!(pos, 1);

    // Acknowledge up to record 1, then close keeping the cursor.
    worker.send(&ackev(sub_id, 4096, 1)).await;
    worker.send(&Frame::new(kind::SUBCLOSE).put(fields::SUB_ID, sub_id)).await;
    let reply = worker.recv().await;
    assert_eq!(reply.fields().get_bool(fields::OK), Some(true));

    for n in 2..4 {
        publisher.send(&Frame::publish("jobs", event(n))).await;
        publisher.recv().await;
    }

    // Resubscribing with the durable id resumes after the cursor.
    worker
        .send(&Frame::new(kind::SUBSCRIBE).put(fields::CHANNEL, "jobs").put(fields::DURABLE_ID, "worker-1"))
        .await;
    let sub_id = worker.recv().await.fields().get_i32(fields::SUB_ID).unwrap();

    let (pos, record) = expect_recev(&worker.recv().await, sub_id);
    assert_eq!(pos, 2);
    assert_eq!(record.get_i32("id"), Some(2));
    let (pos, _) = expect_recev(&worker.recv().await, sub_id);
    assert_eq!(pos, 3);

    // UNSUBSCRIBE discards the cursor: the next durable subscribe starts
    // at next-unseen instead of the old position.
    worker.send(&Frame::new(kind::UNSUBSCRIBE).put(fields::SUB_ID, sub_id)).await;
    worker.recv().await;

    worker
        .send(&Frame::new(kind::SUBSCRIBE).put(fields::CHANNEL, "jobs").put(fields::DURABLE_ID, "worker-1"))
        .await;
    let sub_id = worker.recv().await.fields().get_i32(fields::SUB_ID).unwrap();
    assert!(worker.try_recv(QUIET_WINDOW).await.is_none());

    publisher.send(&Frame::publish("jobs", event(9))).await;
    publisher.recv().await;

    let (pos, record) = expect_recev(&worker.recv().await, sub_id);
    assert_eq!(pos, 4);
    assert_eq!(record.get_i32("id"), Some(9));
}

#[tokio::test]
async fn publish_without_channel_closes_the_connection() {
    let server = start_server().await;
    let mut client = TestClient::handshake(server.addr).await;

    // Missing required field: fatal, no RESPONSE.
    client.send(&Frame::new(kind::PUBLISH).put(fields::EVENT, Record::new())).await;
    client.expect_closed().await;
}

#[tokio::test]
async fn frames_before_connect_close_the_connection() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client.send(&Frame::publish("orders", event(1))).await;
    client.expect_closed().await;
}

#[tokio::test]
async fn subscribe_to_unknown_channel_closes_the_connection() {
    let server = start_server().await;
    let mut client = TestClient::handshake(server.addr).await;

    client.send(&Frame::subscribe("neverpublished", 0)).await;
    client.expect_closed().await;
}

#[tokio::test]
async fn ack_with_invalid_sub_id_closes_the_connection() {
    let server = start_server().await;
    let mut client = TestClient::handshake(server.addr).await;

    client.send(&ackev(42, 1024, 0)).await;
    client.expect_closed().await;
}
