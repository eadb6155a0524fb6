//! End-to-end tests: a producer node and a consumer node on loopback.
//!
//! Both nodes use the discovery, control and data paths for real; only
//! the capture and output devices are doubles.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use media_protocol::frame::VideoFrame;
use relay_node::config::Config;
use relay_node::node::{RelayNode, RelayNodeHandle};
use relay_node::session::phase::{PeerRole, SessionPhase};
use relay_node::status::NodeStatus;
use relay_test_utils::{
    collect_transitions_until, test_frame, wait_for_phase, wait_for_status, MockCaptureBackend,
    NodeVars, PortSet, RecordingSinkBackend,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn frames() -> Vec<VideoFrame> {
    (1..=3).map(|seed| test_frame(8, 8, 3, seed)).collect()
}

struct Pair {
    producer: RelayNodeHandle,
    consumer: RelayNodeHandle,
    capture: MockCaptureBackend,
    sink: RecordingSinkBackend,
}

/// Spawn a producer and a consumer; `capture_role` owns the scripted camera.
async fn spawn_pair(capture_role: &str) -> Pair {
    let ports = PortSet::allocate();
    let producer_config = Config::from_vars(
        &NodeVars::loopback_producer(ports)
            .set("RELAY_CAPTURE_ROLE", capture_role)
            .build(),
    )
    .unwrap();
    let consumer_config = Config::from_vars(
        &NodeVars::loopback_consumer(ports)
            .set("RELAY_CAPTURE_ROLE", capture_role)
            .build(),
    )
    .unwrap();

    let capture = MockCaptureBackend::builder()
        .frames(frames())
        .then_hold()
        .build();
    let sink = RecordingSinkBackend::new();
    let unused_capture = MockCaptureBackend::builder().fail_on_open().build();
    let unused_sink = RecordingSinkBackend::failing();

    let (producer_capture, consumer_capture) = if capture_role == "producer" {
        (capture.clone(), unused_capture)
    } else {
        (unused_capture, capture.clone())
    };
    let (producer_sink, consumer_sink) = if capture_role == "producer" {
        (unused_sink, sink.clone())
    } else {
        (sink.clone(), unused_sink)
    };

    let producer = RelayNode::spawn(
        producer_config,
        Arc::new(producer_capture),
        Arc::new(producer_sink),
    )
    .await;
    let consumer = RelayNode::spawn(
        consumer_config,
        Arc::new(consumer_capture),
        Arc::new(consumer_sink),
    )
    .await;

    Pair {
        producer,
        consumer,
        capture,
        sink,
    }
}

#[tokio::test]
async fn test_three_frames_reach_producer_sink_in_order() {
    let pair = spawn_pair("consumer").await;
    assert_eq!(pair.producer.role(), PeerRole::Producer);
    assert_eq!(pair.consumer.role(), PeerRole::Consumer);

    let received = pair.sink.wait_for_frames(3, TIMEOUT).await.unwrap();
    assert_eq!(received, frames());
    assert_eq!(pair.sink.opened(), vec![(8, 8, 50)]);

    wait_for_phase(&mut pair.consumer.subscribe_phase(), SessionPhase::Streaming, TIMEOUT)
        .await
        .unwrap();
    wait_for_phase(&mut pair.producer.subscribe_phase(), SessionPhase::Streaming, TIMEOUT)
        .await
        .unwrap();
    assert!(matches!(
        pair.consumer.status(),
        NodeStatus::Streaming { .. }
    ));

    pair.consumer.stop().await.unwrap();
    pair.producer.stop().await.unwrap();
    assert_eq!(pair.capture.opens(), 1);
    assert_eq!(pair.capture.closes(), 1);
    assert_eq!(pair.sink.closes(), 1);
}

#[tokio::test]
async fn test_frames_flow_to_consumer_when_producer_captures() {
    let pair = spawn_pair("producer").await;

    let received = pair.sink.wait_for_frames(3, TIMEOUT).await.unwrap();
    assert_eq!(received, frames());

    pair.producer.stop().await.unwrap();
    pair.consumer.stop().await.unwrap();
    assert_eq!(pair.capture.opens(), pair.capture.closes());
}

#[tokio::test]
async fn test_consumer_stop_returns_producer_to_advertising() {
    let pair = spawn_pair("consumer").await;
    pair.sink.wait_for_frames(3, TIMEOUT).await.unwrap();

    let mut producer_transitions = pair.producer.subscribe_transitions();
    pair.consumer.stop().await.unwrap();

    let seen = collect_transitions_until(
        &mut producer_transitions,
        SessionPhase::Advertising,
        TIMEOUT,
    )
    .await
    .unwrap();
    assert_eq!(
        seen,
        vec![
            SessionPhase::Stopping,
            SessionPhase::Idle,
            SessionPhase::Advertising
        ]
    );
    assert_eq!(pair.sink.closes(), 1);

    pair.producer.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let pair = spawn_pair("consumer").await;
    pair.sink.wait_for_frames(3, TIMEOUT).await.unwrap();

    pair.consumer.stop().await.unwrap();
    pair.consumer.stop().await.unwrap();
    assert_eq!(pair.consumer.phase(), SessionPhase::Idle);
    assert_eq!(pair.consumer.status(), NodeStatus::Stopped);
    assert!(!pair.consumer.end_session());

    // Released exactly once
    assert_eq!(pair.capture.opens(), 1);
    assert_eq!(pair.capture.closes(), 1);

    pair.producer.stop().await.unwrap();
    pair.producer.stop().await.unwrap();
    assert_eq!(pair.producer.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn test_end_session_keeps_node_running() {
    let pair = spawn_pair("consumer").await;
    pair.sink.wait_for_frames(3, TIMEOUT).await.unwrap();
    wait_for_phase(&mut pair.producer.subscribe_phase(), SessionPhase::Streaming, TIMEOUT)
        .await
        .unwrap();

    let mut consumer_status = pair.consumer.subscribe_status();
    assert!(pair.producer.end_session());

    let status = wait_for_status(&mut consumer_status, TIMEOUT, |s| {
        matches!(s, NodeStatus::Disconnected { .. })
    })
    .await
    .unwrap();
    assert_eq!(status.to_string(), "Disconnected: Peer stopped streaming");

    // The pair finds each other again and replays the scripted frames
    let received = pair.sink.wait_for_frames(6, TIMEOUT).await.unwrap();
    assert_eq!(received[3..], frames()[..]);
    assert_eq!(pair.capture.opens(), 2);
    assert_eq!(pair.capture.closes(), 1);

    pair.consumer.stop().await.unwrap();
    pair.producer.stop().await.unwrap();
    assert_eq!(pair.capture.closes(), 2);
    assert_eq!(pair.sink.closes(), 2);
}

#[tokio::test]
async fn test_sink_open_failure_ends_session_not_node() {
    let ports = PortSet::allocate();
    let producer_config = Config::from_vars(&NodeVars::loopback_producer(ports).build()).unwrap();
    let consumer_config = Config::from_vars(&NodeVars::loopback_consumer(ports).build()).unwrap();
    let capture = MockCaptureBackend::builder()
        .frames(frames())
        .then_hold()
        .build();

    let producer = RelayNode::spawn(
        producer_config,
        Arc::new(MockCaptureBackend::builder().fail_on_open().build()),
        Arc::new(RecordingSinkBackend::failing()),
    )
    .await;
    let mut producer_transitions = producer.subscribe_transitions();
    let consumer = RelayNode::spawn(
        consumer_config,
        Arc::new(capture.clone()),
        Arc::new(RecordingSinkBackend::failing()),
    )
    .await;

    let seen = collect_transitions_until(&mut producer_transitions, SessionPhase::Stopping, TIMEOUT)
        .await
        .unwrap();
    assert!(seen.contains(&SessionPhase::Streaming));

    // The producer tears the session down and advertises again
    let seen = collect_transitions_until(
        &mut producer_transitions,
        SessionPhase::Advertising,
        TIMEOUT,
    )
    .await
    .unwrap();
    assert_eq!(seen, vec![SessionPhase::Idle, SessionPhase::Advertising]);
    assert!(tokio::time::timeout(Duration::from_millis(200), producer.wait())
        .await
        .is_err());
    assert!(!matches!(producer.status(), NodeStatus::Failed { .. }));

    consumer.stop().await.unwrap();
    producer.stop().await.unwrap();
    assert_eq!(capture.opens(), capture.closes());
}
