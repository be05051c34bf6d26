use std::sync::Arc;
use std::time::Duration;

use wsingest_metrics::{FieldValue, InfluxParser, JsonParser, Metric, MetricParser};
use wsingest_server::{InputState, Target, WebSocketInput};
use wsingest_test::{Accumulator, MockServer};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn start_input(
    server: &MockServer,
    parser: Arc<dyn MetricParser>,
) -> (WebSocketInput, Arc<Accumulator>) {
    let target = Target::Client(server.url().parse().unwrap());
    let sink = Accumulator::new();

    let mut input = WebSocketInput::new(target, parser);
    input.start(sink.clone()).await.unwrap();
    assert!(server.wait_connected(TIMEOUT).await);

    (input, sink)
}

#[tokio::test]
async fn test_forward_line_protocol() {
    wsingest_test::setup();

    let server = MockServer::start("/telegraf").await;
    let (mut input, sink) = start_input(&server, Arc::new(InfluxParser::new())).await;
    assert_eq!(server.request_path().as_deref(), Some("/telegraf"));

    server.send("metric,tag=a value=1 1000000000");
    assert!(sink.wait_for(1, TIMEOUT).await);

    let expected = Metric::new("metric", 1_000_000_000)
        .with_tag("tag", "a")
        .with_field("value", 1.0);
    similar_asserts::assert_eq!(sink.metrics(), vec![expected]);

    input.stop().await;
    assert_eq!(input.state(), InputState::Stopped);
    assert!(server.wait_disconnected(TIMEOUT).await);
}

#[tokio::test]
async fn test_preserve_order() {
    wsingest_test::setup();

    let server = MockServer::start("/").await;
    let (mut input, sink) = start_input(&server, Arc::new(InfluxParser::new())).await;

    for i in 0..50 {
        server.send(format!("seq value={i}i {i}"));
    }

    assert!(sink.wait_for(50, TIMEOUT).await);
    let values: Vec<_> = sink
        .metrics()
        .into_iter()
        .map(|metric| metric.fields["value"].clone())
        .collect();
    let expected: Vec<_> = (0..50).map(FieldValue::Integer).collect();
    assert_eq!(values, expected);

    input.stop().await;
}

#[tokio::test]
async fn test_multiple_lines_per_message() {
    wsingest_test::setup();

    let server = MockServer::start("/").await;
    let (mut input, sink) = start_input(&server, Arc::new(InfluxParser::new())).await;

    server.send("# comment\ncpu value=1 1\r\n\nmem value=2 2\n");
    assert!(sink.wait_for(2, TIMEOUT).await);

    let names: Vec<_> = sink.metrics().into_iter().map(|m| m.name).collect();
    assert_eq!(names, ["cpu", "mem"]);
    assert_eq!(input.stats().messages(), 1);

    input.stop().await;
}

#[tokio::test]
async fn test_malformed_message_is_isolated() {
    wsingest_test::setup();

    let server = MockServer::start("/").await;
    let (mut input, sink) = start_input(&server, Arc::new(InfluxParser::new())).await;

    server.send("first value=1 1");
    // The whole message is dropped if any line fails.
    server.send("ok value=2 2\nbroken");
    server.send("last value=3 3");

    assert!(sink.wait_for(2, TIMEOUT).await);
    let names: Vec<_> = sink.metrics().into_iter().map(|m| m.name).collect();
    assert_eq!(names, ["first", "last"]);
    assert_eq!(input.stats().parse_failures(), 1);
    assert_eq!(input.state(), InputState::Running);

    input.stop().await;
}

#[tokio::test]
async fn test_binary_frames_skipped() {
    wsingest_test::setup();

    let server = MockServer::start("/").await;
    let (mut input, sink) = start_input(&server, Arc::new(InfluxParser::new())).await;

    server.send_binary(b"cpu value=1 1".to_vec());
    server.send("mem value=2 2");

    assert!(sink.wait_for(1, TIMEOUT).await);
    let names: Vec<_> = sink.metrics().into_iter().map(|m| m.name).collect();
    assert_eq!(names, ["mem"]);
    assert_eq!(input.stats().messages(), 1);

    input.stop().await;
}

#[tokio::test]
async fn test_json_format() {
    wsingest_test::setup();

    let server = MockServer::start("/").await;
    let (mut input, sink) = start_input(&server, Arc::new(JsonParser::new())).await;

    server.send(
        r#"[
            {"name": "a", "fields": {"v": 1}, "timestamp": 1},
            {"name": "b", "tags": {"host": "x"}, "fields": {"v": true}, "timestamp": 2}
        ]"#,
    );
    assert!(sink.wait_for(2, TIMEOUT).await);

    let expected = vec![
        Metric::new("a", 1).with_field("v", FieldValue::Integer(1)),
        Metric::new("b", 2)
            .with_tag("host", "x")
            .with_field("v", true),
    ];
    similar_asserts::assert_eq!(sink.metrics(), expected);

    input.stop().await;
}

#[tokio::test]
async fn test_sink_rejection_continues() {
    wsingest_test::setup();

    let server = MockServer::start("/").await;
    let (mut input, sink) = start_input(&server, Arc::new(InfluxParser::new())).await;
    sink.reject("dropped");

    server.send("dropped value=1 1\nkept value=2 2");
    server.send("kept value=3 3");

    assert!(sink.wait_for(2, TIMEOUT).await);
    assert_eq!(input.stats().sink_failures(), 1);
    assert_eq!(input.stats().metrics(), 2);

    input.stop().await;
}

#[tokio::test]
async fn test_peer_close_finishes_ingestion() {
    wsingest_test::setup();

    let server = MockServer::start("/").await;
    let (mut input, sink) = start_input(&server, Arc::new(InfluxParser::new())).await;

    server.send("cpu value=1 1");
    server.close();

    tokio::time::timeout(TIMEOUT, input.finished()).await.unwrap();
    assert!(input.is_finished());
    assert_eq!(sink.len(), 1);

    // The input stays running until it is stopped explicitly.
    assert_eq!(input.state(), InputState::Running);
    input.stop().await;
    assert_eq!(input.state(), InputState::Stopped);
}

#[tokio::test]
async fn test_transport_fault_finishes_ingestion() {
    wsingest_test::setup();

    let server = MockServer::start("/").await;
    let (mut input, sink) = start_input(&server, Arc::new(InfluxParser::new())).await;

    server.send("cpu value=1 1");
    assert!(sink.wait_for(1, TIMEOUT).await);

    // The peer disappears without a close handshake.
    drop(server);

    tokio::time::timeout(TIMEOUT, input.finished()).await.unwrap();
    assert!(input.is_finished());
    assert_eq!(input.state(), InputState::Running);
    assert_eq!(input.stats().messages(), 1);

    tokio::time::timeout(TIMEOUT, input.stop()).await.unwrap();
    assert_eq!(input.state(), InputState::Stopped);
}
