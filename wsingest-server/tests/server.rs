use std::sync::Arc;
use std::time::Duration;

use wsingest_metrics::{InfluxParser, Metric};
use wsingest_server::{InputState, Target, WebSocketInput};
use wsingest_test::{Accumulator, MockClient};

const TIMEOUT: Duration = Duration::from_secs(5);

async fn start_input(path: &str) -> (WebSocketInput, Arc<Accumulator>, String) {
    let target = Target::Server {
        addr: "127.0.0.1:0".parse().unwrap(),
        path: path.to_owned(),
    };
    let sink = Accumulator::new();

    let mut input = WebSocketInput::new(target, Arc::new(InfluxParser::new()));
    input.start(sink.clone()).await.unwrap();

    let addr = input.local_addr().unwrap();
    (input, sink, format!("ws://{addr}{path}"))
}

#[tokio::test]
async fn test_accept_peer() {
    wsingest_test::setup();

    let (mut input, sink, url) = start_input("/watch").await;
    let mut client = MockClient::connect_timeout(&url, TIMEOUT).await.unwrap();

    client.send_text("cpu,host=a load=0.5 10").await.unwrap();
    assert!(sink.wait_for(1, TIMEOUT).await);

    let expected = Metric::new("cpu", 10)
        .with_tag("host", "a")
        .with_field("load", 0.5);
    similar_asserts::assert_eq!(sink.metrics(), vec![expected]);

    input.stop().await;
    assert!(client.wait_closed(TIMEOUT).await);
}

#[tokio::test]
async fn test_reject_second_peer() {
    wsingest_test::setup();

    let (mut input, sink, url) = start_input("/watch").await;
    let mut first = MockClient::connect_timeout(&url, TIMEOUT).await.unwrap();

    let error = MockClient::connect(&url).await.err().unwrap();
    assert!(error.to_string().contains("409"), "{error}");

    // The first peer is unaffected.
    first.send_text("cpu value=1 1").await.unwrap();
    assert!(sink.wait_for(1, TIMEOUT).await);

    input.stop().await;
}

#[tokio::test]
async fn test_unknown_path() {
    wsingest_test::setup();

    let (mut input, _sink, url) = start_input("/watch").await;
    let url = url.replace("/watch", "/other");

    let error = MockClient::connect(&url).await.err().unwrap();
    assert!(error.to_string().contains("404"), "{error}");

    input.stop().await;
}

#[tokio::test]
async fn test_peer_close() {
    wsingest_test::setup();

    let (mut input, sink, url) = start_input("/watch").await;
    let mut client = MockClient::connect_timeout(&url, TIMEOUT).await.unwrap();

    client.send_text("cpu value=1 1").await.unwrap();
    assert!(sink.wait_for(1, TIMEOUT).await);
    client.close().await.unwrap();

    tokio::time::timeout(TIMEOUT, input.finished()).await.unwrap();
    assert_eq!(input.state(), InputState::Running);

    input.stop().await;
    assert_eq!(input.state(), InputState::Stopped);
}

#[tokio::test]
async fn test_stop_without_peer() {
    wsingest_test::setup();

    let (mut input, _sink, url) = start_input("/watch").await;

    tokio::time::timeout(TIMEOUT, input.stop()).await.unwrap();
    assert!(input.is_finished());

    // The listener is released.
    assert!(MockClient::connect(&url).await.is_err());
}
