//! Unit tests for the discovery client against a local HTTP responder.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use super::*;

/// Serves a single canned HTTP response and reports the request line.
async fn serve_once(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut buf = vec![0_u8; 4096];
        let read = socket.read(&mut buf).await.expect("read request");
        let request = String::from_utf8_lossy(buf.get(..read).unwrap_or_default()).into_owned();
        let first_line = request.lines().next().unwrap_or_default().to_owned();
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket
            .write_all(response.as_bytes())
            .await
            .expect("write response");
        tx.send(first_line).ok();
    });
    (format!("http://{addr}/new"), rx)
}

#[tokio::test]
async fn new_url_requests_cluster_size_and_trims_body() {
    let (endpoint, request) = serve_once("200 OK", "https://discovery.test/abc123\n").await;

    let url = DiscoveryClient::new(endpoint)
        .new_url(3)
        .await
        .expect("discovery url");

    assert_eq!(url, "https://discovery.test/abc123");
    let line = request.await.expect("request line");
    assert!(line.starts_with("GET /new?size=3 "), "request: {line}");
}

#[tokio::test]
async fn error_status_is_reported() {
    let (endpoint, _request) = serve_once("503 Service Unavailable", "").await;

    let err = DiscoveryClient::new(endpoint.clone())
        .new_url(1)
        .await
        .expect_err("503 should fail");

    assert_eq!(err, DiscoveryError::Status { endpoint, status: 503 });
}

#[tokio::test]
async fn non_url_body_is_rejected() {
    let (endpoint, _request) = serve_once("200 OK", "size must be a number").await;

    let err = DiscoveryClient::new(endpoint)
        .new_url(1)
        .await
        .expect_err("body is not a url");

    assert!(matches!(err, DiscoveryError::InvalidBody { .. }), "unexpected: {err}");
}

#[tokio::test]
async fn unreachable_service_is_a_request_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let err = DiscoveryClient::new(format!("http://{addr}/new"))
        .new_url(1)
        .await
        .expect_err("nothing listens");

    assert!(matches!(err, DiscoveryError::Request { .. }), "unexpected: {err}");
}
