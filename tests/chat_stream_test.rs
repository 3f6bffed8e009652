//! Integration tests for the chat stream endpoint.
//!
//! Runs a real server on an ephemeral port with an instant timer and talks
//! to it over TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use inventing_chat::backend::create_backends;
use inventing_chat::client::ChatClient;
use inventing_chat::config::{ClientConfig, Config};
use inventing_chat::error::StreamError;
use inventing_chat::server::{router, AppState, HttpListener};
use inventing_chat::shutdown::ShutdownCoordinator;
use inventing_chat::streaming::{Frame, FrameDecoder, InstantTimer};

struct TestServer {
    addr: SocketAddr,
    shutdown: ShutdownCoordinator,
    timer: Arc<InstantTimer>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let mut config = Config::default();
        config.server.listen_addr = "127.0.0.1:0".to_string();

        let shutdown = ShutdownCoordinator::new();
        let timer = Arc::new(InstantTimer::new());
        let state = AppState::new(
            &config,
            create_backends(&config),
            timer.clone(),
            shutdown.clone(),
        )
        .unwrap();
        let app = router(state, config.server.max_body_bytes);

        let listener = HttpListener::bind(&config.server, shutdown.clone())
            .await
            .unwrap();
        let addr = listener.local_addr();
        let handle = tokio::spawn(listener.serve(app));

        Self {
            addr,
            shutdown,
            timer,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn client(&self) -> ChatClient {
        ChatClient::new(&ClientConfig {
            base_url: format!("http://{}", self.addr),
            silence_timeout_secs: 5,
        })
        .unwrap()
    }
}

fn no_cancel() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}

fn chunks(frames: &[Frame]) -> Vec<&str> {
    frames
        .iter()
        .filter_map(|f| match f {
            Frame::Chunk { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

async fn post_chat(server: &TestServer, body: serde_json::Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(server.url("/api/chat"))
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_hello_stream_over_http() {
    let server = TestServer::start().await;

    let response = post_chat(&server, serde_json::json!({ "message": "hello" })).await;

    assert_eq!(response.status(), 200);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache");
    assert_eq!(headers["connection"], "keep-alive");
    assert_eq!(headers["x-accel-buffering"], "no");

    let body = response.bytes().await.unwrap();
    let mut decoder = FrameDecoder::new();
    let frames = decoder.push(&body);
    assert_eq!(decoder.finish(), 0);

    assert!(matches!(frames.first(), Some(Frame::Start { id }) if !id.is_empty()));
    assert_eq!(frames.last(), Some(&Frame::End));
    assert_eq!(frames.len(), 14 + 2);
    assert_eq!(
        chunks(&frames),
        vec![
            "Hello", "! ", "Welcome", " to ", "Inventing", " Chat", ". ", "How", " can", " I ",
            "help", " you", " today", "?",
        ]
    );
    assert_eq!(
        chunks(&frames).concat(),
        "Hello! Welcome to Inventing Chat. How can I help you today?"
    );

    // Thinking delay, then one fragment delay per chunk.
    let requested = server.timer.requested();
    assert_eq!(requested[0], Duration::from_millis(500));
    assert_eq!(requested.len(), 15);
}

#[tokio::test]
async fn test_client_reassembles_joke() {
    let server = TestServer::start().await;

    let mut chunks = 0;
    let state = server
        .client()
        .send("Tell me a JOKE", no_cancel(), |frame, _| {
            if matches!(frame, Frame::Chunk { .. }) {
                chunks += 1;
            }
        })
        .await
        .unwrap();

    assert_eq!(
        state.text,
        "Why don't scientists trust atoms? Because they make up everything! \u{1F604}"
    );
    assert_eq!(chunks, 14);
    assert!(!state.is_streaming);
    assert!(state.session_id.is_some());
}

#[tokio::test]
async fn test_fallback_reply() {
    let server = TestServer::start().await;

    let state = server
        .client()
        .send("quantum chromodynamics", no_cancel(), |_, _| {})
        .await
        .unwrap();
    assert!(state.text.starts_with("That's an interesting question!"));
}

#[tokio::test]
async fn test_whitespace_message_streams_fallback() {
    let server = TestServer::start().await;

    let response = post_chat(&server, serde_json::json!({ "message": "   " })).await;
    assert_eq!(response.status(), 200);

    let body = response.bytes().await.unwrap();
    let frames = FrameDecoder::new().push(&body);
    assert_eq!(frames.last(), Some(&Frame::End));
    assert!(chunks(&frames)
        .concat()
        .starts_with("That's an interesting question!"));
}

#[tokio::test]
async fn test_session_ids_differ() {
    let server = TestServer::start().await;
    let client = server.client();

    let (a, b) = tokio::join!(
        client.send("hi", no_cancel(), |_, _| {}),
        client.send("hi", no_cancel(), |_, _| {}),
    );
    assert_ne!(a.unwrap().session_id, b.unwrap().session_id);
}

#[tokio::test]
async fn test_empty_message_is_rejected_without_stream() {
    let server = TestServer::start().await;

    for body in [serde_json::json!({ "message": "" }), serde_json::json!({})] {
        let response = post_chat(&server, body).await;
        assert_eq!(response.status(), 400);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("application/json"));
        let json: serde_json::Value = response.json().await.unwrap();
        assert_eq!(json["error"], "Message is required");
    }

    // Rejected requests never reach the timer.
    assert!(server.timer.requested().is_empty());
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let server = TestServer::start().await;

    let response = reqwest::Client::new()
        .post(server.url("/api/chat"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["error"], "Invalid JSON body");
}

#[tokio::test]
async fn test_client_surfaces_error_envelope() {
    let server = TestServer::start().await;

    let err = server
        .client()
        .send("", no_cancel(), |_, _| {})
        .await
        .unwrap_err();
    assert!(matches!(
        err.error,
        StreamError::Status { status: 400, ref message } if message == "Message is required"
    ));
    assert!(!err.state.is_streaming);
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start().await;

    let json: serde_json::Value = reqwest::get(server.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_shutdown_stops_accept_loop() {
    let server = TestServer::start().await;
    server.shutdown.shutdown();

    tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .expect("accept loop exits")
        .unwrap();
    assert_eq!(server.shutdown.active_sessions(), 0);
}
