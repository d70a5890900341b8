//! End-to-end tests using a real WebSocket client against the full router.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_gateway::backend::{BackendError, FragmentStream, GenerationBackend};
use chat_gateway::config::Config;
use chat_gateway::gateway::{Gateway, GatewayOptions};
use chat_gateway::session::{
    BACKEND_FAILURE_MESSAGE, INVALID_REQUEST_MESSAGE, MALFORMED_INPUT_MESSAGE,
};
use chat_gateway::state::AppState;
use chat_protocol::{ResponseFrame, Status};
use clap::Parser;
use futures::{stream, SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

// ── Mock backend ──

/// Splits the prompt on spaces and yields each word (with its trailing
/// space) as a fragment, yielding to the scheduler in between so that
/// concurrent connections interleave. A prompt of `fail` yields one
/// fragment and then fails.
struct WordBackend;

#[async_trait]
impl GenerationBackend for WordBackend {
    async fn generate(&self, prompt: &str) -> Result<FragmentStream, BackendError> {
        if prompt == "fail" {
            let items = vec![
                Ok("partial".to_owned()),
                Err(BackendError::Generation("model crashed".into())),
            ];
            return Ok(stream::iter(items).boxed());
        }

        let words: Vec<String> = prompt.split_inclusive(' ').map(str::to_owned).collect();
        let fragments = stream::iter(words).then(|word| async move {
            tokio::task::yield_now().await;
            Ok::<_, BackendError>(word)
        });
        Ok(fragments.boxed())
    }

    async fn health(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        "words"
    }

    fn provider(&self) -> &str {
        "mock"
    }
}

// ── Helpers ──

async fn boot() -> (String, Gateway) {
    let gateway = Gateway::new(Arc::new(WordBackend), GatewayOptions::default());
    let config = Config::parse_from(["chat-gateway", "--host", "127.0.0.1", "--port", "0"]);
    let app = chat_gateway::router(AppState::new(gateway.clone(), config));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("{addr}"), gateway)
}

async fn connect(addr: &str) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

async fn send(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn recv(ws: &mut WsStream) -> ResponseFrame {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn recv_cycle(ws: &mut WsStream) -> Vec<ResponseFrame> {
    let mut frames = Vec::new();
    loop {
        let frame = recv(ws).await;
        let terminal = frame.is_terminal();
        frames.push(frame);
        if terminal {
            return frames;
        }
    }
}

async fn wait_for_count(gateway: &Gateway, expected: usize) {
    timeout(TIMEOUT, async {
        while gateway.connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("connection count never reached {expected}"));
}

fn text_of(frame: &ResponseFrame) -> Option<&str> {
    match frame {
        ResponseFrame::Received { assistant_msg, .. }
        | ResponseFrame::Stream { assistant_msg, .. }
        | ResponseFrame::Error { assistant_msg, .. } => Some(assistant_msg),
        ResponseFrame::End { .. } => None,
    }
}

fn user_msg_id_of(frame: &ResponseFrame) -> Option<&str> {
    match frame {
        ResponseFrame::Received { user_msg_id, .. }
        | ResponseFrame::Stream { user_msg_id, .. }
        | ResponseFrame::End { user_msg_id, .. } => Some(user_msg_id),
        ResponseFrame::Error { user_msg_id, .. } => user_msg_id.as_deref(),
    }
}

// ── Tests ──

#[tokio::test]
async fn streams_reply_for_valid_request() {
    let (addr, _gateway) = boot().await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"userMsgId": "abc123", "userMsg": "Hi there"})).await;
    let frames = recv_cycle(&mut ws).await;

    let statuses: Vec<Status> = frames.iter().map(ResponseFrame::status).collect();
    assert_eq!(
        statuses,
        vec![
            Status::MsgReceived,
            Status::ResponseStream,
            Status::ResponseStream,
            Status::End
        ]
    );
    assert_eq!(text_of(&frames[0]), Some("Hi there"));
    assert_eq!(text_of(&frames[1]), Some("Hi "));
    assert_eq!(text_of(&frames[2]), Some("there"));
    let id = frames[0].assistant_msg_id();
    assert!(frames.iter().all(|f| f.assistant_msg_id() == id));
    assert!(frames.iter().all(|f| user_msg_id_of(f) == Some("abc123")));
}

#[tokio::test]
async fn wire_format_omits_absent_fields() {
    let (addr, _gateway) = boot().await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"userMsgId": "abc123", "userMsg": "hello"})).await;
    let mut raw = Vec::new();
    while raw.len() < 3 {
        if let Message::Text(text) = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap() {
            raw.push(serde_json::from_str::<Value>(text.as_str()).unwrap());
        }
    }

    let id = raw[0]["assistantMsgId"].as_str().unwrap().to_owned();
    assert_eq!(
        raw[0],
        json!({
            "status": "msg-received",
            "role": "assistant",
            "userMsgId": "abc123",
            "assistantMsgId": id,
            "assistantMsg": "hello",
        })
    );
    assert_eq!(raw[1]["status"], "response-stream");
    assert_eq!(
        raw[2],
        json!({
            "status": "end",
            "role": "assistant",
            "userMsgId": "abc123",
            "assistantMsgId": id,
        })
    );
}

#[tokio::test]
async fn short_id_gets_single_error_and_stays_open() {
    let (addr, _gateway) = boot().await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"userMsgId": "x", "userMsg": "hi"})).await;
    assert_eq!(recv(&mut ws).await, ResponseFrame::error(INVALID_REQUEST_MESSAGE));

    send(&mut ws, json!({"userMsgId": "abc123", "userMsg": "hi"})).await;
    let frames = recv_cycle(&mut ws).await;
    assert_eq!(frames[0].status(), Status::MsgReceived);
    assert_eq!(frames.last().map(ResponseFrame::status), Some(Status::End));
}

#[tokio::test]
async fn malformed_json_gets_error_and_stays_open() {
    let (addr, gateway) = boot().await;
    let mut ws = connect(&addr).await;

    ws.send(Message::Text("{not json".to_owned().into())).await.unwrap();
    assert_eq!(recv(&mut ws).await, ResponseFrame::error(MALFORMED_INPUT_MESSAGE));
    assert_eq!(gateway.connection_count(), 1);

    ws.send(Message::Binary(br#"{"userMsgId":"abc123","userMsg":"bin"}"#.to_vec().into()))
        .await
        .unwrap();
    let frames = recv_cycle(&mut ws).await;
    assert_eq!(frames.len(), 3);
}

#[tokio::test]
async fn backend_failure_mid_stream() {
    let (addr, _gateway) = boot().await;
    let mut ws = connect(&addr).await;

    send(&mut ws, json!({"userMsgId": "abc123", "userMsg": "fail"})).await;
    let frames = recv_cycle(&mut ws).await;
    let statuses: Vec<Status> = frames.iter().map(ResponseFrame::status).collect();
    assert_eq!(
        statuses,
        vec![Status::MsgReceived, Status::ResponseStream, Status::Error]
    );
    assert_eq!(text_of(&frames[2]), Some(BACKEND_FAILURE_MESSAGE));
    assert_eq!(user_msg_id_of(&frames[2]), Some("abc123"));

    // No `end` follows the error; the next frame belongs to the next request.
    send(&mut ws, json!({"userMsgId": "abc124", "userMsg": "ok"})).await;
    let next = recv(&mut ws).await;
    assert_eq!(next.status(), Status::MsgReceived);
    assert_eq!(user_msg_id_of(&next), Some("abc124"));
}

#[tokio::test]
async fn registry_tracks_connection_lifetime() {
    let (addr, gateway) = boot().await;

    let mut a = connect(&addr).await;
    let b = connect(&addr).await;
    wait_for_count(&gateway, 2).await;

    a.close(None).await.unwrap();
    wait_for_count(&gateway, 1).await;

    // Abrupt drop, no close handshake.
    drop(b);
    wait_for_count(&gateway, 0).await;
}

#[tokio::test]
async fn concurrent_connections_see_only_their_own_frames() {
    const CONNECTIONS: usize = 8;
    const REQUESTS: usize = 5;

    let (addr, gateway) = boot().await;

    let clients = (0..CONNECTIONS).map(|c| {
        let addr = addr.clone();
        tokio::spawn(async move {
            let mut ws = connect(&addr).await;
            for r in 0..REQUESTS {
                let user_msg_id = format!("conn{c:02}-req{r:02}");
                let prompt = format!("c{c} r{r} three four");
                send(&mut ws, json!({"userMsgId": user_msg_id, "userMsg": prompt})).await;

                let frames = recv_cycle(&mut ws).await;
                assert!(frames.iter().all(|f| user_msg_id_of(f) == Some(user_msg_id.as_str())));

                let streamed: String = frames
                    .iter()
                    .filter(|f| f.status() == Status::ResponseStream)
                    .filter_map(text_of)
                    .collect();
                assert_eq!(streamed, prompt);
                assert_eq!(frames.last().map(ResponseFrame::status), Some(Status::End));
            }
            ws.close(None).await.unwrap();
        })
    });

    for client in futures::future::join_all(clients).await {
        client.unwrap();
    }
    wait_for_count(&gateway, 0).await;
}

#[tokio::test]
async fn broadcast_reaches_connected_clients() {
    let (addr, gateway) = boot().await;
    let mut a = connect(&addr).await;
    let mut b = connect(&addr).await;
    wait_for_count(&gateway, 2).await;

    let notice = ResponseFrame::error("server restarting soon");
    assert_eq!(gateway.broadcast(&notice), 2);
    assert_eq!(recv(&mut a).await, notice);
    assert_eq!(recv(&mut b).await, notice);
}

#[tokio::test]
async fn shutdown_closes_connections() {
    let (addr, gateway) = boot().await;
    let mut ws = connect(&addr).await;
    wait_for_count(&gateway, 1).await;

    gateway.shutdown();
    wait_for_count(&gateway, 0).await;

    let closed = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn health_and_metrics_endpoints() {
    let (addr, gateway) = boot().await;
    let _ws = connect(&addr).await;
    wait_for_count(&gateway, 1).await;

    let health: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["model"], "words");

    let metrics: Value = reqwest::get(format!("http://{addr}/metrics"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["active_connections"], 1);
    assert_eq!(metrics["model_info"]["provider"], "mock");
    assert_eq!(metrics["model_info"]["is_healthy"], true);
    assert_eq!(metrics["config"]["host"], "127.0.0.1");
}
