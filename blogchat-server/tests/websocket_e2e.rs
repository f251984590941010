//! End-to-end chat scenarios against a bound server on the in-memory store.

use std::{collections::VecDeque, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use server::{
    app_state::AppState,
    auth::token::TokenVerifier,
    server::{create_app_router, create_app_state, metrics_handle, serve_with_listener},
};
use shared::config::server::Config;
use tokio::{net::TcpListener, net::TcpStream, task::JoinHandle, time::timeout};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    admin_token: String,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    async fn start(config: Config) -> Self {
        let tokens = TokenVerifier::from_config(&config.auth);
        let admin_token = tokens
            .issue(1, "moderator", "admin", chrono::Duration::minutes(30))
            .unwrap();

        let state = create_app_state(Arc::new(config), None);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve_with_listener(
            listener,
            state.clone(),
            shutdown.clone(),
        ));

        Self {
            addr,
            state,
            admin_token,
            shutdown,
            task,
        }
    }

    fn router(&self) -> Router {
        create_app_router(self.state.clone(), metrics_handle())
    }

    async fn connect(&self, query: &str) -> ChatClient {
        let url = format!("ws://{}/api/chat/ws?{query}", self.addr);
        let (socket, _) = timeout(WAIT, connect_async(url)).await.unwrap().unwrap();
        ChatClient {
            socket,
            pending: VecDeque::new(),
        }
    }

    async fn admin_post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("authorization", format!("Bearer {}", self.admin_token))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(self.router(), request).await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        send(self.router(), request).await
    }

    async fn stop(self) {
        self.shutdown.cancel();
        timeout(WAIT, self.task).await.unwrap().unwrap().unwrap();
    }
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

struct ChatClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pending: VecDeque<Value>,
}

impl ChatClient {
    /// Next server frame. Batched writes put several frames in one text
    /// message, separated by newlines.
    async fn next_frame(&mut self) -> Option<Value> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }
            let message = timeout(WAIT, self.socket.next()).await.ok()??.ok()?;
            match message {
                Message::Text(text) => {
                    for line in text.as_str().split('\n').filter(|line| !line.is_empty()) {
                        self.pending.push_back(serde_json::from_str(line).unwrap());
                    }
                }
                Message::Close(_) => return None,
                _ => {}
            }
        }
    }

    async fn expect_frame(&mut self, kind: &str) -> Value {
        loop {
            let frame = self
                .next_frame()
                .await
                .unwrap_or_else(|| panic!("socket ended while waiting for {kind}"));
            if frame["type"] == kind {
                return frame;
            }
        }
    }

    async fn say(&mut self, content: &str) {
        let frame = json!({ "type": "message", "content": content });
        self.socket
            .send(Message::Text(frame.to_string().into()))
            .await
            .unwrap();
    }

    /// Drains frames until the server closes the socket.
    async fn expect_closed(&mut self) -> Vec<Value> {
        let mut seen = Vec::new();
        while let Some(frame) = self.next_frame().await {
            seen.push(frame);
        }
        seen
    }
}

#[tokio::test]
async fn clients_exchange_messages_and_see_presence() {
    let server = TestServer::start(Config::default()).await;

    let mut alice = server.connect("username=alice").await;
    let history = alice.next_frame().await.unwrap();
    assert_eq!(history["type"], "history");
    assert_eq!(history["data"], json!([]));
    let roster = alice.next_frame().await.unwrap();
    assert_eq!(roster["type"], "user_list");
    assert!(roster["timestamp"].is_i64());

    let mut bob = server.connect("username=bob").await;
    assert_eq!(bob.next_frame().await.unwrap()["type"], "history");
    let roster = bob.expect_frame("user_list").await;
    assert_eq!(roster["data"].as_array().unwrap().len(), 2);
    // Alice first sees her own join, then Bob's.
    let own = alice.expect_frame("user_join").await;
    assert_eq!(own["data"]["username"], "alice");
    let joined = alice.expect_frame("user_join").await;
    assert_eq!(joined["data"]["username"], "bob");

    alice.say("  hello bob  ").await;
    let to_bob = bob.expect_frame("message").await;
    let to_alice = alice.expect_frame("message").await;
    assert_eq!(to_bob["data"]["content"], "hello bob");
    assert_eq!(to_bob["data"]["username"], "alice");
    assert!(to_bob["data"].get("ip").is_none());
    assert_eq!(to_bob["data"]["id"], to_alice["data"]["id"]);

    let (status, body) = server.get("/api/chat/messages").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["list"][0]["id"], to_bob["data"]["id"]);

    let (_, online) = server.get("/api/chat/online").await;
    assert_eq!(online["data"]["online_count"], 2);

    bob.socket.close(None).await.unwrap();
    let left = alice.expect_frame("user_leave").await;
    assert_eq!(left["data"]["username"], "bob");

    server.stop().await;
}

#[tokio::test]
async fn kicked_client_gets_notice_then_close() {
    let server = TestServer::start(Config::default()).await;

    let mut victim = server.connect("username=victim").await;
    let roster = victim.expect_frame("user_list").await;
    let client_id = roster["data"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = server
        .admin_post("/api/admin/chat/kick", json!({ "client_id": client_id }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 200);

    let frames = victim.expect_closed().await;
    let kick = frames
        .iter()
        .find(|frame| frame["type"] == "kick")
        .expect("kick frame before close");
    assert_eq!(kick["data"]["reason"], "violated chat rules");

    let (status, _) = server
        .admin_post("/api/admin/chat/kick", json!({ "client_id": client_id }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn announcement_only_broadcast_skips_the_chat() {
    let server = TestServer::start(Config::default()).await;
    let mut reader = server.connect("username=reader").await;
    reader.expect_frame("user_list").await;

    let (status, body) = server
        .admin_post(
            "/api/admin/chat/broadcast",
            json!({ "content": "site maintenance tonight", "target": "announcement", "priority": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["is_broadcast"], true);

    let (status, body) = server
        .admin_post(
            "/api/admin/chat/broadcast",
            json!({ "content": "welcome everyone", "target": "chat" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let chat_id = body["data"]["id"].clone();

    // The first system frame the reader sees is the chat broadcast.
    let system = reader.expect_frame("system").await;
    assert_eq!(system["data"]["id"], chat_id);
    assert_eq!(system["data"]["content"], "welcome everyone");

    let (_, announcements) = server.get("/api/blog/announcements").await;
    let list = announcements["data"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["content"], "site maintenance tonight");
    assert_eq!(list[0]["priority"], 1);

    server.stop().await;
}

#[tokio::test]
async fn moderator_ban_kicks_and_blocks_reconnects() {
    let mut config = Config::default();
    config.ip_guard.count_loopback = true;
    let server = TestServer::start(config).await;

    let mut troll = server.connect("username=troll").await;
    let roster = troll.expect_frame("user_list").await;
    let client_id = roster["data"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = server
        .admin_post(
            "/api/admin/chat/ban",
            json!({ "client_id": client_id, "reason": "spam", "duration": 2 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ip"], "127.0.0.1");

    let frames = troll.expect_closed().await;
    assert!(frames.iter().any(|frame| frame["type"] == "kick"));

    let url = format!("ws://{}/api/chat/ws?username=troll", server.addr);
    let refused = timeout(WAIT, connect_async(url)).await.unwrap();
    assert!(refused.is_err(), "banned address must not upgrade");

    let (status, body) = server.get("/api/chat/messages").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["details"]["reason"], "spam");

    server.stop().await;
}

#[tokio::test]
async fn request_flood_is_auto_banned() {
    let mut config = Config::default();
    config.ip_guard.count_loopback = true;
    config.ip_guard.max_per_minute = 5;
    let server = TestServer::start(config).await;

    for _ in 0..5 {
        let (status, _) = server.get("/api/chat/online").await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _) = server.get("/api/chat/online").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let (status, body) = server.get("/api/chat/online").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 403);

    server.stop().await;
}
