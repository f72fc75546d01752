//! Shared fixtures: a scripted HTTP server and a scripted DingTalk bridge.

#![allow(dead_code)]

use dash_storage::MemoryStorage;
use dingtalk_auth::{
    AuthCodeCallback, AuthCodeResult, AuthorizationState, BridgeConfig, BridgeError,
    DingTalkBridge, DingTalkHandshake, ErrorCallback, HostEnvironment, ReadyCallback,
    SessionStore,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use url::Url;

pub const SIGN_PATH: &str = "/api/auth/dingtalk/jsapi-sign";
pub const LOGIN_PATH: &str = "/api/auth/dingtalk/login";
pub const ME_PATH: &str = "/api/auth/me";
pub const REFRESH_USER_PATH: &str = "/api/auth/dingtalk/refresh-user";

// ========================================
// Scripted HTTP server
// ========================================

/// Canned response for one route.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub headers: Vec<(String, String)>,
    pub delay: Option<Duration>,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self::raw(status, &body.to_string())
    }

    pub fn raw(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            delay: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A request as the server received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

type Routes = Arc<Mutex<HashMap<(String, String), Reply>>>;

pub struct MockServer {
    addr: SocketAddr,
    routes: Routes,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let handle = tokio::spawn({
            let routes = routes.clone();
            let requests = requests.clone();
            async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        break;
                    };
                    let routes = routes.clone();
                    let requests = requests.clone();
                    tokio::spawn(async move {
                        let _ = handle_connection(socket, routes, requests).await;
                    });
                }
            }
        });

        Self {
            addr,
            routes,
            requests,
            handle,
        }
    }

    pub fn route(&self, method: &str, path: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), reply);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    pub fn origin(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Absolute API base on this server.
    pub fn base_url(&self) -> String {
        format!("{}/api", self.origin())
    }

    /// A dashboard page URL served from this server's origin.
    pub fn page_url(&self, suffix: &str) -> Url {
        Url::parse(&format!("{}{}", self.origin(), suffix)).unwrap()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    routes: Routes,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) -> std::io::Result<()> {
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default();
    let path = target.split('?').next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    requests.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    let reply = routes
        .lock()
        .unwrap()
        .get(&(method, path))
        .cloned()
        .unwrap_or_else(|| Reply::json(404, json!({ "message": "not found" })));

    if let Some(delay) = reply.delay {
        tokio::time::sleep(delay).await;
    }

    let mut response = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        reply.status,
        reason(reply.status),
        reply.body.len()
    );
    for (name, value) in &reply.headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str("\r\n");
    response.push_str(&reply.body);

    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Status",
    }
}

// ========================================
// Scripted bridge
// ========================================

#[derive(Debug, Clone)]
pub enum ConfigBehavior {
    Ready,
    Error(String),
    /// Keep both callbacks without ever calling them.
    Never,
    /// Drop both callbacks without calling them.
    Drop,
    ReadyThenError,
}

#[derive(Debug, Clone)]
pub enum CodeBehavior {
    Success(AuthCodeResult),
    Fail(String),
    Never,
}

pub struct FakeBridge {
    config: ConfigBehavior,
    code: CodeBehavior,
    calls: Mutex<Vec<&'static str>>,
    configs: Mutex<Vec<BridgeConfig>>,
    corp_ids: Mutex<Vec<String>>,
    parked_ready: Mutex<Vec<ReadyCallback>>,
    parked_errors: Mutex<Vec<ErrorCallback>>,
    parked_codes: Mutex<Vec<AuthCodeCallback>>,
}

impl FakeBridge {
    pub fn new(config: ConfigBehavior, code: CodeBehavior) -> Self {
        Self {
            config,
            code,
            calls: Mutex::new(Vec::new()),
            configs: Mutex::new(Vec::new()),
            corp_ids: Mutex::new(Vec::new()),
            parked_ready: Mutex::new(Vec::new()),
            parked_errors: Mutex::new(Vec::new()),
            parked_codes: Mutex::new(Vec::new()),
        }
    }

    /// Bridge that configures and hands out `code`.
    pub fn happy(code: &str) -> Self {
        Self::new(
            ConfigBehavior::Ready,
            CodeBehavior::Success(AuthCodeResult::with_code(code)),
        )
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn configs(&self) -> Vec<BridgeConfig> {
        self.configs.lock().unwrap().clone()
    }

    pub fn corp_ids(&self) -> Vec<String> {
        self.corp_ids.lock().unwrap().clone()
    }
}

impl DingTalkBridge for FakeBridge {
    fn config(&self, options: BridgeConfig, on_ready: ReadyCallback, on_error: ErrorCallback) {
        self.calls.lock().unwrap().push("config");
        self.configs.lock().unwrap().push(options);
        match &self.config {
            ConfigBehavior::Ready => on_ready(),
            ConfigBehavior::Error(message) => on_error(BridgeError::rejected(message.clone())),
            ConfigBehavior::Never => {
                self.parked_ready.lock().unwrap().push(on_ready);
                self.parked_errors.lock().unwrap().push(on_error);
            }
            ConfigBehavior::Drop => {}
            ConfigBehavior::ReadyThenError => {
                on_ready();
                on_error(BridgeError::rejected("late error"));
            }
        }
    }

    fn request_auth_code(&self, corp_id: &str, on_success: AuthCodeCallback, on_fail: ErrorCallback) {
        self.calls.lock().unwrap().push("request_auth_code");
        self.corp_ids.lock().unwrap().push(corp_id.to_string());
        match &self.code {
            CodeBehavior::Success(result) => on_success(result.clone()),
            CodeBehavior::Fail(message) => on_fail(BridgeError::rejected(message.clone())),
            CodeBehavior::Never => {
                self.parked_codes.lock().unwrap().push(on_success);
                self.parked_errors.lock().unwrap().push(on_fail);
            }
        }
    }
}

// ========================================
// Wiring helpers
// ========================================

pub fn sign_body() -> Value {
    json!({ "corpId": "C1", "timeStamp": 1, "nonceStr": "n", "signature": "s" })
}

pub fn login_body() -> Value {
    json!({ "token": "T1", "user": { "id": 7 } })
}

pub fn session_store() -> Arc<SessionStore> {
    Arc::new(SessionStore::new(
        Box::new(MemoryStorage::new()),
        Arc::new(AuthorizationState::new()),
    ))
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Handshake using the relative `/api` base, resolved against the page URL.
pub fn handshake(timeout: Duration) -> DingTalkHandshake {
    DingTalkHandshake::new("/api", timeout).with_http_client(http_client())
}

pub fn environment(
    server: &MockServer,
    session: Arc<SessionStore>,
    bridge: Arc<FakeBridge>,
) -> HostEnvironment {
    HostEnvironment::new()
        .with_session(session)
        .with_bridge(bridge)
        .with_page_url(server.page_url("/dashboard"))
}

/// Server scripted for a complete successful handshake.
pub async fn happy_server() -> MockServer {
    let server = MockServer::start().await;
    server.route("POST", SIGN_PATH, Reply::json(200, sign_body()));
    server.route("POST", LOGIN_PATH, Reply::json(200, login_body()));
    server
}
