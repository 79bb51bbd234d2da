//! A real server on a random port, backed by a temporary database.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pagetree::config::{Auth, Config, Database, Server as ServerConfig, SharedConfig};
use pagetree::{Module, Router, Service, Space, Store, server};
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use uuid::Uuid;

pub struct TestServer {
    pub server: server::Server,
    pub service: Service,
    pub config: SharedConfig,
    pub space: Space,
    /// Plain member of `space`.
    pub user: Uuid,
    _dir: TempDir,
}

pub struct Reply {
    pub status: u16,
    pub head: String,
    pub body: Value,
}

pub async fn start() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let url = dir.path().join("api.db");
    let config = Arc::new(Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: Database {
            url: url.to_string_lossy().into_owned(),
            busy_timeout_ms: 5_000,
        },
        auth: Auth {
            jwt_secret: "test-secret-that-is-at-least-32b!".to_string(),
            token_expiry_days: 1,
        },
    });

    let db = pagetree::db::connect(&config.database.url).await.unwrap();
    let service = Service::new(db.clone(), Duration::from_secs(5));
    let space = Space::new(Uuid::new_v4());
    let user = Uuid::new_v4();
    let conn = service.connection().unwrap();
    conn.insert_space(&space).await.unwrap();
    conn.add_member(space.id, user, false).await.unwrap();

    let mut router = Router::new();
    pagetree::api::Pages.routes(&mut router);
    let server = server::start(Arc::clone(&config), Some(db), router.into_handle())
        .await
        .expect("failed to start test server");

    TestServer {
        server,
        service,
        config,
        space,
        user,
        _dir: dir,
    }
}

impl TestServer {
    pub fn addr(&self) -> SocketAddr {
        self.server.addr()
    }

    pub fn token(&self, user: Uuid) -> String {
        pagetree::auth::create_token(&self.config.auth, user).unwrap()
    }

    /// Send a JSON request with `Connection: close` and parse the reply.
    pub async fn call(&self, method: &str, path: &str, token: Option<&str>, body: Option<Value>) -> Reply {
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let mut request = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n",
            body.len()
        );
        if let Some(token) = token {
            request.push_str(&format!("Authorization: Bearer {token}\r\n"));
        }
        request.push_str("\r\n");
        request.push_str(&body);

        parse(&raw_request(self.addr(), request.as_bytes()).await)
    }
}

/// Send raw bytes and read until the server closes the connection.
pub async fn raw_request(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.expect("failed to connect");
    stream.write_all(payload).await.expect("failed to write");

    let mut buf = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf)).await;
    buf
}

fn parse(raw: &[u8]) -> Reply {
    let text = String::from_utf8_lossy(raw).into_owned();
    let (head, body) = text.split_once("\r\n\r\n").unwrap_or((text.as_str(), ""));
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap_or_else(|| panic!("no status line in:\n{text}"));
    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(body).unwrap_or_else(|e| panic!("bad JSON body {body:?}: {e}"))
    };
    Reply {
        status,
        head: head.to_string(),
        body,
    }
}
