use std::path::Path;
use std::sync::Arc;

use leasegate::auth::authorization_header;
use leasegate::config::{GatewayConfig, KeyConfig, RepositoryConfig};
use leasegate::lease::{LeaseEngine, ManualClock, NoopPublisher, Publisher};
use leasegate::server::{AppState, create_router};
use leasegate::store::{EmbeddedStore, LeaseStore};
use serde_json::Value;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub const REPO: &str = "repo.example.org";
pub const OTHER_REPO: &str = "other.example.org";

/// A signing identity: key id and secret.
#[derive(Clone, Copy)]
pub struct Key {
    pub id: &'static str,
    pub secret: &'static str,
}

pub const ALICE: Key = Key {
    id: "alice",
    secret: "alice-secret",
};
pub const BOB: Key = Key {
    id: "bob",
    secret: "bob-secret",
};
pub const CAROL: Key = Key {
    id: "carol",
    secret: "carol-secret",
};

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.leases.ttl_secs = 60;
    config.repositories.insert(
        REPO.to_string(),
        RepositoryConfig {
            keys: [ALICE, BOB]
                .iter()
                .map(|k| KeyConfig {
                    id: k.id.to_string(),
                    secret: k.secret.to_string(),
                })
                .collect(),
        },
    );
    config.repositories.insert(
        OTHER_REPO.to_string(),
        RepositoryConfig {
            keys: vec![KeyConfig {
                id: CAROL.id.to_string(),
                secret: CAROL.secret.to_string(),
            }],
        },
    );
    config
}

/// An in-process gateway on an ephemeral port, backed by an on-disk embedded store.
pub struct TestServer {
    pub temp_dir: TempDir,
    pub base_url: String,
    pub engine: Arc<LeaseEngine>,
    pub store: Arc<dyn LeaseStore>,
    pub clock: Arc<ManualClock>,
    client: reqwest::Client,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(test_config(), Arc::new(NoopPublisher)).await
    }

    pub async fn start_with(config: GatewayConfig, publisher: Arc<dyn Publisher>) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store: Arc<dyn LeaseStore> = Arc::new(
            EmbeddedStore::open(temp_dir.path().join("leases.db")).expect("open store"),
        );

        let config = Arc::new(config);
        let clock = Arc::new(ManualClock::default());
        let engine = Arc::new(
            LeaseEngine::new(config.clone(), store.clone(), publisher).with_clock(clock.clone()),
        );
        let app = create_router(Arc::new(AppState::new(config, engine.clone())));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        let base_url = format!("http://127.0.0.1:{port}");
        Self::wait_for_ready(&base_url).await;

        Self {
            temp_dir,
            base_url,
            engine,
            store,
            clock,
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn wait_for_ready(base_url: &str) {
        let client = reqwest::Client::new();
        for _ in 0..50 {
            if client
                .get(format!("{base_url}/health"))
                .send()
                .await
                .is_ok()
            {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("Server did not become ready");
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .expect("send request");
        let status = resp.status().as_u16();
        (status, resp.json().await.expect("parse response"))
    }

    /// Sends a request signed with `key`.
    pub async fn signed(&self, key: Key, method: &str, path: &str, body: Option<Value>) -> (u16, Value) {
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let header = authorization_header(key.id, key.secret, method, path, body.as_bytes());
        self.raw(method, path, Some(header), body).await
    }

    pub async fn raw(
        &self,
        method: &str,
        path: &str,
        authorization: Option<String>,
        body: String,
    ) -> (u16, Value) {
        let method = reqwest::Method::from_bytes(method.as_bytes()).expect("method");
        let mut request = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header("content-type", "application/json")
            .body(body);
        if let Some(authorization) = authorization {
            request = request.header("authorization", authorization);
        }
        let resp = request.send().await.expect("send request");
        let status = resp.status().as_u16();
        (status, resp.json().await.expect("parse response"))
    }

    /// Acquires `path` in `repository` and returns the token.
    pub async fn acquire(&self, key: Key, repository: &str, path: &str) -> String {
        let (status, body) = self
            .signed(
                key,
                "POST",
                "/api/v1/leases",
                Some(serde_json::json!({ "repository": repository, "path": path })),
            )
            .await;
        assert_eq!(status, 201, "acquire failed: {body}");
        body["data"]["token"]
            .as_str()
            .expect("lease token")
            .to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
