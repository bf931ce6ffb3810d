use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use wiremock::MockServer;

use crm_relay::config::{ApiConfig, Config, QueueConfig};
use crm_relay::store::MemoryQueueStore;

pub const ENDPOINT_ID: &str = "shop.Website";
pub const SECRET_KEY: &str = "test-secret-key";

/// A running relay backed by the in-memory store and a mock CRM.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub crm: MockServer,
    pub store: Arc<MemoryQueueStore>,
    pub admin_token: Option<String>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.admin_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Make a GET request, with the admin token if one is configured.
    pub async fn get(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .authed(self.client.get(self.url(path)))
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Make a POST request with a JSON body, with the admin token if one is configured.
    pub async fn post(&self, path: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .authed(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await
            .expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }
}

pub fn test_config(crm_url: &str, admin_token: Option<String>) -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0, // unused, we bind to random port
        log_level: "warn".to_string(),
        admin_token,
        api: ApiConfig::new(crm_url, ENDPOINT_ID).with_secret_key(ENDPOINT_ID, SECRET_KEY),
        queue: QueueConfig::default(),
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_token(None).await
}

/// Spawn a relay on a random port with a fresh store and mock CRM.
pub async fn spawn_app_with_token(admin_token: Option<&str>) -> TestApp {
    let crm = MockServer::start().await;
    let store = Arc::new(MemoryQueueStore::new());
    let admin_token = admin_token.map(str::to_string);

    let (app, _state) =
        crm_relay::build_app(store.clone(), test_config(&crm.uri(), admin_token.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    TestApp {
        addr,
        client: Client::new(),
        crm,
        store,
        admin_token,
    }
}
