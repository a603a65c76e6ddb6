use std::net::SocketAddr;
use std::sync::Arc;

use arcgate::analytics::AnalyticsConfig;
use arcgate::identity::{Grants, Identity, MemoryIdentityStore, User};
use arcgate::ratelimit::MemoryCounterStore;
use arcgate::{EngineClient, GatewayConfig};
use arcgate_http::AppState;
use tokio::net::TcpListener;
use wiremock::MockServer;

pub const MASTER_USER: &str = "admin";
pub const MASTER_PASS: &str = "admin-secret";

pub struct TestGateway {
    pub url: String,
    pub state: Arc<AppState>,
    pub engine: MockServer,
    pub client: reqwest::Client,
}

#[allow(dead_code)]
impl TestGateway {
    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.url, path))
            .basic_auth(MASTER_USER, Some(MASTER_PASS))
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.url, path))
            .basic_auth(MASTER_USER, Some(MASTER_PASS))
    }

    /// Bodies the engine received on `path`, in arrival order.
    pub async fn engine_bodies(&self, path: &str) -> Vec<String> {
        self.engine
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == path)
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .collect()
    }
}

/// Non-admin user with the given grants.
#[allow(dead_code)]
pub fn user(username: &str, password: &str, grants: Grants) -> Identity {
    Identity::User(User {
        username: username.to_string(),
        password: password.to_string(),
        is_admin: false,
        email: None,
        grants,
    })
}

#[allow(dead_code)]
pub async fn spawn_gateway() -> TestGateway {
    spawn_gateway_with(Vec::new()).await
}

/// Gateway on an ephemeral port in front of a fresh mock engine. Background
/// writers are not started, so logs and analytics stay queued in memory.
pub async fn spawn_gateway_with(identities: Vec<Identity>) -> TestGateway {
    let engine = MockServer::start().await;

    let mut config = GatewayConfig::for_cluster(&engine.uri()).unwrap();
    config.master_username = Some(MASTER_USER.to_string());
    config.master_password = Some(MASTER_PASS.to_string());

    let store = MemoryIdentityStore::new();
    for identity in identities {
        store.insert(identity);
    }

    let client = EngineClient::new(&config).unwrap();
    let state = Arc::new(
        AppState::with_parts(
            config,
            client,
            Arc::new(store),
            Arc::new(MemoryCounterStore::new()),
            |_| AnalyticsConfig::disabled(),
        )
        .unwrap(),
    );

    let app = arcgate_http::build_app(&state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestGateway {
        url: format!("http://{}", addr),
        state,
        engine,
        client: reqwest::Client::new(),
    }
}
