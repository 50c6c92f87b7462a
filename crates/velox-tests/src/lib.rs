//! Integration tests for the Velox API.
//!
//! Each test starts its own in-process server on an ephemeral port. Set
//! `API_BASE_URL` to run the suite against an already running server instead.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use velox_api::api::create_app;
use velox_api::config::Config;
use velox_api::state::AppState;
use velox_client::{ClientConfig, LoginRequest, RegisterRequest, VeloxClient};

/// A server the tests talk to.
pub struct TestServer {
    /// Base URL, e.g. `http://127.0.0.1:40123`.
    pub base_url: String,
    /// State of the in-process server, `None` when `API_BASE_URL` is used.
    pub state: Option<Arc<AppState>>,
}

impl TestServer {
    /// Creates an unauthenticated client for this server.
    ///
    /// # Errors
    /// Returns error if client creation fails.
    pub fn client(&self) -> Result<VeloxClient, velox_client::Error> {
        VeloxClient::new(ClientConfig {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(10),
        })
    }

    /// Advances the simulated feed by one tick when the server is in-process.
    pub fn tick(&self) {
        if let Some(state) = &self.state {
            state.feed.tick_once();
        }
    }
}

/// Starts a server, or points at `API_BASE_URL` when it is set.
///
/// The in-process server runs without a database and with the feed loop
/// disabled; every configured symbol gets one tick so quotes and chains
/// are available immediately.
///
/// # Panics
/// Panics if the listener cannot be bound.
pub async fn spawn_server() -> TestServer {
    if let Ok(base_url) = std::env::var("API_BASE_URL") {
        return TestServer {
            base_url,
            state: None,
        };
    }

    let mut config = Config::default();
    config.stream.feed_enabled = false;
    config.stream.heartbeat_secs = 1;
    let state = Arc::new(AppState::from_config(config, None));
    state
        .register_symbols()
        .await
        .expect("Failed to register symbols");
    state.feed.tick_once();

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Listener has no address");
    let app = create_app(Arc::clone(&state));
    tokio::spawn(async move {
        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        let _ = axum::serve(listener, service).await;
    });

    TestServer {
        base_url: format!("http://{addr}"),
        state: Some(state),
    }
}

/// Generates a unique username to avoid conflicts between tests.
#[must_use]
pub fn unique_username(prefix: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);

    format!("{prefix}_{}_{counter}", ts % 1_000_000)
}

/// Registers a fresh trader and returns a client holding their session.
///
/// # Panics
/// Panics if registration or login fails.
pub async fn logged_in_client(server: &TestServer, prefix: &str) -> VeloxClient {
    let client = server.client().expect("Failed to create client");
    let username = unique_username(prefix);
    client
        .register(&RegisterRequest {
            username: username.clone(),
            email: format!("{username}@example.com"),
            password: "s3cretpass".to_string(),
            phone: None,
            role: None,
        })
        .await
        .expect("Registration failed");
    let session = client
        .login(&LoginRequest {
            username,
            password: "s3cretpass".to_string(),
        })
        .await
        .expect("Login failed");
    client.with_token(&session.token)
}
