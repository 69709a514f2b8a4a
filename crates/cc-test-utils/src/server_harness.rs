//! Test server harness for E2E testing
//!
//! Provides `TestCcServer` for spawning real Call Controller instances in
//! tests, backed either by the in-memory registry or by a test database.

use crate::crypto_fixtures::{test_signing_key, TestSigningKey};
use crate::token_builders::TestTokenBuilder;
use cc_service::actors::{ActorMetrics, MembershipTable};
use cc_service::auth::JwtValidator;
use cc_service::config::Config;
use cc_service::lifecycle::LifecycleSynchronizer;
use cc_service::models::UserRole;
use cc_service::observability::health::HealthState;
use cc_service::registry::{InMemorySessionRegistry, PgSessionRegistry, SessionRegistry};
use cc_service::routes::{self, init_metrics_recorder, AppState};
use cc_service::signaling::SignalingRelay;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Seed of the key that signs every harness-issued token.
pub const TEST_KEY_SEED: u8 = 1;

/// Global metrics handle for test servers (the recorder is process-wide).
static TEST_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn test_metrics_handle() -> PrometheusHandle {
    TEST_METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder().unwrap_or_else(|_| {
                metrics_exporter_prometheus::PrometheusBuilder::new()
                    .build_recorder()
                    .handle()
            })
        })
        .clone()
}

/// In-memory registry with the users most tests need:
/// attachee 7, assessor 3, and an unrelated attachee 9.
pub fn test_registry() -> InMemorySessionRegistry {
    InMemorySessionRegistry::new()
        .with_user(7, "attachee7", UserRole::Attachee)
        .with_user(3, "assessor3", UserRole::Assessor)
        .with_user(9, "attachee9", UserRole::Attachee)
}

/// Test harness for spawning the Call Controller in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() -> anyhow::Result<()> {
///     let server = TestCcServer::spawn_in_memory(test_registry()).await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestCcServer {
    addr: SocketAddr,
    registry: Arc<dyn SessionRegistry>,
    membership: MembershipTable,
    health: Arc<HealthState>,
    config: Config,
    signing_key: TestSigningKey,
    _handle: JoinHandle<()>,
}

impl TestCcServer {
    /// Spawn a server backed by the given in-memory registry.
    pub async fn spawn_in_memory(registry: InMemorySessionRegistry) -> Result<Self, anyhow::Error> {
        Self::spawn_with(Arc::new(registry), None, &[]).await
    }

    /// Spawn a server backed by PostgreSQL (typically a `#[sqlx::test]` pool).
    pub async fn spawn(pool: PgPool) -> Result<Self, anyhow::Error> {
        let registry = Arc::new(PgSessionRegistry::new(pool.clone()));
        Self::spawn_with(registry, Some(pool), &[]).await
    }

    /// Spawn a server with explicit registry, optional pool and config
    /// overrides (for example `("WS_IDLE_TIMEOUT_SECONDS", "2")`).
    ///
    /// The server binds to 127.0.0.1:0 and serves in a background task.
    pub async fn spawn_with(
        registry: Arc<dyn SessionRegistry>,
        pool: Option<PgPool>,
        overrides: &[(&str, &str)],
    ) -> Result<Self, anyhow::Error> {
        let signing_key = test_signing_key(TEST_KEY_SEED)
            .map_err(|e| anyhow::anyhow!("Failed to create signing key: {}", e))?;

        let mut vars = HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://test/test".to_string(),
            ),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            (
                "JWT_PUBLIC_KEY".to_string(),
                signing_key.public_key_x.clone(),
            ),
            ("CC_ID".to_string(), "cc-test".to_string()),
        ]);
        for (key, value) in overrides {
            vars.insert((*key).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let jwt_validator = Arc::new(
            JwtValidator::new(
                &config.jwt_public_key,
                Duration::from_secs(config.jwt_clock_skew_seconds),
            )
            .map_err(|e| anyhow::anyhow!("Failed to create JWT validator: {}", e))?,
        );

        let actor_metrics = ActorMetrics::new();
        let membership = MembershipTable::new(config.cc_id.clone(), Arc::clone(&actor_metrics));
        let lifecycle = LifecycleSynchronizer::new(Arc::clone(&registry));
        let relay = SignalingRelay::new(Arc::clone(&registry), membership.clone(), lifecycle);

        let health = Arc::new(HealthState::new());
        health.set_ready();

        let state = Arc::new(AppState {
            registry: Arc::clone(&registry),
            relay,
            config: config.clone(),
            health: Arc::clone(&health),
            pool,
            jwt_validator,
            actor_metrics,
        });

        let app = routes::build_routes(state, test_metrics_handle());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            registry,
            membership,
            health,
            config,
            signing_key,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the signaling WebSocket URL.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The registry the server reads and writes.
    pub fn registry(&self) -> &Arc<dyn SessionRegistry> {
        &self.registry
    }

    /// The server's room membership table.
    pub fn membership(&self) -> &MembershipTable {
        &self.membership
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The key the server trusts.
    pub fn signing_key(&self) -> &TestSigningKey {
        &self.signing_key
    }

    /// A valid access token for `user_id` with `role`.
    pub fn token_for(&self, user_id: i64, role: &str) -> String {
        TestTokenBuilder::new()
            .for_user(user_id)
            .with_role(role)
            .with_name(&format!("{role}{user_id}"))
            .sign(&self.signing_key)
    }
}

impl Drop for TestCcServer {
    fn drop(&mut self) {
        self._handle.abort();
        self.membership.cancel();
    }
}
