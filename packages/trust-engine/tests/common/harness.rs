//! Test harness with testcontainers for the Postgres store.
//!
//! One Postgres container is started on first use and shared by every
//! test; tables are created once. Tests isolate themselves by using fresh
//! content keys and job ids.

use anyhow::{Context, Result};
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use trust_engine::{ContentKey, PostgresStore};
use uuid::Uuid;

struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test --features postgres-tests -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        // Create the tables once so concurrent tests never race on DDL
        PostgresStore::new(&db_url)
            .await
            .context("Failed to run store migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Per-test store over the shared database.
pub struct TestHarness {
    pub db_pool: PgPool,
    pub store: PostgresStore,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;

        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .context("Failed to connect to test database")?;
        let store = PostgresStore::from_pool(db_pool.clone())
            .await
            .context("Failed to open store")?;

        Ok(Self { db_pool, store })
    }

    /// A content key no other test uses.
    pub fn fresh_key(&self) -> ContentKey {
        let code = Uuid::new_v4().simple().to_string();
        ContentKey::parse(&format!("post:{}", &code[..12])).expect("valid shortcode")
    }

    pub async fn cache_rows(&self, key: &ContentKey) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM trust_cache WHERE content_key = $1")
            .bind(key.as_str())
            .fetch_one(&self.db_pool)
            .await
            .expect("count cache rows")
    }
}
