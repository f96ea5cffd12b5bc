//! Test harness with testcontainers for Postgres integration testing.
//!
//! One Postgres container is shared by every test in the binary. It is started
//! and migrated on first use, then reused.

use anyhow::{Context, Result};
use dispatcher_core::kernel::jobs::PostgresJobStore;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

use super::init_tracing;

/// Shared test infrastructure that persists across all tests.
struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

/// Global shared infrastructure - initialized once, reused by all tests.
static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        init_tracing();

        let postgres = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        // Run migrations once on the shared database
        let store = PostgresJobStore::connect(&db_url, 2)
            .await
            .context("Failed to connect to Postgres for migrations")?;
        store.migrate().await.context("Failed to run migrations")?;

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

/// Test harness handing each test a fresh pool on the shared database.
///
/// Tests share one `jobs` table, so they should use their own job type names.
///
/// ```ignore
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// #[ignore] // Requires Docker
/// async fn my_test(ctx: &TestHarness) {
///     ctx.store.insert(job).await.unwrap();
/// }
/// ```
pub struct TestHarness {
    pub store: PostgresJobStore,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        self.store.pool().close().await;
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;

        let store = PostgresJobStore::connect(&infra.db_url, 10)
            .await
            .context("Failed to connect to test database")?;

        Ok(Self { store })
    }
}
