//! Temporary catalog DB for tests

use std::sync::LazyLock;

use pgtemp::{PgTempDB, PgTempDBBuilder};
use tokio::sync::OnceCell;

use crate::CatalogDb;

/// Whether to keep the temporary directory after the catalog DB is dropped
///
/// This is set to `false` by default, but can be overridden by the
/// `KEEP_TEMP_DIRS` environment variable.
pub static KEEP_TEMP_DIRS: LazyLock<bool> = LazyLock::new(|| {
    std::env::var("KEEP_TEMP_DIRS")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
});

/// Temporary catalog DB
///
/// This is a wrapper around the catalog DB that creates a temporary
/// database. On drop, the database is deleted.
pub struct TempCatalogDb {
    /// Inner catalog DB handle
    inner: CatalogDb,

    /// Temporary database handle
    ///
    /// On drop, the database is deleted.
    _temp_db: PgTempDB,
}

impl TempCatalogDb {
    /// Create a new temporary catalog DB
    pub async fn new(keep: bool, pool_size: u32) -> Self {
        let builder = PgTempDBBuilder::new().persist_data(keep);
        let pg_temp = PgTempDB::from_builder(builder);

        let data_dir = pg_temp.data_dir();
        tracing::info!("initializing temp catalog-db at: {}", data_dir.display());
        let uri = pg_temp.connection_uri();
        tracing::info!("connecting to catalog-db at: {}", uri);

        let catalog_db = CatalogDb::connect_with_retry(&uri, pool_size)
            .await
            .expect("failed to connect to catalog-db");

        TempCatalogDb {
            inner: catalog_db,
            _temp_db: pg_temp,
        }
    }

    /// Get the URL of the temporary catalog DB
    pub fn url(&self) -> &str {
        self.inner.url()
    }
}

impl std::ops::Deref for TempCatalogDb {
    type Target = CatalogDb;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Temp catalog db for sharing among tests. It is shared with the reasoning
/// that this helps us catch more bugs, even if it is less deterministic.
static TEMP_CATALOG_DB: OnceCell<TempCatalogDb> = OnceCell::const_new();

/// Get the temporary catalog DB
///
/// This is a shared instance of the temporary catalog DB that can be used by
/// tests.
///
/// The `keep` parameter controls whether the temporary directory is kept
/// after the catalog DB is dropped.
pub async fn temp_catalog_db(keep: bool, pool_size: u32) -> &'static TempCatalogDb {
    TEMP_CATALOG_DB
        .get_or_init(|| async { TempCatalogDb::new(keep, pool_size).await })
        .await
}
