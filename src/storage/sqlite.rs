use std::env;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dirs::home_dir;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::warn;

use super::{DbFacade, DbTransaction, ObjectStore};
use crate::errors::{IndexError, IndexResult};

const DB_FILE_NAME: &str = "maildex.db";

/// SQLite-backed implementation of the object-store facade. One table per
/// named store, each a plain key/value pair.
#[derive(Clone)]
pub struct SqliteDb {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl SqliteDb {
    pub async fn new_default() -> IndexResult<Self> {
        Self::new_named(DB_FILE_NAME).await
    }

    pub async fn new_named(file_name: &str) -> IndexResult<Self> {
        let base = default_data_dir()?;
        let db_path = base.join(file_name);
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                IndexError::Store(format!(
                    "creating data directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| IndexError::Store(format!("connecting to {}: {e}", db_path.display())))?;

        let db = SqliteDb {
            pool,
            path: Some(db_path),
        };
        db.migrate().await?;
        Ok(db)
    }

    /// Private in-memory database, handy for tests. Pinned to a single
    /// connection: each sqlite `:memory:` connection is its own database.
    pub async fn in_memory() -> IndexResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| IndexError::Store(format!("opening in-memory db: {e}")))?;

        let db = SqliteDb { pool, path: None };
        db.migrate().await?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn migrate(&self) -> IndexResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meta_data (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS group_data (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS element_data (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexError::Store(format!("running migrations: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl DbFacade for SqliteDb {
    async fn begin(&self) -> IndexResult<Box<dyn DbTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexError::Store(format!("beginning transaction: {e}")))?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn delete_database(&self) -> IndexResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IndexError::Store(format!("beginning delete tx: {e}")))?;

        for store in ObjectStore::ALL {
            sqlx::query(&format!("DELETE FROM {};", store.table()))
                .execute(&mut *tx)
                .await
                .map_err(|e| IndexError::Store(format!("clearing {}: {e}", store.table())))?;
        }

        tx.commit()
            .await
            .map_err(|e| IndexError::Store(format!("committing delete tx: {e}")))?;
        Ok(())
    }
}

struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl DbTransaction for SqliteTransaction {
    async fn get(&mut self, store: ObjectStore, key: &str) -> IndexResult<Option<Vec<u8>>> {
        let row = sqlx::query(&format!(
            "SELECT value FROM {} WHERE key = ?1;",
            store.table()
        ))
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| IndexError::Store(format!("reading {}: {e}", store.table())))?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>(0)))
    }

    async fn put(&mut self, store: ObjectStore, key: &str, value: &[u8]) -> IndexResult<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value;
            "#,
            store.table()
        ))
        .bind(key)
        .bind(value)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| IndexError::Store(format!("writing {}: {e}", store.table())))?;
        Ok(())
    }

    async fn delete(&mut self, store: ObjectStore, key: &str) -> IndexResult<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE key = ?1;", store.table()))
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| IndexError::Store(format!("deleting from {}: {e}", store.table())))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> IndexResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| IndexError::Store(format!("committing transaction: {e}")))
    }
}

pub(crate) fn default_data_dir() -> IndexResult<PathBuf> {
    if let Ok(custom) = env::var("MAILDEX_DATA_DIR") {
        let path = PathBuf::from(custom);
        std::fs::create_dir_all(&path).map_err(|e| {
            IndexError::Store(format!("creating MAILDEX_DATA_DIR at {}: {e}", path.display()))
        })?;
        return Ok(path);
    }

    if let Some(home) = home_dir() {
        let path = home.join(".maildex");
        if std::fs::create_dir_all(&path).is_ok() {
            return Ok(path);
        } else {
            warn!(
                "Unable to create {}/.maildex; falling back to workspace-local storage",
                home.display()
            );
        }
    }

    let cwd = env::current_dir()
        .map_err(|e| IndexError::Store(format!("determining current directory: {e}")))?;
    let path = cwd.join("maildex-data");
    std::fs::create_dir_all(&path).map_err(|e| {
        IndexError::Store(format!(
            "creating fallback data directory {}: {e}",
            path.display()
        ))
    })?;
    Ok(path)
}
