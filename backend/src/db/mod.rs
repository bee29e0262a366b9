pub mod schema;

use anyhow::bail;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

#[derive(Clone)]
pub struct Db {
    pub pool: AnyPool,
}

impl Db {
    /// Opens a pool on a SQLite database.
    ///
    /// Schema and queries are written for SQLite (`?` placeholders,
    /// `INTEGER PRIMARY KEY` row ids), so other engines are refused up front.
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        if !is_sqlite_url(database_url) {
            bail!("unsupported database url {database_url}: only sqlite is supported");
        }

        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        schema::migrate(&self.pool).await
    }
}

fn is_sqlite_url(url: &str) -> bool {
    url.starts_with("sqlite:")
}
