use wabridge_common::SectorId;

use crate::Result;

/// Tenant lookup.
#[derive(Clone)]
pub struct SqliteSectorStore {
    pool: sqlx::SqlitePool,
}

impl SqliteSectorStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Whether the sector is configured for the official API instead of the
    /// bridge. `None` when the sector does not exist.
    pub async fn is_official(&self, sector_id: SectorId) -> Result<Option<bool>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT is_official FROM sectors WHERE id = ?")
            .bind(sector_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v != 0))
    }

    pub async fn exists(&self, sector_id: SectorId) -> Result<bool> {
        Ok(self.is_official(sector_id).await?.is_some())
    }

    pub async fn upsert(&self, sector_id: SectorId, name: &str, is_official: bool) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO sectors (id, name, is_official) VALUES (?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET name = excluded.name, is_official = excluded.is_official"#,
        )
        .bind(sector_id)
        .bind(name)
        .bind(is_official as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
