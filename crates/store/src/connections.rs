use wabridge_common::{ConnectionStatus, SectorId, TenantConnection, time::now_ms};

use crate::Result;

/// Persisted per-sector connection state.
#[derive(Clone)]
pub struct SqliteConnectionStore {
    pool: sqlx::SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ConnectionRow {
    sector_id: i64,
    status: String,
    qrcode: Option<String>,
    qrcode_generated_at: Option<i64>,
    last_connected_at: Option<i64>,
    last_disconnected_at: Option<i64>,
    last_error: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl From<ConnectionRow> for TenantConnection {
    fn from(r: ConnectionRow) -> Self {
        Self {
            sector_id: r.sector_id,
            status: ConnectionStatus::parse(&r.status),
            qrcode: r.qrcode,
            qrcode_generated_at: r.qrcode_generated_at,
            last_connected_at: r.last_connected_at,
            last_disconnected_at: r.last_disconnected_at,
            last_error: r.last_error,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl SqliteConnectionStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, sector_id: SectorId) -> Result<Option<TenantConnection>> {
        let row = sqlx::query_as::<_, ConnectionRow>(
            "SELECT * FROM whatsapp_connections WHERE sector_id = ?",
        )
        .bind(sector_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    /// Persisted status, or [`ConnectionStatus::NotFound`] when no row exists.
    pub async fn status(&self, sector_id: SectorId) -> Result<ConnectionStatus> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM whatsapp_connections WHERE sector_id = ?")
                .bind(sector_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map_or(ConnectionStatus::NotFound, |(s,)| {
            ConnectionStatus::parse(&s)
        }))
    }

    /// Create the row if needed and move it to `connecting`.
    pub async fn mark_connecting(&self, sector_id: SectorId) -> Result<()> {
        let now = now_ms();
        sqlx::query(
            r#"INSERT INTO whatsapp_connections (sector_id, status, created_at, updated_at)
               VALUES (?, 'connecting', ?, ?)
               ON CONFLICT(sector_id) DO UPDATE SET
                 status = 'connecting', last_error = NULL, updated_at = excluded.updated_at"#,
        )
        .bind(sector_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed connection attempt.
    pub async fn set_error(&self, sector_id: SectorId, error: &str) -> Result<()> {
        let now = now_ms();
        sqlx::query(
            r#"INSERT INTO whatsapp_connections
                 (sector_id, status, last_error, last_disconnected_at, created_at, updated_at)
               VALUES (?, 'disconnected', ?, ?, ?, ?)
               ON CONFLICT(sector_id) DO UPDATE SET
                 status = 'disconnected', last_error = excluded.last_error,
                 last_disconnected_at = excluded.last_disconnected_at,
                 updated_at = excluded.updated_at"#,
        )
        .bind(sector_id)
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store a freshly issued pairing code with its generation time.
    pub async fn set_pairing_code(
        &self,
        sector_id: SectorId,
        payload: &str,
        generated_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO whatsapp_connections
                 (sector_id, status, qrcode, qrcode_generated_at, created_at, updated_at)
               VALUES (?, 'connecting', ?, ?, ?, ?)
               ON CONFLICT(sector_id) DO UPDATE SET
                 status = 'connecting', qrcode = excluded.qrcode,
                 qrcode_generated_at = excluded.qrcode_generated_at,
                 updated_at = excluded.updated_at"#,
        )
        .bind(sector_id)
        .bind(payload)
        .bind(generated_at)
        .bind(generated_at)
        .bind(generated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_pairing_code(&self, sector_id: SectorId) -> Result<()> {
        sqlx::query(
            r#"UPDATE whatsapp_connections
               SET qrcode = NULL, qrcode_generated_at = NULL, updated_at = ?
               WHERE sector_id = ?"#,
        )
        .bind(now_ms())
        .bind(sector_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_connected(&self, sector_id: SectorId) -> Result<()> {
        let now = now_ms();
        sqlx::query(
            r#"INSERT INTO whatsapp_connections
                 (sector_id, status, last_connected_at, created_at, updated_at)
               VALUES (?, 'connected', ?, ?, ?)
               ON CONFLICT(sector_id) DO UPDATE SET
                 status = 'connected', qrcode = NULL, qrcode_generated_at = NULL,
                 last_error = NULL, last_connected_at = excluded.last_connected_at,
                 updated_at = excluded.updated_at"#,
        )
        .bind(sector_id)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_disconnected(&self, sector_id: SectorId) -> Result<()> {
        let now = now_ms();
        sqlx::query(
            r#"UPDATE whatsapp_connections
               SET status = 'disconnected', last_disconnected_at = ?, updated_at = ?
               WHERE sector_id = ?"#,
        )
        .bind(now)
        .bind(now)
        .bind(sector_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark disconnected and drop any pending pairing code.
    pub async fn reset(&self, sector_id: SectorId) -> Result<()> {
        let now = now_ms();
        sqlx::query(
            r#"UPDATE whatsapp_connections
               SET status = 'disconnected', qrcode = NULL, qrcode_generated_at = NULL,
                   last_disconnected_at = ?, updated_at = ?
               WHERE sector_id = ?"#,
        )
        .bind(now)
        .bind(now)
        .bind(sector_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reset every sector at once. Returns the number of rows touched.
    pub async fn disconnect_all(&self) -> Result<u64> {
        let now = now_ms();
        let result = sqlx::query(
            r#"UPDATE whatsapp_connections
               SET status = 'disconnected', qrcode = NULL, qrcode_generated_at = NULL,
                   last_disconnected_at = ?, updated_at = ?"#,
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteConnectionStore {
        SqliteConnectionStore::new(crate::test_pool().await)
    }

    #[tokio::test]
    async fn missing_row_is_not_found() {
        let store = store().await;
        assert_eq!(store.status(9).await.unwrap(), ConnectionStatus::NotFound);
        assert!(store.get(9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let store = store().await;

        store.mark_connecting(7).await.unwrap();
        assert_eq!(store.status(7).await.unwrap(), ConnectionStatus::Connecting);

        store.set_pairing_code(7, "data:x", 1_000).await.unwrap();
        let row = store.get(7).await.unwrap().unwrap();
        assert_eq!(row.qrcode.as_deref(), Some("data:x"));
        assert_eq!(row.qrcode_generated_at, Some(1_000));

        store.set_connected(7).await.unwrap();
        let row = store.get(7).await.unwrap().unwrap();
        assert_eq!(row.status, ConnectionStatus::Connected);
        assert!(row.qrcode.is_none());
        assert!(row.last_connected_at.is_some());

        store.set_disconnected(7).await.unwrap();
        let row = store.get(7).await.unwrap().unwrap();
        assert_eq!(row.status, ConnectionStatus::Disconnected);
        assert!(row.last_disconnected_at.is_some());
    }

    #[tokio::test]
    async fn error_creates_row_and_reconnect_clears_it() {
        let store = store().await;
        store.set_error(3, "dial tcp: timeout").await.unwrap();
        let row = store.get(3).await.unwrap().unwrap();
        assert_eq!(row.status, ConnectionStatus::Disconnected);
        assert_eq!(row.last_error.as_deref(), Some("dial tcp: timeout"));

        store.mark_connecting(3).await.unwrap();
        assert!(store.get(3).await.unwrap().unwrap().last_error.is_none());
    }

    #[tokio::test]
    async fn clear_and_reset_drop_code() {
        let store = store().await;
        store.set_pairing_code(1, "a", 10).await.unwrap();
        store.clear_pairing_code(1).await.unwrap();
        let row = store.get(1).await.unwrap().unwrap();
        assert!(row.qrcode.is_none());
        assert_eq!(row.status, ConnectionStatus::Connecting);

        store.set_pairing_code(1, "b", 20).await.unwrap();
        store.reset(1).await.unwrap();
        let row = store.get(1).await.unwrap().unwrap();
        assert!(row.qrcode.is_none());
        assert_eq!(row.status, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_all_touches_every_row() {
        let store = store().await;
        store.set_connected(1).await.unwrap();
        store.set_pairing_code(2, "code", 5).await.unwrap();
        assert_eq!(store.disconnect_all().await.unwrap(), 2);
        for id in [1, 2] {
            assert_eq!(
                store.status(id).await.unwrap(),
                ConnectionStatus::Disconnected
            );
        }
    }
}
