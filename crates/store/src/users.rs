use crate::Result;

/// Operator lookup for message attribution.
#[derive(Clone)]
pub struct SqliteUserStore {
    pool: sqlx::SqlitePool,
}

impl SqliteUserStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn name(&self, user_id: i64) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT name FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(name,)| name))
    }

    pub async fn upsert(&self, user_id: i64, name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, name) VALUES (?, ?) ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(user_id)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
