use std::collections::BTreeMap;

use {
    sqlx::SqliteConnection,
    tracing::{debug, info},
    wabridge_common::{Contact, SectorId, phone::normalize_number, time::now_ms},
};

use crate::{Error, Result, rank};

/// Board column every new contact's card lands in.
pub const DEFAULT_COLUMN: &str = "Primeiro Atendimento";

const DEFAULT_STATUS: &str = "Novo";
const DEFAULT_PRIORITY: &str = "low";

const CONTACT_COLUMNS: &str = "id, sector_id, name, number, avatar_url, is_viewed, status, \
                               priority, contact_order, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteContactStore {
    pool: sqlx::SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ContactRow {
    id: i64,
    sector_id: i64,
    name: String,
    number: String,
    avatar_url: Option<String>,
    is_viewed: i32,
    status: String,
    priority: String,
    contact_order: i64,
    created_at: i64,
    updated_at: i64,
}

impl From<ContactRow> for Contact {
    fn from(r: ContactRow) -> Self {
        Self {
            id: r.id,
            sector_id: r.sector_id,
            name: r.name,
            number: r.number,
            avatar_url: r.avatar_url,
            is_viewed: r.is_viewed != 0,
            status: r.status,
            priority: r.priority,
            rank: r.contact_order,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl SqliteContactStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, contact_id: i64) -> Result<Option<Contact>> {
        let row = sqlx::query_as::<_, ContactRow>(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?"
        ))
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    /// Look a contact up by number or user address. An exact match wins over
    /// a stored number that merely contains the normalized one.
    pub async fn find_by_number(&self, sector_id: SectorId, raw: &str) -> Result<Option<Contact>> {
        let number = normalize_number(raw);
        if number.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, ContactRow>(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts \
             WHERE sector_id = ? AND (number = ? OR number LIKE ?) \
             ORDER BY (number = ?) DESC, id LIMIT 1"
        ))
        .bind(sector_id)
        .bind(&number)
        .bind(format!("%{number}%"))
        .bind(&number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    /// Return the contact for `raw`, creating it together with its kanban
    /// card in one transaction when missing.
    pub async fn create_if_not_exists(&self, sector_id: SectorId, raw: &str) -> Result<Contact> {
        if let Some(existing) = self.find_by_number(sector_id, raw).await? {
            return Ok(existing);
        }
        let number = normalize_number(raw);
        if number.is_empty() {
            return Err(Error::InvalidNumber(raw.to_string()));
        }

        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"INSERT INTO contacts
                 (sector_id, name, number, is_viewed, status, priority, contact_order, created_at, updated_at)
               VALUES (?, ?, ?, 0, ?, ?, 0, ?, ?)
               ON CONFLICT(sector_id, number) DO NOTHING"#,
        )
        .bind(sector_id)
        .bind(&number)
        .bind(&number)
        .bind(DEFAULT_STATUS)
        .bind(DEFAULT_PRIORITY)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 1 {
            let contact_id = inserted.last_insert_rowid();
            let column_id = default_column(&mut tx, sector_id).await?;
            let (position,): (i64,) = sqlx::query_as(
                "SELECT COALESCE(MAX(position), 0) + 1 FROM cards WHERE column_id = ?",
            )
            .bind(column_id)
            .fetch_one(&mut *tx)
            .await?;
            sqlx::query(
                r#"INSERT INTO cards (sector_id, contact_id, column_id, position, created_at)
                   VALUES (?, ?, ?, ?, ?)"#,
            )
            .bind(sector_id)
            .bind(contact_id)
            .bind(column_id)
            .bind(position)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            info!(sector_id, contact_id, number = %number, "contact created");
        }

        let row = sqlx::query_as::<_, ContactRow>(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE sector_id = ? AND number = ?"
        ))
        .bind(sector_id)
        .bind(&number)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row.into())
    }

    /// Update display name and/or avatar. `None` leaves a field untouched.
    pub async fn update_profile(
        &self,
        contact_id: i64,
        name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<Contact> {
        sqlx::query(
            r#"UPDATE contacts
               SET name = COALESCE(?, name), avatar_url = COALESCE(?, avatar_url), updated_at = ?
               WHERE id = ?"#,
        )
        .bind(name)
        .bind(avatar_url)
        .bind(now_ms())
        .bind(contact_id)
        .execute(&self.pool)
        .await?;
        self.get(contact_id)
            .await?
            .ok_or_else(|| Error::ContactNotFound(contact_id.to_string()))
    }

    pub async fn set_viewed(&self, contact_id: i64, viewed: bool) -> Result<Contact> {
        let result = sqlx::query("UPDATE contacts SET is_viewed = ?, updated_at = ? WHERE id = ?")
            .bind(viewed as i32)
            .bind(now_ms())
            .bind(contact_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::ContactNotFound(contact_id.to_string()));
        }
        debug!(contact_id, viewed, "contact viewed flag updated");
        self.get(contact_id)
            .await?
            .ok_or_else(|| Error::ContactNotFound(contact_id.to_string()))
    }

    pub async fn set_viewed_by_number(&self, sector_id: SectorId, raw: &str) -> Result<Contact> {
        let contact = self
            .find_by_number(sector_id, raw)
            .await?
            .ok_or_else(|| Error::ContactNotFound(raw.to_string()))?;
        self.set_viewed(contact.id, true).await
    }

    /// Map of contact id → viewed flag for one sector.
    pub async fn viewed_status(&self, sector_id: SectorId) -> Result<BTreeMap<i64, bool>> {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM sectors WHERE id = ?")
            .bind(sector_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(Error::SectorNotFound(sector_id));
        }
        let rows: Vec<(i64, i32)> =
            sqlx::query_as("SELECT id, is_viewed FROM contacts WHERE sector_id = ?")
                .bind(sector_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id, v)| (id, v != 0)).collect())
    }

    /// All contacts of a sector, most recently active first. Unranked contacts
    /// trail in creation order.
    pub async fn list_by_sector(&self, sector_id: SectorId) -> Result<Vec<Contact>> {
        let rows = sqlx::query_as::<_, ContactRow>(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE sector_id = ? \
             ORDER BY (contact_order = 0), contact_order, id"
        ))
        .bind(sector_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Give `contact_id` rank 1 inside a single transaction.
    ///
    /// Opened `IMMEDIATE` so concurrent reorders queue on the busy timeout
    /// instead of failing with `SQLITE_BUSY` on a read-to-write upgrade.
    pub async fn move_to_front(&self, sector_id: SectorId, contact_id: i64) -> Result<()> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT id, contact_order FROM contacts WHERE sector_id = ? ORDER BY created_at, id",
        )
        .bind(sector_id)
        .fetch_all(&mut *tx)
        .await?;

        let ranks = rank::move_to_front(&rows, contact_id)
            .ok_or_else(|| Error::ContactNotFound(contact_id.to_string()))?;

        let now = now_ms();
        for ((id, new_rank), (_, old_rank)) in ranks.iter().zip(rows.iter()) {
            if new_rank == old_rank {
                continue;
            }
            sqlx::query("UPDATE contacts SET contact_order = ?, updated_at = ? WHERE id = ?")
                .bind(new_rank)
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(sector_id, contact_id, "contact moved to front");
        Ok(())
    }
}

async fn default_column(conn: &mut SqliteConnection, sector_id: SectorId) -> Result<i64> {
    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM board_columns WHERE sector_id = ? AND name = ?")
            .bind(sector_id)
            .bind(DEFAULT_COLUMN)
            .fetch_optional(&mut *conn)
            .await?;
    if let Some((id,)) = existing {
        return Ok(id);
    }
    let result = sqlx::query("INSERT INTO board_columns (sector_id, name, position) VALUES (?, ?, 0)")
        .bind(sector_id)
        .bind(DEFAULT_COLUMN)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}
