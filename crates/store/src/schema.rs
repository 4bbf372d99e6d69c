use tracing::debug;

use crate::Result;

const STATEMENTS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS sectors (
        id          INTEGER PRIMARY KEY,
        name        TEXT NOT NULL DEFAULT '',
        is_official INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS whatsapp_connections (
        sector_id            INTEGER PRIMARY KEY,
        status               TEXT NOT NULL,
        qrcode               TEXT,
        qrcode_generated_at  INTEGER,
        last_connected_at    INTEGER,
        last_disconnected_at INTEGER,
        last_error           TEXT,
        created_at           INTEGER NOT NULL,
        updated_at           INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS contacts (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        sector_id     INTEGER NOT NULL,
        name          TEXT NOT NULL,
        number        TEXT NOT NULL,
        avatar_url    TEXT,
        is_viewed     INTEGER NOT NULL DEFAULT 0,
        status        TEXT NOT NULL DEFAULT 'Novo',
        priority      TEXT NOT NULL DEFAULT 'low',
        contact_order INTEGER NOT NULL DEFAULT 0,
        created_at    INTEGER NOT NULL,
        updated_at    INTEGER NOT NULL
    )"#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_contacts_sector_number ON contacts(sector_id, number)",
    r#"CREATE TABLE IF NOT EXISTS board_columns (
        id        INTEGER PRIMARY KEY AUTOINCREMENT,
        sector_id INTEGER NOT NULL,
        name      TEXT NOT NULL,
        position  INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS cards (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        sector_id  INTEGER NOT NULL,
        contact_id INTEGER NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
        column_id  INTEGER NOT NULL REFERENCES board_columns(id),
        position   INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS messages (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        sector_id   INTEGER NOT NULL,
        contact_id  INTEGER NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
        content     TEXT NOT NULL,
        kind        TEXT NOT NULL,
        media_url   TEXT,
        file_name   TEXT,
        mime_type   TEXT,
        whatsapp_id TEXT,
        sent        INTEGER NOT NULL,
        is_read     INTEGER NOT NULL DEFAULT 0,
        user_id     INTEGER,
        sent_at     INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_messages_contact ON messages(contact_id, sent_at)",
    r#"CREATE TABLE IF NOT EXISTS users (
        id   INTEGER PRIMARY KEY,
        name TEXT NOT NULL
    )"#,
];

/// Create all tables and indexes if they don't exist.
pub async fn init(pool: &sqlx::SqlitePool) -> Result<()> {
    for stmt in STATEMENTS {
        sqlx::query(stmt).execute(pool).await?;
    }
    debug!("relational schema ready");
    Ok(())
}
