//! SQLite-backed relational store: sectors, connection state, contacts with
//! their kanban cards, messages and users.

pub mod connections;
pub mod contacts;
pub mod error;
pub mod messages;
pub mod rank;
pub mod schema;
pub mod sectors;
pub mod users;

pub use {
    connections::SqliteConnectionStore,
    contacts::SqliteContactStore,
    error::{Error, Result},
    messages::{NewMessage, SqliteMessageStore},
    sectors::SqliteSectorStore,
    users::SqliteUserStore,
};

/// All stores sharing one pool.
#[derive(Clone)]
pub struct Stores {
    pub sectors: SqliteSectorStore,
    pub connections: SqliteConnectionStore,
    pub contacts: SqliteContactStore,
    pub messages: SqliteMessageStore,
    pub users: SqliteUserStore,
}

impl Stores {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self {
            sectors: SqliteSectorStore::new(pool.clone()),
            connections: SqliteConnectionStore::new(pool.clone()),
            contacts: SqliteContactStore::new(pool.clone()),
            messages: SqliteMessageStore::new(pool.clone()),
            users: SqliteUserStore::new(pool),
        }
    }
}

#[cfg(test)]
pub(crate) async fn test_pool() -> sqlx::SqlitePool {
    // A single connection keeps every query on the same in-memory database.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    schema::init(&pool).await.unwrap();
    pool
}
