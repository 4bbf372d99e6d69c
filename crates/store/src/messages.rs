use {
    sqlx::{QueryBuilder, Sqlite},
    wabridge_common::{Message, MessageKind, SectorId},
};

use crate::Result;

const MESSAGE_COLUMNS: &str = "id, sector_id, contact_id, content, kind, media_url, file_name, \
                               mime_type, whatsapp_id, sent, is_read, user_id, sent_at";

/// A message about to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sector_id: SectorId,
    pub contact_id: i64,
    pub content: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub whatsapp_id: Option<String>,
    pub sent: bool,
    pub read: bool,
    pub user_id: Option<i64>,
    pub sent_at: i64,
}

#[derive(Clone)]
pub struct SqliteMessageStore {
    pool: sqlx::SqlitePool,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    sector_id: i64,
    contact_id: i64,
    content: String,
    kind: String,
    media_url: Option<String>,
    file_name: Option<String>,
    mime_type: Option<String>,
    whatsapp_id: Option<String>,
    sent: i32,
    is_read: i32,
    user_id: Option<i64>,
    sent_at: i64,
}

impl From<MessageRow> for Message {
    fn from(r: MessageRow) -> Self {
        Self {
            id: r.id,
            sector_id: r.sector_id,
            contact_id: r.contact_id,
            content: r.content,
            kind: MessageKind::parse(&r.kind),
            media_url: r.media_url,
            file_name: r.file_name,
            mime_type: r.mime_type,
            whatsapp_id: r.whatsapp_id,
            sent: r.sent != 0,
            read: r.is_read != 0,
            user_id: r.user_id,
            sent_at: r.sent_at,
        }
    }
}

impl SqliteMessageStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, msg: &NewMessage) -> Result<Message> {
        let result = sqlx::query(
            r#"INSERT INTO messages
                 (sector_id, contact_id, content, kind, media_url, file_name, mime_type,
                  whatsapp_id, sent, is_read, user_id, sent_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(msg.sector_id)
        .bind(msg.contact_id)
        .bind(&msg.content)
        .bind(msg.kind.as_str())
        .bind(&msg.media_url)
        .bind(&msg.file_name)
        .bind(&msg.mime_type)
        .bind(&msg.whatsapp_id)
        .bind(msg.sent as i32)
        .bind(msg.read as i32)
        .bind(msg.user_id)
        .bind(msg.sent_at)
        .execute(&self.pool)
        .await?;

        Ok(Message {
            id: result.last_insert_rowid(),
            sector_id: msg.sector_id,
            contact_id: msg.contact_id,
            content: msg.content.clone(),
            kind: msg.kind,
            media_url: msg.media_url.clone(),
            file_name: msg.file_name.clone(),
            mime_type: msg.mime_type.clone(),
            whatsapp_id: msg.whatsapp_id.clone(),
            sent: msg.sent,
            read: msg.read,
            user_id: msg.user_id,
            sent_at: msg.sent_at,
        })
    }

    pub async fn get(&self, id: i64) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    /// Newest first.
    pub async fn list_by_contact(&self, contact_id: i64, limit: u32) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE contact_id = ? \
             ORDER BY sent_at DESC, id DESC LIMIT ?"
        ))
        .bind(contact_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Inbound messages from a contact that were not marked read yet, newest first.
    pub async fn unread_inbound(&self, contact_id: i64, limit: u32) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE contact_id = ? AND sent = 0 AND is_read = 0 \
             ORDER BY sent_at DESC, id DESC LIMIT ?"
        ))
        .bind(contact_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Set the read flag on the given messages. Returns rows updated.
    pub async fn mark_read(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("UPDATE messages SET is_read = 1 WHERE id IN (");
        let mut separated = qb.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::SqliteContactStore};

    fn inbound(contact_id: i64, content: &str, sent_at: i64) -> NewMessage {
        NewMessage {
            sector_id: 7,
            contact_id,
            content: content.into(),
            kind: MessageKind::Text,
            media_url: None,
            file_name: None,
            mime_type: None,
            whatsapp_id: Some(format!("WA{sent_at}")),
            sent: false,
            read: false,
            user_id: None,
            sent_at,
        }
    }

    async fn setup() -> (SqliteMessageStore, i64) {
        let pool = crate::test_pool().await;
        let contact = SqliteContactStore::new(pool.clone())
            .create_if_not_exists(7, "5511900000001")
            .await
            .unwrap();
        (SqliteMessageStore::new(pool), contact.id)
    }

    #[tokio::test]
    async fn save_and_get() {
        let (messages, contact_id) = setup().await;
        let mut msg = inbound(contact_id, "photo", 10);
        msg.kind = MessageKind::Image;
        msg.media_url = Some("https://cdn/x.jpg".into());
        msg.mime_type = Some("image/jpeg".into());

        let saved = messages.save(&msg).await.unwrap();
        let loaded = messages.get(saved.id).await.unwrap().unwrap();
        assert_eq!(saved, loaded);
        assert_eq!(loaded.kind, MessageKind::Image);
    }

    #[tokio::test]
    async fn unread_inbound_skips_outbound_and_read() {
        let (messages, contact_id) = setup().await;
        let a = messages.save(&inbound(contact_id, "a", 1)).await.unwrap();
        let b = messages.save(&inbound(contact_id, "b", 2)).await.unwrap();
        let mut out = inbound(contact_id, "reply", 3);
        out.sent = true;
        messages.save(&out).await.unwrap();

        let unread = messages.unread_inbound(contact_id, 20).await.unwrap();
        let ids: Vec<i64> = unread.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);

        assert_eq!(messages.mark_read(&ids).await.unwrap(), 2);
        assert!(messages.unread_inbound(contact_id, 20).await.unwrap().is_empty());
        assert!(messages.get(a.id).await.unwrap().unwrap().read);
    }

    #[tokio::test]
    async fn unread_inbound_respects_limit() {
        let (messages, contact_id) = setup().await;
        for i in 0..5 {
            messages.save(&inbound(contact_id, "x", i)).await.unwrap();
        }
        assert_eq!(messages.unread_inbound(contact_id, 3).await.unwrap().len(), 3);
        assert_eq!(messages.list_by_contact(contact_id, 10).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn mark_read_empty_is_noop() {
        let (messages, _) = setup().await;
        assert_eq!(messages.mark_read(&[]).await.unwrap(), 0);
    }
}
