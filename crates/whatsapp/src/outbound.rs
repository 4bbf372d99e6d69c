//! Outbound sends. Every send goes through the session's recovery policy,
//! then the message is persisted and the conversation bumped to the top.

use std::{sync::Arc, time::Duration};

use {
    tracing::{debug, info, warn},
    wabridge_common::{Contact, Message, MessageKind, time::{now_ms, now_nanos}},
    wabridge_media::{audio::VOICE_MIME, mime},
    wabridge_notify::HubEvent,
    wabridge_store::NewMessage,
};

use crate::{
    error::{Error, Result},
    jid::Jid,
    media::{MediaFolder, object_key},
    session::Session,
    transport::{ChatPresence, MediaKind, OutboundMessage},
};

/// Who is sending on behalf of the sector.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Agent whose name prefixes text messages.
    pub user_id: Option<i64>,
    /// Suppress the agent-name prefix.
    pub anonymous: bool,
}

/// Outcome of a successful send.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub whatsapp_message_id: String,
    /// `None` when the message went out but could not be persisted.
    pub message: Option<Message>,
}

/// Typing duration from an optional request value in seconds. Missing or
/// non-positive values fall back to `default`.
pub fn typing_duration(secs: Option<i64>, default: Duration) -> Duration {
    match secs {
        Some(secs) if secs > 0 => Duration::from_secs(secs.unsigned_abs()),
        _ => default,
    }
}

/// Stored side of an outbound message.
struct OutboundRecord {
    kind: MessageKind,
    content: String,
    media_url: Option<String>,
    file_name: Option<String>,
    mime_type: Option<String>,
}

impl OutboundRecord {
    fn text(content: &str) -> Self {
        Self {
            kind: MessageKind::Text,
            content: content.to_string(),
            media_url: None,
            file_name: None,
            mime_type: None,
        }
    }
}

fn recipient(raw: &str) -> Result<Jid> {
    Jid::for_recipient(raw).ok_or_else(|| Error::InvalidRecipient(raw.to_string()))
}

impl Session {
    pub async fn send_text(
        self: &Arc<Self>,
        to: &str,
        text: &str,
        opts: &SendOptions,
    ) -> Result<Delivery> {
        let jid = recipient(to)?;
        let body = match self.author_prefix(opts).await {
            Some(prefix) => format!("{prefix}{text}"),
            None => text.to_string(),
        };
        let contact = self.resolve_contact(&jid).await?;
        let message = OutboundMessage::Text(body);
        let id = self.send(&jid, &message).await?;
        Ok(self
            .finish_outbound(&jid, &contact, OutboundRecord::text(text), id, opts)
            .await)
    }

    pub async fn send_image(
        self: &Arc<Self>,
        to: &str,
        data: &[u8],
        caption: &str,
        opts: &SendOptions,
    ) -> Result<Delivery> {
        let jid = recipient(to)?;
        let contact = self.resolve_contact(&jid).await?;
        let mime_type = mime::detect(data);
        let key = object_key(
            self.sector_id(),
            MediaFolder::Images,
            &format!("{}.{}", now_nanos(), mime::extension(mime_type)),
        );
        let staged = self.stage_media(data, mime_type, &key, MediaKind::Image).await?;
        let message = OutboundMessage::Image {
            media: staged.upload,
            mime_type: mime_type.to_string(),
            caption: caption.to_string(),
        };
        let id = self.send(&jid, &message).await?;
        let record = OutboundRecord {
            kind: MessageKind::Image,
            content: caption.to_string(),
            media_url: Some(staged.public_url),
            file_name: Some(key),
            mime_type: Some(mime_type.to_string()),
        };
        Ok(self.finish_outbound(&jid, &contact, record, id, opts).await)
    }

    /// Send a voice note. When the audio cannot be transcoded the original
    /// bytes go out as a document named `audio.{ext}` instead.
    pub async fn send_audio(
        self: &Arc<Self>,
        to: &str,
        data: &[u8],
        opts: &SendOptions,
    ) -> Result<Delivery> {
        let jid = recipient(to)?;
        let prepared = match self.ctx.audio.prepare(data).await {
            Ok(prepared) => prepared,
            Err(e) => {
                let ext = mime::extension(mime::detect(data));
                warn!(sector_id = self.sector_id(), error = %e, "audio transcode failed, sending as document");
                return self.send_document(to, data, &format!("audio.{ext}"), opts).await;
            },
        };

        let contact = self.resolve_contact(&jid).await?;
        let key = object_key(
            self.sector_id(),
            MediaFolder::Audios,
            &format!("{}.ogg", now_nanos()),
        );
        let staged = self
            .stage_media(&prepared.data, VOICE_MIME, &key, MediaKind::Audio)
            .await?;
        let message = OutboundMessage::Audio {
            media: staged.upload,
            mime_type: VOICE_MIME.to_string(),
            seconds: prepared.duration_secs,
            waveform: prepared.waveform,
            voice_note: true,
        };
        let id = self.send(&jid, &message).await?;
        let record = OutboundRecord {
            kind: MessageKind::Audio,
            content: String::new(),
            media_url: Some(staged.public_url),
            file_name: Some(key),
            mime_type: Some(VOICE_MIME.to_string()),
        };
        Ok(self.finish_outbound(&jid, &contact, record, id, opts).await)
    }

    pub async fn send_document(
        self: &Arc<Self>,
        to: &str,
        data: &[u8],
        file_name: &str,
        opts: &SendOptions,
    ) -> Result<Delivery> {
        let jid = recipient(to)?;
        let contact = self.resolve_contact(&jid).await?;
        let mime_type = mime::detect(data);
        let key = object_key(
            self.sector_id(),
            MediaFolder::Documents,
            &format!("{}_{}", now_nanos(), file_name.replace('/', "_")),
        );
        let staged = self
            .stage_media(data, mime_type, &key, MediaKind::Document)
            .await?;
        let message = OutboundMessage::Document {
            media: staged.upload,
            mime_type: mime_type.to_string(),
            file_name: file_name.to_string(),
        };
        let id = self.send(&jid, &message).await?;
        let record = OutboundRecord {
            kind: MessageKind::Document,
            content: file_name.to_string(),
            media_url: Some(staged.public_url),
            file_name: Some(file_name.to_string()),
            mime_type: Some(mime_type.to_string()),
        };
        Ok(self.finish_outbound(&jid, &contact, record, id, opts).await)
    }

    /// Show "typing…" to `to` for `duration`, then clear it. Fails fast
    /// when the session is not connected.
    pub async fn send_typing(&self, to: &str, duration: Duration) -> Result<()> {
        if !self.is_connected().await {
            return Err(Error::NotConnected(self.sector_id()));
        }
        let jid = recipient(to)?;
        let client = self.require_client().await?;

        client
            .send_presence_available()
            .await
            .map_err(Error::SendFailed)?;
        client
            .send_chat_presence(&jid, ChatPresence::Composing)
            .await
            .map_err(Error::SendFailed)?;
        tokio::time::sleep(duration).await;
        client
            .send_chat_presence(&jid, ChatPresence::Paused)
            .await
            .map_err(Error::SendFailed)?;
        debug!(sector_id = self.sector_id(), to = %jid, ?duration, "typing indicator sent");
        Ok(())
    }

    async fn send(self: &Arc<Self>, jid: &Jid, message: &OutboundMessage) -> Result<String> {
        self.with_recovery("send", move |client| async move {
            client.send_message(jid, message).await
        })
        .await
    }

    /// The recipient's contact row, created on first contact. Resolved
    /// before anything goes out so every delivered message has an owner.
    async fn resolve_contact(&self, jid: &Jid) -> Result<Contact> {
        self.ctx
            .stores
            .contacts
            .create_if_not_exists(self.sector_id(), &jid.user)
            .await
            .map_err(|e| {
                warn!(sector_id = self.sector_id(), to = %jid, error = %e, "recipient contact unavailable");
                Error::from(e)
            })
    }

    async fn author_prefix(&self, opts: &SendOptions) -> Option<String> {
        let user_id = opts.user_id.filter(|_| !opts.anonymous)?;
        match self.ctx.stores.users.name(user_id).await {
            Ok(Some(name)) if !name.trim().is_empty() => Some(format!("*{}*:\n\n", name.trim())),
            Ok(_) => None,
            Err(e) => {
                warn!(sector_id = self.sector_id(), user_id, error = %e, "agent name lookup failed");
                None
            },
        }
    }

    /// Persist a delivered message and kick off the read-marking and
    /// reordering side effects.
    async fn finish_outbound(
        self: &Arc<Self>,
        jid: &Jid,
        contact: &Contact,
        record: OutboundRecord,
        whatsapp_message_id: String,
        opts: &SendOptions,
    ) -> Delivery {
        let sector_id = self.sector_id();
        info!(sector_id, to = %jid, kind = record.kind.as_str(), "message sent");

        let new = NewMessage {
            sector_id,
            contact_id: contact.id,
            content: record.content,
            kind: record.kind,
            media_url: record.media_url,
            file_name: record.file_name,
            mime_type: record.mime_type,
            whatsapp_id: Some(whatsapp_message_id.clone()),
            sent: true,
            read: true,
            user_id: opts.user_id,
            sent_at: now_ms(),
        };
        let message = self.record_message(contact, new).await;

        self.spawn_mark_previous_read(contact, jid.clone());
        self.ctx.ordering.spawn_move_to_front(sector_id, contact.id);

        Delivery {
            whatsapp_message_id,
            message,
        }
    }

    fn spawn_mark_previous_read(self: &Arc<Self>, contact: &Contact, chat: Jid) {
        let session = Arc::clone(self);
        let contact_id = contact.id;
        tokio::spawn(async move {
            match session.mark_previous_read(contact_id, &chat).await {
                Ok(0) => {},
                Ok(marked) => debug!(sector_id = session.sector_id(), contact_id, marked, "previous messages marked read"),
                Err(e) => warn!(sector_id = session.sector_id(), contact_id, error = %e, "failed to mark previous messages read"),
            }
        });
    }

    /// Mark the contact's most recent unread inbound messages as read, both
    /// on the protocol side and in the store.
    pub(crate) async fn mark_previous_read(&self, contact_id: i64, chat: &Jid) -> Result<usize> {
        let messages = &self.ctx.stores.messages;
        let unread = messages
            .unread_inbound(contact_id, self.ctx.sessions.read_batch)
            .await?;
        if unread.is_empty() {
            return Ok(0);
        }

        let receipts: Vec<String> = unread
            .iter()
            .filter_map(|m| m.whatsapp_id.clone())
            .collect();
        if !receipts.is_empty()
            && let Some(client) = self.current_client().await
            && let Err(e) = client.mark_read(&receipts, chat).await
        {
            debug!(sector_id = self.sector_id(), error = %e, "read receipts not sent");
        }

        let ids: Vec<i64> = unread.iter().map(|m| m.id).collect();
        messages.mark_read(&ids).await?;
        for mut message in unread {
            message.read = true;
            self.ctx.hub.publish(&HubEvent::message(&message));
        }
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_duration_defaults() {
        let default = Duration::from_secs(5);
        assert_eq!(typing_duration(None, default), default);
        assert_eq!(typing_duration(Some(0), default), default);
        assert_eq!(typing_duration(Some(-3), default), default);
        assert_eq!(typing_duration(Some(2), default), Duration::from_secs(2));
    }

    #[test]
    fn recipient_must_contain_digits() {
        assert!(matches!(recipient("n/a"), Err(Error::InvalidRecipient(_))));
        assert_eq!(recipient("11999998888").unwrap().user, "5511999998888");
    }
}
