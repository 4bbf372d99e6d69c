//! Inbound message handling: filter, resolve the contact, store media and
//! persist.

use std::sync::Arc;

use {
    anyhow::Context as _,
    tracing::{debug, warn},
    wabridge_common::{Contact, MessageKind, SectorId, time::now_ms},
    wabridge_media::mime,
    wabridge_notify::HubEvent,
    wabridge_store::NewMessage,
};

use crate::{
    error::{Error, Result},
    media::{MediaFolder, object_key},
    session::Session,
    transport::{InboundContent, InboundMessage, MediaRef},
};

/// What an inbound payload turns into once stored.
#[derive(Debug, PartialEq)]
pub(crate) struct Classified<'a> {
    pub kind: MessageKind,
    pub content: String,
    pub media: Option<&'a MediaRef>,
    pub file_name: Option<String>,
}

impl<'a> Classified<'a> {
    fn text(kind: MessageKind, content: &str) -> Self {
        Self {
            kind,
            content: content.to_string(),
            media: None,
            file_name: None,
        }
    }

    fn media(kind: MessageKind, content: &str, media: &'a MediaRef) -> Self {
        Self {
            kind,
            content: content.to_string(),
            media: Some(media),
            file_name: None,
        }
    }
}

/// Map a payload to its stored kind. `None` for payloads that are never
/// persisted.
pub(crate) fn classify(content: &InboundContent) -> Option<Classified<'_>> {
    use InboundContent as C;
    let classified = match content {
        C::Text(text) | C::ExtendedText(text) => Classified::text(MessageKind::Text, text),
        C::Image { media, caption } => Classified::media(MessageKind::Image, caption, media),
        C::Audio { media } => Classified::media(MessageKind::Audio, "", media),
        C::Video { media, caption } => Classified::media(MessageKind::Video, caption, media),
        C::Sticker { media } => Classified::media(MessageKind::Sticker, "", media),
        C::Document { media, file_name } => Classified {
            file_name: Some(file_name.clone()),
            ..Classified::media(MessageKind::Document, file_name, media)
        },
        C::List { description } => Classified::text(MessageKind::List, description),
        C::Buttons { content } => Classified::text(MessageKind::Buttons, content),
        C::Template {
            text,
            image: Some(image),
        } => Classified::media(MessageKind::Image, text, image),
        C::Template { text, image: None } => Classified::text(MessageKind::Template, text),
        C::Ephemeral | C::ViewOnce | C::DeviceSent | C::StatusUpdate | C::Unsupported => {
            return None;
        },
    };
    Some(classified)
}

/// Status posts, broadcasts and wrapper envelopes are dropped unseen.
pub(crate) fn is_ignored(message: &InboundMessage) -> bool {
    message.chat.is_broadcast()
        || matches!(
            message.content,
            InboundContent::Ephemeral
                | InboundContent::ViewOnce
                | InboundContent::DeviceSent
                | InboundContent::StatusUpdate
        )
}

/// Blob key for an inbound attachment, named after the protocol message id.
fn inbound_key(sector_id: SectorId, message_id: &str, classified: &Classified<'_>, mime_type: &str) -> String {
    let ext = mime::extension(mime_type);
    match classified.kind {
        MessageKind::Document => {
            let name = classified.file_name.as_deref().unwrap_or("document");
            object_key(sector_id, MediaFolder::Documents, &format!("{message_id}_{}", name.replace('/', "_")))
        },
        MessageKind::Audio => object_key(sector_id, MediaFolder::Audios, &format!("{message_id}.{ext}")),
        MessageKind::Video => object_key(sector_id, MediaFolder::Videos, &format!("{message_id}.{ext}")),
        MessageKind::Sticker => object_key(sector_id, MediaFolder::Stickers, &format!("{message_id}.webp")),
        _ => object_key(sector_id, MediaFolder::Images, &format!("{message_id}.{ext}")),
    }
}

impl Session {
    pub(crate) async fn handle_inbound(self: Arc<Self>, message: InboundMessage) {
        let sector_id = self.sector_id();
        if is_ignored(&message) {
            debug!(sector_id, chat = %message.chat, "ignoring status or broadcast traffic");
            return;
        }
        if let Err(e) = self.process_inbound(&message).await {
            warn!(sector_id, message_id = %message.id, error = %e, "failed to handle inbound message");
        }
    }

    async fn process_inbound(self: &Arc<Self>, message: &InboundMessage) -> Result<()> {
        let sector_id = self.sector_id();
        let contact = self
            .ctx
            .stores
            .contacts
            .create_if_not_exists(sector_id, &message.chat.user)
            .await?;
        let contact = self.refresh_profile(contact, message).await;
        self.ctx.ordering.spawn_move_to_front(sector_id, contact.id);

        let Some(classified) = classify(&message.content) else {
            debug!(sector_id, message_id = %message.id, "unsupported payload ignored");
            return Ok(());
        };

        let (media_url, file_name, mime_type) = match classified.media {
            Some(media) => {
                let key = inbound_key(sector_id, &message.id, &classified, &media.mime_type);
                let url = match self.store_inbound_media(media, &key).await {
                    Ok(url) => Some(url),
                    Err(e) => {
                        warn!(sector_id, message_id = %message.id, error = %e, "inbound media not stored");
                        None
                    },
                };
                let file_name = classified.file_name.clone().or(Some(key));
                (url, file_name, Some(media.mime_type.clone()))
            },
            None => (None, None, None),
        };

        let new = NewMessage {
            sector_id,
            contact_id: contact.id,
            content: classified.content,
            kind: classified.kind,
            media_url,
            file_name,
            mime_type,
            whatsapp_id: Some(message.id.clone()),
            sent: false,
            read: false,
            user_id: None,
            sent_at: message.timestamp_ms.unwrap_or_else(now_ms),
        };
        self.record_message(&contact, new).await;
        Ok(())
    }

    async fn store_inbound_media(&self, media: &MediaRef, key: &str) -> Result<String> {
        let client = self.ready_client().await?;
        let data = client.download(media).await.map_err(Error::SendFailed)?;
        self.ctx
            .blob
            .upload(&data, key, &media.mime_type)
            .await
            .map_err(Error::Blob)
    }

    /// Fill in push name and avatar for contacts created from bare numbers.
    async fn refresh_profile(&self, contact: Contact, message: &InboundMessage) -> Contact {
        let sector_id = self.sector_id();
        let name = message
            .push_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty() && *n != contact.name && contact.name == contact.number);
        let avatar = if contact.has_avatar() {
            None
        } else {
            match self.fetch_avatar(&contact, message).await {
                Ok(url) => url,
                Err(e) => {
                    debug!(sector_id, contact_id = contact.id, error = %e, "avatar not refreshed");
                    None
                },
            }
        };
        if name.is_none() && avatar.is_none() {
            return contact;
        }

        match self
            .ctx
            .stores
            .contacts
            .update_profile(contact.id, name, avatar.as_deref())
            .await
        {
            Ok(updated) => {
                self.ctx.hub.publish(&HubEvent::contact(&updated));
                updated
            },
            Err(e) => {
                warn!(sector_id, contact_id = contact.id, error = %e, "failed to update contact profile");
                contact
            },
        }
    }

    async fn fetch_avatar(&self, contact: &Contact, message: &InboundMessage) -> anyhow::Result<Option<String>> {
        let Some(client) = self.current_client().await else {
            return Ok(None);
        };
        let Some(url) = client.profile_picture_url(&message.chat).await? else {
            return Ok(None);
        };
        let bytes = self
            .ctx
            .http
            .get(&url)
            .send()
            .await
            .context("profile picture request failed")?
            .error_for_status()?
            .bytes()
            .await?;
        let key = object_key(
            self.sector_id(),
            MediaFolder::Avatars,
            &format!("{}.jpg", contact.number),
        );
        let stored = self.ctx.blob.upload(&bytes, &key, "image/jpeg").await?;
        Ok(Some(stored))
    }
}
