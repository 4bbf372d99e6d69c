use std::collections::BTreeMap;

use {
    serde::{Deserialize, Serialize},
    wabridge_common::{Contact, Message, MessageStatus, SectorId, time::rfc3339_ms},
};

/// One frame sent to subscribers: `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum HubEvent {
    Message(MessageEvent),
    Contact(ContactEvent),
    UnreadStatus(UnreadStatusEvent),
    ContactsList(ContactsListEvent),
}

impl HubEvent {
    /// The sector whose subscribers receive this event.
    pub fn sector_id(&self) -> SectorId {
        match self {
            Self::Message(e) => e.sector_id,
            Self::Contact(e) => e.sector_id,
            Self::UnreadStatus(e) => e.sector_id,
            Self::ContactsList(e) => e.sector_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Contact(_) => "contact",
            Self::UnreadStatus(_) => "unread_status",
            Self::ContactsList(_) => "contacts_list",
        }
    }

    pub fn message(msg: &Message) -> Self {
        Self::Message(msg.into())
    }

    pub fn contact(contact: &Contact) -> Self {
        Self::Contact(contact.into())
    }

    pub fn unread_status(sector_id: SectorId, unread_status: BTreeMap<i64, bool>) -> Self {
        Self::UnreadStatus(UnreadStatusEvent {
            sector_id,
            unread_status,
        })
    }

    pub fn contacts_list(sector_id: SectorId, contacts: &[Contact]) -> Self {
        Self::ContactsList(ContactsListEvent {
            sector_id,
            contacts: contacts.iter().map(Into::into).collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub id: i64,
    #[serde(rename = "contactID")]
    pub contact_id: i64,
    pub sector_id: SectorId,
    pub content: String,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// RFC 3339, UTC.
    pub sent_at: String,
    pub is_sent: bool,
    pub is_read: bool,
    pub status: MessageStatus,
}

impl From<&Message> for MessageEvent {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            contact_id: m.contact_id,
            sector_id: m.sector_id,
            content: m.content.clone(),
            media_type: m.kind.as_str().to_string(),
            media_url: m.media_url.clone(),
            file_name: m.file_name.clone(),
            mime_type: m.mime_type.clone(),
            sent_at: rfc3339_ms(m.sent_at),
            is_sent: m.sent,
            is_read: m.read,
            status: m.status(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactEvent {
    pub id: i64,
    pub sector_id: SectorId,
    pub name: String,
    pub number: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub is_viewed: bool,
    pub contact_status: String,
    pub created_at: String,
    pub updated_at: String,
    pub order: i64,
}

impl From<&Contact> for ContactEvent {
    fn from(c: &Contact) -> Self {
        Self {
            id: c.id,
            sector_id: c.sector_id,
            name: c.name.clone(),
            number: c.number.clone(),
            avatar_url: c.avatar_url.clone(),
            is_viewed: c.is_viewed,
            contact_status: c.status.clone(),
            created_at: rfc3339_ms(c.created_at),
            updated_at: rfc3339_ms(c.updated_at),
            order: c.rank,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadStatusEvent {
    pub sector_id: SectorId,
    /// Contact id → viewed flag.
    pub unread_status: BTreeMap<i64, bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactsListEvent {
    pub sector_id: SectorId,
    pub contacts: Vec<ContactEvent>,
}

#[cfg(test)]
mod tests {
    use {super::*, wabridge_common::MessageKind};

    fn message() -> Message {
        Message {
            id: 41,
            sector_id: 7,
            contact_id: 3,
            content: "hi".into(),
            kind: MessageKind::Text,
            media_url: None,
            file_name: None,
            mime_type: None,
            whatsapp_id: Some("ABC".into()),
            sent: true,
            read: false,
            user_id: None,
            sent_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn message_frame_shape() {
        let json = serde_json::to_value(HubEvent::message(&message())).unwrap();
        assert_eq!(json["type"], "message");
        let payload = &json["payload"];
        assert_eq!(payload["id"], 41);
        assert_eq!(payload["contactID"], 3);
        assert_eq!(payload["sectorId"], 7);
        assert_eq!(payload["mediaType"], "text");
        assert_eq!(payload["isSent"], true);
        assert_eq!(payload["isRead"], false);
        assert_eq!(payload["status"], "sent");
        assert_eq!(payload["sentAt"], "2023-11-14T22:13:20Z");
        assert!(payload.get("mediaUrl").is_none());
    }

    #[test]
    fn unread_status_keys_are_strings() {
        let mut map = BTreeMap::new();
        map.insert(3, false);
        map.insert(9, true);
        let json = serde_json::to_value(HubEvent::unread_status(7, map)).unwrap();
        assert_eq!(json["type"], "unread_status");
        assert_eq!(json["payload"]["unreadStatus"]["3"], false);
        assert_eq!(json["payload"]["unreadStatus"]["9"], true);
    }

    #[test]
    fn contacts_list_round_trips() {
        let contact = Contact {
            id: 3,
            sector_id: 7,
            name: "Maria".into(),
            number: "5511900000001".into(),
            avatar_url: None,
            is_viewed: false,
            status: "Novo".into(),
            priority: "low".into(),
            rank: 1,
            created_at: 0,
            updated_at: 0,
        };
        let event = HubEvent::contacts_list(7, &[contact]);
        let text = serde_json::to_string(&event).unwrap();
        let back: HubEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.sector_id(), 7);
        assert_eq!(back.kind(), "contacts_list");
    }
}
