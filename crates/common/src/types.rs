use std::fmt;

use serde::{Deserialize, Serialize};

/// Tenant identifier. A sector owns one WhatsApp session, its contacts and messages.
pub type SectorId = i64;

// ── Connection status ────────────────────────────────────────────────────────

/// Persisted connection state of a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// No connection row exists for the sector yet.
    NotFound,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::NotFound => "not_found",
        }
    }

    /// Parse a stored status. Unknown values are treated as disconnected.
    pub fn parse(s: &str) -> Self {
        match s {
            "connecting" => Self::Connecting,
            "connected" => Self::Connected,
            "not_found" => Self::NotFound,
            _ => Self::Disconnected,
        }
    }

    /// Human-readable description used by the outward API.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Connected => "WhatsApp is connected",
            Self::Connecting => "waiting for the QR code to be scanned",
            Self::Disconnected => "WhatsApp is disconnected",
            Self::NotFound => "no connection has been started for this sector",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per sector, created lazily on the first connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConnection {
    pub sector_id: SectorId,
    pub status: ConnectionStatus,
    /// Rendered pairing code (`data:` URL), if one is pending.
    pub qrcode: Option<String>,
    /// Milliseconds since the epoch.
    pub qrcode_generated_at: Option<i64>,
    pub last_connected_at: Option<i64>,
    pub last_disconnected_at: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── Contacts ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub sector_id: SectorId,
    pub name: String,
    /// Normalized phone number, without the protocol server suffix.
    pub number: String,
    pub avatar_url: Option<String>,
    pub is_viewed: bool,
    /// Funnel status label, e.g. "Novo".
    pub status: String,
    pub priority: String,
    /// Position in the most-recently-active ordering. 1 is the most recent,
    /// 0 means not ranked yet.
    pub rank: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Contact {
    pub fn has_avatar(&self) -> bool {
        self.avatar_url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

// ── Messages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Document,
    Video,
    Sticker,
    List,
    Buttons,
    Template,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Video => "video",
            Self::Sticker => "sticker",
            Self::List => "list",
            Self::Buttons => "buttons",
            Self::Template => "template",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "image" => Self::Image,
            "audio" => Self::Audio,
            "document" => Self::Document,
            "video" => Self::Video,
            "sticker" => Self::Sticker,
            "list" => Self::List,
            "buttons" => Self::Buttons,
            "template" => Self::Template,
            _ => Self::Text,
        }
    }
}

/// Delivery label carried by `message` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Received,
    Read,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Received => "received",
            Self::Read => "read",
        }
    }
}

/// A persisted chat message. Append-only apart from the read flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sector_id: SectorId,
    pub contact_id: i64,
    /// Body text, caption or file name depending on `kind`.
    pub content: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    /// Protocol-level message id, used for read receipts.
    pub whatsapp_id: Option<String>,
    /// `true` when sent by the bridge, `false` for inbound traffic.
    pub sent: bool,
    pub read: bool,
    pub user_id: Option<i64>,
    pub sent_at: i64,
}

impl Message {
    pub fn status(&self) -> MessageStatus {
        if self.read {
            MessageStatus::Read
        } else if self.sent {
            MessageStatus::Sent
        } else {
            MessageStatus::Received
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(ConnectionStatus::Disconnected)]
    #[case(ConnectionStatus::Connecting)]
    #[case(ConnectionStatus::Connected)]
    #[case(ConnectionStatus::NotFound)]
    fn status_parses_its_own_label(#[case] status: ConnectionStatus) {
        assert_eq!(ConnectionStatus::parse(status.as_str()), status);
    }

    #[test]
    fn unknown_status_is_disconnected() {
        assert_eq!(
            ConnectionStatus::parse("garbage"),
            ConnectionStatus::Disconnected
        );
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionStatus::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }

    #[test]
    fn message_status_label() {
        let mut msg = Message {
            id: 1,
            sector_id: 7,
            contact_id: 3,
            content: "hi".into(),
            kind: MessageKind::Text,
            media_url: None,
            file_name: None,
            mime_type: None,
            whatsapp_id: None,
            sent: false,
            read: false,
            user_id: None,
            sent_at: 0,
        };
        assert_eq!(msg.status(), MessageStatus::Received);
        msg.sent = true;
        assert_eq!(msg.status(), MessageStatus::Sent);
        msg.read = true;
        assert_eq!(msg.status(), MessageStatus::Read);
    }

    #[test]
    fn unknown_kind_falls_back_to_text() {
        assert_eq!(MessageKind::parse("sticker"), MessageKind::Sticker);
        assert_eq!(MessageKind::parse("reaction"), MessageKind::Text);
    }
}
