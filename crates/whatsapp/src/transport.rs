//! Boundary to the WhatsApp multi-device protocol.
//!
//! The session core only talks to a [`ProtocolClient`]; a [`ClientFactory`]
//! builds one per sector on top of that sector's [`LocalSessionStore`].

use std::sync::Arc;

use {
    async_trait::async_trait,
    tokio::sync::broadcast,
    wabridge_common::SectorId,
};

use crate::{jid::Jid, local_store::LocalSessionStore};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("local session storage is locked")]
    StorageLocked,

    #[error("untrusted identity for {0}")]
    UntrustedIdentity(String),

    #[error("client is not connected")]
    NotConnected,

    #[error("account push name is not set")]
    PushNameMissing,

    #[error("no protocol transport is available")]
    Unavailable,

    #[error("session storage error: {0}")]
    Storage(String),

    #[error("server rejected the request with status {0}")]
    Server(u16),

    #[error("{0}")]
    Other(String),
}

/// How a failed operation can be salvaged before its single retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Move the local storage aside and rebuild the client.
    RebuildStorage,
    /// Reconnect the existing client.
    Reconnect,
}

impl TransportError {
    pub fn recovery(&self) -> Option<Recovery> {
        match self {
            Self::StorageLocked => Some(Recovery::RebuildStorage),
            Self::UntrustedIdentity(_) | Self::NotConnected | Self::PushNameMissing => {
                Some(Recovery::Reconnect)
            },
            Self::Unavailable | Self::Storage(_) | Self::Server(_) | Self::Other(_) => None,
        }
    }
}

// ── Events ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A fresh pairing payload to show as a QR code.
    PairingCode(String),
    Connected,
    Disconnected,
    LoggedOut,
    Message(Box<InboundMessage>),
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Protocol message id.
    pub id: String,
    /// Conversation the message arrived in.
    pub chat: Jid,
    pub push_name: Option<String>,
    /// Sender timestamp, epoch ms.
    pub timestamp_ms: Option<i64>,
    pub content: InboundContent,
}

/// Decrypted payload of an inbound message.
#[derive(Debug, Clone)]
pub enum InboundContent {
    Text(String),
    ExtendedText(String),
    Image { media: MediaRef, caption: String },
    Audio { media: MediaRef },
    Document { media: MediaRef, file_name: String },
    Video { media: MediaRef, caption: String },
    Sticker { media: MediaRef },
    List { description: String },
    Buttons { content: String },
    Template { text: String, image: Option<MediaRef> },
    Ephemeral,
    ViewOnce,
    DeviceSent,
    StatusUpdate,
    Unsupported,
}

// ── Media ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
    Sticker,
}

/// Encrypted media reference carried by an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
    pub mime_type: String,
}

/// Result of uploading media to the protocol's media servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text(String),
    Image {
        media: UploadedMedia,
        mime_type: String,
        caption: String,
    },
    Audio {
        media: UploadedMedia,
        mime_type: String,
        seconds: u32,
        waveform: Vec<u8>,
        voice_note: bool,
    },
    Document {
        media: UploadedMedia,
        mime_type: String,
        file_name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPresence {
    Composing,
    Paused,
}

// ── Client ───────────────────────────────────────────────────────────────────

/// One authenticated protocol connection.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open the connection. Pairing and login progress is reported as events.
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn is_logged_in(&self) -> bool;

    /// Events emitted after this call.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    async fn upload(&self, data: &[u8], kind: MediaKind) -> Result<UploadedMedia, TransportError>;

    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, TransportError>;

    /// Send and return the protocol message id.
    async fn send_message(
        &self,
        to: &Jid,
        message: &OutboundMessage,
    ) -> Result<String, TransportError>;

    async fn send_presence_available(&self) -> Result<(), TransportError>;

    async fn send_chat_presence(
        &self,
        to: &Jid,
        presence: ChatPresence,
    ) -> Result<(), TransportError>;

    async fn mark_read(&self, message_ids: &[String], chat: &Jid) -> Result<(), TransportError>;

    async fn profile_picture_url(&self, jid: &Jid) -> Result<Option<String>, TransportError>;
}

#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(
        &self,
        sector_id: SectorId,
        storage: LocalSessionStore,
        device_name: &str,
    ) -> Result<Arc<dyn ProtocolClient>, TransportError>;

    /// Whether this factory can ever produce a working client.
    fn is_available(&self) -> bool {
        true
    }
}

/// Factory used when no protocol transport is linked in. Every connect
/// attempt fails with [`TransportError::Unavailable`]; the gateway will not
/// serve with it.
pub struct NoopClientFactory;

#[async_trait]
impl ClientFactory for NoopClientFactory {
    async fn create(
        &self,
        _sector_id: SectorId,
        _storage: LocalSessionStore,
        _device_name: &str,
    ) -> Result<Arc<dyn ProtocolClient>, TransportError> {
        Err(TransportError::Unavailable)
    }

    fn is_available(&self) -> bool {
        false
    }
}
