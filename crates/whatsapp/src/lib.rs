//! Multi-tenant WhatsApp session core.
//!
//! One [`Session`] per sector wraps a protocol client behind the
//! [`ProtocolClient`] trait. The [`SessionRegistry`] owns the live sessions,
//! drives pairing and routes outbound sends; inbound traffic is persisted and
//! fanned out through the notification hub.

pub mod context;
pub mod error;
pub mod inbound;
pub mod jid;
pub mod local_store;
pub mod media;
pub mod ordering;
pub mod outbound;
pub mod pairing;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use {
    context::BridgeContext,
    error::{Error, Result},
    jid::Jid,
    local_store::LocalSessionStore,
    ordering::ContactOrdering,
    outbound::{Delivery, SendOptions, typing_duration},
    pairing::PairingOutcome,
    registry::SessionRegistry,
    session::Session,
    transport::{
        ChatPresence, ClientFactory, InboundContent, InboundMessage, MediaKind, MediaRef,
        NoopClientFactory, OutboundMessage, ProtocolClient, Recovery, TransportError,
        TransportEvent, UploadedMedia,
    },
};
