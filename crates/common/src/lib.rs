//! Shared types and helpers used across wabridge crates.

pub mod phone;
pub mod time;
pub mod types;

pub use types::{
    ConnectionStatus, Contact, Message, MessageKind, MessageStatus, SectorId, TenantConnection,
};
