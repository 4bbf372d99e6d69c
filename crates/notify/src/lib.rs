//! Notification Hub: live subscribers keyed by sector and the typed events
//! fanned out to them.

pub mod events;
pub mod hub;

pub use {
    events::{ContactEvent, ContactsListEvent, HubEvent, MessageEvent, UnreadStatusEvent},
    hub::{NotificationHub, Subscription},
};
