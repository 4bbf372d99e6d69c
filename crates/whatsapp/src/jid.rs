//! Protocol addresses (`user@server`).

use std::fmt;

use {
    serde::{Deserialize, Serialize},
    wabridge_common::phone::{USER_SERVER, normalize_number},
};

const BROADCAST_SERVER: &str = "broadcast";
const GROUP_SERVER: &str = "g.us";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid {
    pub user: String,
    pub server: String,
}

impl Jid {
    /// Address of a regular user account.
    pub fn user(number: &str) -> Self {
        Self {
            user: number.to_string(),
            server: USER_SERVER.to_string(),
        }
    }

    /// Parse `user[:device][@server]`. The device suffix is dropped so every
    /// linked device of an account maps to the same address.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (user, server) = raw.split_once('@').unwrap_or((raw, USER_SERVER));
        let user = user.split(':').next().unwrap_or(user);
        if user.is_empty() || server.is_empty() {
            return None;
        }
        Some(Self {
            user: user.to_string(),
            server: server.to_string(),
        })
    }

    /// Address for an outbound recipient given as a loosely formatted phone
    /// number or an existing address.
    pub fn for_recipient(raw: &str) -> Option<Self> {
        let number = normalize_number(raw);
        if number.is_empty() {
            return None;
        }
        Some(Self::user(&number))
    }

    /// Status updates and broadcast lists, never routed to a contact.
    pub fn is_broadcast(&self) -> bool {
        self.server == BROADCAST_SERVER || self.to_string().contains("status")
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}
