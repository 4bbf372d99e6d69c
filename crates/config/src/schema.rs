//! Config schema types (server, database, session storage, blob, media, sessions).

use std::{path::PathBuf, time::Duration};

use {
    secrecy::Secret,
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WabridgeConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub blob: BlobConfig,
    pub media: MediaConfig,
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection string.
    pub url: String,
    pub max_connections: u32,
    /// How long a writer waits for SQLite's write lock before failing.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://wabridge.db?mode=rwc".into(),
            max_connections: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Where per-sector protocol session storage lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to `~/.wabridge/sessions` when unset.
    pub data_dir: Option<PathBuf>,
    /// Discard leftover session storage when a sector connects for the first
    /// time in this process, forcing a fresh pairing.
    pub reset_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            reset_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    #[default]
    Local,
    Http,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    pub backend: BlobBackend,
    /// Root directory for the local backend. Defaults to `~/.wabridge/media`.
    pub local_dir: Option<PathBuf>,
    /// Base URL that uploaded keys are appended to when building public links.
    pub public_base_url: String,
    /// Object-store endpoint for the HTTP backend (`PUT {endpoint}/{key}`).
    pub endpoint: Option<String>,
    /// Bearer token for the HTTP backend. Prefer `${ENV_VAR}` substitution.
    pub token: Option<Secret<String>>,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::Local,
            local_dir: None,
            public_base_url: "http://127.0.0.1:8080/media".into(),
            endpoint: None,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
    /// Upper bound for a single ffmpeg/ffprobe invocation.
    pub command_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
            command_timeout_secs: 60,
        }
    }
}

impl MediaConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Timing knobs for session lifecycle, pairing and notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Pairing codes older than this are never handed out.
    pub pairing_ttl_secs: u64,
    pub pairing_poll_interval_ms: u64,
    pub pairing_poll_attempts: u32,
    pub reconnect_timeout_ms: u64,
    /// Upper bound on `close_all` during shutdown.
    pub close_timeout_ms: u64,
    pub typing_default_secs: u64,
    /// Delay before republishing contact list / unread state.
    pub republish_delay_ms: u64,
    /// Pause between storage-recovery steps so file handles are released.
    pub recovery_settle_ms: u64,
    /// Max prior inbound messages marked read after an outbound send.
    pub read_batch: u32,
    /// Platform name reported to the phone during pairing.
    pub device_name: String,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            pairing_ttl_secs: 30,
            pairing_poll_interval_ms: 1_000,
            pairing_poll_attempts: 10,
            reconnect_timeout_ms: 15_000,
            close_timeout_ms: 5_000,
            typing_default_secs: 5,
            republish_delay_ms: 500,
            recovery_settle_ms: 2_000,
            read_batch: 20,
            device_name: "wabridge".into(),
        }
    }
}

impl SessionsConfig {
    pub fn pairing_ttl(&self) -> Duration {
        Duration::from_secs(self.pairing_ttl_secs)
    }

    pub fn pairing_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pairing_poll_interval_ms)
    }

    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn typing_default(&self) -> Duration {
        Duration::from_secs(self.typing_default_secs)
    }

    pub fn republish_delay(&self) -> Duration {
        Duration::from_millis(self.republish_delay_ms)
    }

    pub fn recovery_settle(&self) -> Duration {
        Duration::from_millis(self.recovery_settle_ms)
    }
}
