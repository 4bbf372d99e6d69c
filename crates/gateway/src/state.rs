use std::sync::Arc;

use {wabridge_notify::NotificationHub, wabridge_whatsapp::SessionRegistry};

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared state behind every HTTP and WebSocket handler.
pub struct GatewayState {
    pub registry: Arc<SessionRegistry>,
    /// Same hub the sessions publish to.
    pub hub: Arc<NotificationHub>,
    pub hostname: String,
    pub version: String,
}

impl GatewayState {
    pub fn new(registry: Arc<SessionRegistry>) -> Arc<Self> {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".into());
        Arc::new(Self {
            hub: Arc::clone(&registry.context().hub),
            registry,
            hostname,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}
