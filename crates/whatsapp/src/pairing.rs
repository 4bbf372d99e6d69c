//! QR pairing: restart the sector's session from scratch and wait, bounded,
//! for a fresh pairing code (or for the phone to log in on its own).

use std::{sync::Arc, time::Duration};

use {
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    qrcode::{EcLevel, QrCode, render::svg, types::QrError},
    serde::Serialize,
    tracing::{debug, info},
    wabridge_common::{ConnectionStatus, SectorId, time::now_ms},
};

use crate::{
    error::{Error, Result},
    registry::SessionRegistry,
    session::Session,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PairingOutcome {
    /// A displayable pairing payload (`data:image/svg+xml;base64,...`).
    Code { payload: String, generated_at: i64 },
    /// The sector was already connected; nothing was restarted.
    AlreadyConnected,
    /// The phone logged in while we waited for a code.
    ConnectedDuringPairing,
}

/// Render a raw pairing string as an SVG QR code data URL.
pub fn render_pairing_payload(code: &str) -> Result<String, QrError> {
    let qr = QrCode::with_error_correction_level(code.as_bytes(), EcLevel::M)?;
    let image = qr
        .render::<svg::Color<'_>>()
        .min_dimensions(256, 256)
        .quiet_zone(true)
        .build();
    Ok(format!("data:image/svg+xml;base64,{}", BASE64.encode(image)))
}

/// A code is usable while younger than `ttl`.
pub fn is_fresh(generated_at: i64, now: i64, ttl: Duration) -> bool {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now.saturating_sub(generated_at) <= ttl_ms
}

impl SessionRegistry {
    /// Produce a fresh pairing code for `sector_id`.
    ///
    /// A live, logged-in session short-circuits. Otherwise the session is
    /// torn down, its local storage wiped, and a new one started; codes older
    /// than the configured TTL are discarded while polling.
    pub async fn pairing_code(&self, sector_id: SectorId) -> Result<PairingOutcome> {
        let connections = &self.ctx.stores.connections;
        if connections.status(sector_id).await? == ConnectionStatus::Connected
            && let Some(session) = self.get(sector_id).await
            && session.is_connected().await
        {
            debug!(sector_id, "pairing skipped, already connected");
            return Ok(PairingOutcome::AlreadyConnected);
        }

        if let Some(previous) = self.take(sector_id).await {
            info!(sector_id, "restarting session for pairing");
            previous.teardown().await;
        }
        connections.reset(sector_id).await?;

        let session = self.get_or_create(sector_id).await?;
        let sessions = &self.ctx.sessions;
        let ttl = sessions.pairing_ttl();
        let interval = sessions.pairing_poll_interval();

        for attempt in 1..=sessions.pairing_poll_attempts {
            if let Some(outcome) = self.check_pairing(sector_id, &session, ttl).await? {
                info!(sector_id, attempt, "pairing state resolved");
                return Ok(outcome);
            }
            debug!(sector_id, attempt, "pairing code not ready");
            // Woken early by a new code or a login.
            let _ = tokio::time::timeout(interval, session.pairing_signal().notified()).await;
        }
        Err(Error::PairingTimeout(sector_id))
    }

    pub(crate) async fn check_pairing(
        &self,
        sector_id: SectorId,
        session: &Arc<Session>,
        ttl: Duration,
    ) -> Result<Option<PairingOutcome>> {
        let connections = &self.ctx.stores.connections;
        let Some(row) = connections.get(sector_id).await? else {
            return Ok(None);
        };
        if row.status == ConnectionStatus::Connected && session.is_connected().await {
            return Ok(Some(PairingOutcome::ConnectedDuringPairing));
        }
        match (row.qrcode, row.qrcode_generated_at) {
            (Some(payload), Some(generated_at)) if is_fresh(generated_at, now_ms(), ttl) => {
                Ok(Some(PairingOutcome::Code {
                    payload,
                    generated_at,
                }))
            },
            (Some(_), _) => {
                connections.clear_pairing_code(sector_id).await?;
                debug!(sector_id, "stale pairing code discarded");
                Ok(None)
            },
            (None, _) => Ok(None),
        }
    }
}
