//! Process-wide map from sector to live session.

use std::{collections::{BTreeMap, HashMap}, sync::Arc};

use {
    tokio::sync::{OnceCell, RwLock},
    tracing::{debug, info, warn},
    wabridge_common::{ConnectionStatus, Contact, SectorId},
    wabridge_notify::HubEvent,
};

use crate::{
    context::BridgeContext,
    error::{Error, Result},
    outbound::{Delivery, SendOptions},
    session::Session,
};

/// A sector's session, filled once its first connect succeeds. Creation
/// runs on the slot so the map lock is never held across a connect.
type Slot = Arc<OnceCell<Arc<Session>>>;

pub struct SessionRegistry {
    pub(crate) ctx: Arc<BridgeContext>,
    sessions: RwLock<HashMap<SectorId, Slot>>,
}

impl SessionRegistry {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self {
            ctx,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    pub async fn get(&self, sector_id: SectorId) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(&sector_id)
            .and_then(|slot| slot.get().cloned())
    }

    pub async fn live_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Unregister the sector's session, if it has one.
    pub(crate) async fn take(&self, sector_id: SectorId) -> Option<Arc<Session>> {
        let slot = self.sessions.write().await.remove(&sector_id)?;
        slot.get().cloned()
    }

    /// Return the sector's session, creating and connecting it on first
    /// use. Concurrent callers for the same sector share one session.
    pub async fn get_or_create(&self, sector_id: SectorId) -> Result<Arc<Session>> {
        if let Some(session) = self.get(sector_id).await {
            return Ok(session);
        }
        self.ensure_bridge_mode(sector_id).await?;

        let slot = Arc::clone(self.sessions.write().await.entry(sector_id).or_default());
        let session = slot
            .get_or_try_init(|| self.start_session(sector_id))
            .await?;
        Ok(Arc::clone(session))
    }

    async fn start_session(&self, sector_id: SectorId) -> Result<Arc<Session>> {
        let connections = &self.ctx.stores.connections;
        if let Err(e) = connections.mark_connecting(sector_id).await {
            warn!(sector_id, error = %e, "failed to persist connecting state");
        }

        let session = Session::new(sector_id, Arc::clone(&self.ctx));
        if let Err(e) = session.connect().await {
            session.release().await;
            warn!(sector_id, error = %e, "session connect failed");
            if let Err(pe) = connections.set_error(sector_id, &e.to_string()).await {
                warn!(sector_id, error = %pe, "failed to persist connect error");
            }
            return Err(e);
        }

        info!(sector_id, "session registered");
        Ok(session)
    }

    async fn ensure_bridge_mode(&self, sector_id: SectorId) -> Result<()> {
        match self.ctx.stores.sectors.is_official(sector_id).await? {
            None => Err(Error::UnknownSector(sector_id)),
            Some(true) => Err(Error::UnsupportedTenantMode(sector_id)),
            Some(false) => Ok(()),
        }
    }

    /// Persisted connection status; [`ConnectionStatus::NotFound`] when the
    /// sector never connected.
    pub async fn status(&self, sector_id: SectorId) -> Result<ConnectionStatus> {
        Ok(self.ctx.stores.connections.status(sector_id).await?)
    }

    /// Tear down the sector's session and wipe its local storage.
    pub async fn close(&self, sector_id: SectorId) -> Result<()> {
        let session = self
            .take(sector_id)
            .await
            .ok_or(Error::NoSession(sector_id))?;
        session.teardown().await;
        self.ctx.stores.connections.reset(sector_id).await?;
        info!(sector_id, "session closed");
        Ok(())
    }

    /// Shutdown path: mark every sector disconnected, then tear sessions down
    /// in parallel within the configured bound. Stragglers are abandoned.
    pub async fn close_all(&self) {
        let timeout = self.ctx.sessions.close_timeout();
        let drained: Vec<(SectorId, Arc<Session>)> = self
            .sessions
            .write()
            .await
            .drain()
            .filter_map(|(sector_id, slot)| slot.get().cloned().map(|s| (sector_id, s)))
            .collect();
        let count = drained.len();
        info!(sessions = count, ?timeout, "closing all sessions");

        let work = async {
            match self.ctx.stores.connections.disconnect_all().await {
                Ok(rows) => debug!(rows, "connection rows marked disconnected"),
                Err(e) => warn!(error = %e, "failed to mark connections disconnected"),
            }
            futures::future::join_all(drained.iter().map(|(sector_id, session)| async move {
                session.teardown().await;
                debug!(sector_id = *sector_id, "session closed");
            }))
            .await;
        };

        if tokio::time::timeout(timeout, work).await.is_err() {
            warn!(sessions = count, ?timeout, "close_all timed out, abandoning remaining sessions");
        } else {
            info!(sessions = count, "all sessions closed");
        }
    }

    // ── Routed operations ────────────────────────────────────────────────────

    pub async fn send_text(
        &self,
        sector_id: SectorId,
        to: &str,
        text: &str,
        opts: &SendOptions,
    ) -> Result<Delivery> {
        let session = self.get_or_create(sector_id).await?;
        session.send_text(to, text, opts).await
    }

    pub async fn send_image(
        &self,
        sector_id: SectorId,
        to: &str,
        data: &[u8],
        caption: &str,
        opts: &SendOptions,
    ) -> Result<Delivery> {
        let session = self.get_or_create(sector_id).await?;
        session.send_image(to, data, caption, opts).await
    }

    pub async fn send_audio(
        &self,
        sector_id: SectorId,
        to: &str,
        data: &[u8],
        opts: &SendOptions,
    ) -> Result<Delivery> {
        let session = self.get_or_create(sector_id).await?;
        session.send_audio(to, data, opts).await
    }

    pub async fn send_document(
        &self,
        sector_id: SectorId,
        to: &str,
        data: &[u8],
        file_name: &str,
        opts: &SendOptions,
    ) -> Result<Delivery> {
        let session = self.get_or_create(sector_id).await?;
        session.send_document(to, data, file_name, opts).await
    }

    /// Typing never creates a session.
    pub async fn send_typing(
        &self,
        sector_id: SectorId,
        to: &str,
        secs: Option<i64>,
    ) -> Result<()> {
        let session = self
            .get(sector_id)
            .await
            .ok_or(Error::NotConnected(sector_id))?;
        let duration = crate::outbound::typing_duration(secs, self.ctx.sessions.typing_default());
        session.send_typing(to, duration).await
    }

    /// Mark a contact's conversation as viewed by an agent.
    pub async fn mark_viewed(&self, sector_id: SectorId, number: &str) -> Result<Contact> {
        let contact = self
            .ctx
            .stores
            .contacts
            .set_viewed_by_number(sector_id, number)
            .await?;
        self.ctx.hub.publish(&HubEvent::contact(&contact));
        self.ctx.ordering.schedule_republish(sector_id);
        Ok(contact)
    }

    pub async fn viewed_status(&self, sector_id: SectorId) -> Result<BTreeMap<i64, bool>> {
        Ok(self.ctx.stores.contacts.viewed_status(sector_id).await?)
    }
}
