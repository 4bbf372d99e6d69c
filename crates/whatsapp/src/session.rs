//! One sector's protocol session: client lifecycle, event dispatch and the
//! recover-once-then-retry policy shared by every transport operation.

use std::{
    future::Future,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    serde::{Deserialize, Serialize},
    tokio::{
        sync::{Mutex, Notify, RwLock, broadcast, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
    wabridge_common::{Contact, Message, SectorId, time::now_ms},
    wabridge_notify::HubEvent,
    wabridge_store::NewMessage,
};

use crate::{
    context::BridgeContext,
    error::{Error, Result},
    local_store::LocalSessionStore,
    pairing::render_pairing_payload,
    transport::{ProtocolClient, Recovery, TransportError, TransportEvent},
};

const META_KEY: &str = "bridge.meta";

/// Bookkeeping the bridge keeps next to the protocol state.
#[derive(Debug, Serialize, Deserialize)]
struct SessionMeta {
    sector_id: SectorId,
    opened_at: i64,
}

pub struct Session {
    sector_id: SectorId,
    pub(crate) ctx: Arc<BridgeContext>,
    client: RwLock<Option<Arc<dyn ProtocolClient>>>,
    storage: Mutex<Option<LocalSessionStore>>,
    events: Mutex<Option<JoinHandle<()>>>,
    /// Held while the client is being built, reconnected or rebuilt.
    lifecycle: Mutex<()>,
    connected: AtomicBool,
    storage_opened: AtomicBool,
    /// Woken when a pairing code is stored or the session logs in.
    pairing: Notify,
}

impl Session {
    pub(crate) fn new(sector_id: SectorId, ctx: Arc<BridgeContext>) -> Arc<Self> {
        Arc::new(Self {
            sector_id,
            ctx,
            client: RwLock::new(None),
            storage: Mutex::new(None),
            events: Mutex::new(None),
            lifecycle: Mutex::new(()),
            connected: AtomicBool::new(false),
            storage_opened: AtomicBool::new(false),
            pairing: Notify::new(),
        })
    }

    pub fn sector_id(&self) -> SectorId {
        self.sector_id
    }

    /// Connected and logged in, as seen by both the event stream and the
    /// transport itself.
    pub async fn is_connected(&self) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        match self.current_client().await {
            Some(client) => client.is_connected() && client.is_logged_in(),
            None => false,
        }
    }

    pub(crate) fn pairing_signal(&self) -> &Notify {
        &self.pairing
    }

    pub(crate) async fn current_client(&self) -> Option<Arc<dyn ProtocolClient>> {
        self.client.read().await.clone()
    }

    pub(crate) async fn require_client(&self) -> Result<Arc<dyn ProtocolClient>> {
        self.current_client()
            .await
            .ok_or(Error::NotConnected(self.sector_id))
    }

    /// The current client, waiting out a connect or recovery in flight
    /// when the slot is momentarily empty.
    pub(crate) async fn ready_client(&self) -> Result<Arc<dyn ProtocolClient>> {
        if let Some(client) = self.current_client().await {
            return Ok(client);
        }
        let _lifecycle = self.lifecycle.lock().await;
        self.require_client().await
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Build a client on fresh storage and start connecting, or reconnect
    /// the existing client.
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.connect_locked().await
    }

    async fn connect_locked(self: &Arc<Self>) -> Result<()> {
        if self.current_client().await.is_some() {
            return self.reconnect_locked().await;
        }

        let sector_id = self.sector_id;
        let path = self.ctx.storage_path(sector_id);
        if self.ctx.reset_storage_on_start() && !self.storage_opened.swap(true, Ordering::SeqCst) {
            if let Err(e) = LocalSessionStore::destroy(&path) {
                warn!(sector_id, error = %e, "failed to discard previous session storage");
            }
        }

        let storage =
            LocalSessionStore::open(&path).map_err(|e| Error::connect(sector_id, e))?;
        let meta = SessionMeta {
            sector_id,
            opened_at: now_ms(),
        };
        if let Err(e) = storage.put(META_KEY, &meta) {
            debug!(sector_id, error = %e, "could not record session metadata");
        }

        let client = self
            .ctx
            .factory
            .create(sector_id, storage.clone(), &self.ctx.sessions.device_name)
            .await
            .map_err(|e| Error::connect(sector_id, e))?;

        // Subscribe before connecting so no early event is missed.
        let events = client.subscribe();
        let handle = tokio::spawn(run_event_loop(Arc::downgrade(self), events));
        if let Some(previous) = self.events.lock().await.replace(handle) {
            previous.abort();
        }
        *self.storage.lock().await = Some(storage);
        *self.client.write().await = Some(Arc::clone(&client));

        client
            .connect()
            .await
            .map_err(|e| Error::connect(sector_id, e))?;
        info!(sector_id, "session connect started");
        Ok(())
    }

    /// Reconnect the existing client and wait for the connected event.
    pub async fn reconnect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.reconnect_locked().await
    }

    async fn reconnect_locked(&self) -> Result<()> {
        let sector_id = self.sector_id;
        let client = self.require_client().await?;
        if client.is_connected() && client.is_logged_in() {
            self.connected.store(true, Ordering::SeqCst);
            return Ok(());
        }

        let (done_tx, done_rx) = oneshot::channel();
        let mut events = client.subscribe();
        let listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TransportEvent::Connected) => {
                        let _ = done_tx.send(());
                        break;
                    },
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {},
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let result = client.connect().await;
        if let Err(e) = result {
            listener.abort();
            return Err(Error::connect(sector_id, e));
        }

        let timeout = self.ctx.sessions.reconnect_timeout();
        let signalled = matches!(tokio::time::timeout(timeout, done_rx).await, Ok(Ok(())));
        listener.abort();

        if signalled {
            info!(sector_id, "session reconnected");
        } else if client.is_connected() {
            warn!(sector_id, ?timeout, "no connected event, but transport reports connected");
        } else {
            warn!(sector_id, ?timeout, "reconnect timed out");
            client.disconnect().await;
            return Err(Error::ReconnectTimeout(sector_id));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop the event loop, disconnect and drop the client and its storage
    /// handle. The storage itself is left on disk.
    pub(crate) async fn release(&self) {
        if let Some(handle) = self.events.lock().await.take() {
            handle.abort();
        }
        let client = self.client.write().await.take();
        if let Some(client) = client {
            client.disconnect().await;
        }
        self.storage.lock().await.take();
        self.connected.store(false, Ordering::SeqCst);
    }

    /// [`Self::release`] and delete the local storage.
    pub(crate) async fn teardown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.release().await;
        let path = self.ctx.storage_path(self.sector_id);
        if let Err(e) = LocalSessionStore::destroy(&path) {
            warn!(sector_id = self.sector_id, error = %e, "failed to remove session storage");
        }
        debug!(sector_id = self.sector_id, "session torn down");
    }

    /// Move locked storage aside and build a new client. The old storage is
    /// put back if the new one never materialized. Caller holds `lifecycle`.
    async fn recover_storage(self: &Arc<Self>) -> Result<()> {
        let sector_id = self.sector_id;
        let settle = self.ctx.sessions.recovery_settle();
        warn!(sector_id, "session storage locked, rebuilding");

        self.release().await;
        tokio::time::sleep(settle).await;

        let path = self.ctx.storage_path(sector_id);
        let backup = LocalSessionStore::backup(&path)
            .map_err(|e| Error::connect(sector_id, TransportError::Storage(e.to_string())))?;
        tokio::time::sleep(settle).await;

        match self.connect_locked().await {
            Ok(()) => {
                info!(sector_id, "session rebuilt on fresh storage");
                Ok(())
            },
            Err(e) => {
                if let Some(backup) = backup
                    && !path.exists()
                    && let Err(re) = LocalSessionStore::restore(&backup, &path)
                {
                    warn!(sector_id, error = %re, "failed to restore session storage");
                }
                Err(e)
            },
        }
    }

    /// Recover from a failure seen on `failed`. Callers that lost the race
    /// to a concurrent recovery find a different client and skip straight
    /// to their retry.
    async fn recover(self: &Arc<Self>, failed: &Arc<dyn ProtocolClient>, recovery: Recovery) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if let Some(current) = self.current_client().await
            && !Arc::ptr_eq(&current, failed)
        {
            debug!(sector_id = self.sector_id, ?recovery, "session already recovered");
            return Ok(());
        }
        match recovery {
            Recovery::RebuildStorage => self.recover_storage().await,
            Recovery::Reconnect => self.reconnect_locked().await,
        }
    }

    /// Run `op` against the current client. A recoverable failure triggers
    /// exactly one recovery and one retry; anything else fails immediately.
    /// Concurrent callers share a single recovery.
    pub(crate) async fn with_recovery<T, F, Fut>(self: &Arc<Self>, op: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut(Arc<dyn ProtocolClient>) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let sector_id = self.sector_id;
        let client = self.ready_client().await?;
        let err = match attempt(Arc::clone(&client)).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let Some(recovery) = err.recovery() else {
            warn!(sector_id, op, error = %err, "transport operation failed");
            return Err(Error::SendFailed(err));
        };
        warn!(sector_id, op, error = %err, ?recovery, "transport operation failed, recovering");
        self.recover(&client, recovery).await?;

        let client = self.ready_client().await?;
        attempt(client).await.map_err(|e| {
            warn!(sector_id, op, error = %e, "retry after recovery failed");
            Error::SendFailed(e)
        })
    }

    // ── Events ───────────────────────────────────────────────────────────────

    async fn dispatch(self: &Arc<Self>, event: TransportEvent) {
        let sector_id = self.sector_id;
        let connections = &self.ctx.stores.connections;
        match event {
            TransportEvent::PairingCode(code) => match render_pairing_payload(&code) {
                Ok(payload) => {
                    if let Err(e) = connections
                        .set_pairing_code(sector_id, &payload, now_ms())
                        .await
                    {
                        warn!(sector_id, error = %e, "failed to store pairing code");
                    }
                    debug!(sector_id, "pairing code stored");
                    self.pairing.notify_one();
                },
                Err(e) => warn!(sector_id, error = %e, "failed to render pairing code"),
            },
            TransportEvent::Connected => {
                self.connected.store(true, Ordering::SeqCst);
                if let Err(e) = connections.set_connected(sector_id).await {
                    warn!(sector_id, error = %e, "failed to persist connected state");
                }
                info!(sector_id, "session connected");
                self.pairing.notify_one();
            },
            TransportEvent::Disconnected | TransportEvent::LoggedOut => {
                self.connected.store(false, Ordering::SeqCst);
                if let Err(e) = connections.set_disconnected(sector_id).await {
                    warn!(sector_id, error = %e, "failed to persist disconnected state");
                }
                info!(sector_id, "session disconnected");
            },
            TransportEvent::Message(message) => {
                let session = Arc::clone(self);
                tokio::spawn(async move { session.handle_inbound(*message).await });
            },
        }
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    /// Persist a message, flip the contact's viewed flag and notify
    /// subscribers. Failures are logged; the protocol side already happened.
    pub(crate) async fn record_message(&self, contact: &Contact, new: NewMessage) -> Option<Message> {
        let sector_id = self.sector_id;
        let stores = &self.ctx.stores;

        // Outbound activity means an agent has looked at the conversation.
        let viewed = new.sent;
        match stores.contacts.set_viewed(contact.id, viewed).await {
            Ok(updated) if !viewed => {
                self.ctx.hub.publish(&HubEvent::contact(&updated));
            },
            Ok(_) => {},
            Err(e) => warn!(sector_id, contact_id = contact.id, error = %e, "failed to update viewed flag"),
        }

        let saved = match stores.messages.save(&new).await {
            Ok(saved) => saved,
            Err(e) => {
                warn!(sector_id, contact_id = contact.id, error = %e, "failed to persist message");
                return None;
            },
        };
        self.ctx.hub.publish(&HubEvent::message(&saved));
        self.ctx.ordering.schedule_republish(sector_id);
        debug!(sector_id, message_id = saved.id, kind = saved.kind.as_str(), sent = saved.sent, "message recorded");
        Some(saved)
    }
}

async fn run_event_loop(session: Weak<Session>, mut events: broadcast::Receiver<TransportEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "session event stream lagged");
                continue;
            },
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(session) = session.upgrade() else {
            break;
        };
        session.dispatch(event).await;
    }
}
