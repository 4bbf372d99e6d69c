//! Scriptable protocol client and a wired-up bridge for tests.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    ops::Deref,
    path::PathBuf,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::sync::{broadcast, mpsc},
    wabridge_common::{Contact, Message, MessageKind, SectorId, time::now_ms},
    wabridge_config::SessionsConfig,
    wabridge_media::{AudioPipeline, LocalBlobStore, PreparedAudio, audio::VOICE_MIME},
    wabridge_notify::NotificationHub,
    wabridge_store::{NewMessage, Stores},
};

use crate::{
    context::BridgeContext,
    jid::Jid,
    local_store::LocalSessionStore,
    registry::SessionRegistry,
    transport::{
        ChatPresence, ClientFactory, MediaKind, MediaRef, OutboundMessage, ProtocolClient,
        TransportError, TransportEvent, UploadedMedia,
    },
};

// ── Fake transport ───────────────────────────────────────────────────────────

pub(crate) struct FakeBehavior {
    pub pair_on_connect: bool,
    /// Whether `connect` brings the link up at all.
    pub link_on_connect: bool,
    pub login_on_connect: bool,
    pub connect_error: Option<TransportError>,
    /// Per-sector stall before `connect` returns.
    pub connect_delays: HashMap<SectorId, Duration>,
    /// Popped by successive sends; empty means success.
    pub send_failures: VecDeque<TransportError>,
    pub disconnect_delay: Option<Duration>,
    pub download: Vec<u8>,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            pair_on_connect: false,
            link_on_connect: true,
            login_on_connect: true,
            connect_error: None,
            connect_delays: HashMap::new(),
            send_failures: VecDeque::new(),
            disconnect_delay: None,
            download: b"\xFF\xD8\xFF\xE0fake-jpeg".to_vec(),
        }
    }
}

/// Shared by the factory and every client it built.
#[derive(Default)]
pub(crate) struct Recorder {
    behavior: Mutex<FakeBehavior>,
    pub created: AtomicUsize,
    pub send_attempts: AtomicUsize,
    sent: Mutex<Vec<(Jid, OutboundMessage)>>,
    uploads: Mutex<Vec<MediaKind>>,
    presences: Mutex<Vec<ChatPresence>>,
    read_receipts: Mutex<Vec<String>>,
}

impl Recorder {
    fn behavior(&self) -> MutexGuard<'_, FakeBehavior> {
        self.behavior.lock().unwrap()
    }

    pub fn sent(&self) -> Vec<(Jid, OutboundMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<MediaKind> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn presences(&self) -> Vec<ChatPresence> {
        self.presences.lock().unwrap().clone()
    }

    pub fn read_receipts(&self) -> Vec<String> {
        self.read_receipts.lock().unwrap().clone()
    }
}

pub(crate) struct FakeClient {
    sector_id: SectorId,
    recorder: Arc<Recorder>,
    events: broadcast::Sender<TransportEvent>,
    connected: AtomicBool,
    logged_in: AtomicBool,
}

impl FakeClient {
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ProtocolClient for FakeClient {
    async fn connect(&self) -> Result<(), TransportError> {
        let (error, pair, link, login, delay) = {
            let b = self.recorder.behavior();
            (
                b.connect_error.clone(),
                b.pair_on_connect,
                b.link_on_connect,
                b.login_on_connect,
                b.connect_delays.get(&self.sector_id).copied(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = error {
            return Err(error);
        }
        if !link {
            return Ok(());
        }
        self.connected.store(true, Ordering::SeqCst);
        if pair {
            self.emit(TransportEvent::PairingCode("2@fake,pairing,ref".into()));
        }
        if login {
            self.logged_in.store(true, Ordering::SeqCst);
            self.emit(TransportEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) {
        let delay = self.recorder.behavior().disconnect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.logged_in.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Disconnected);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn upload(&self, data: &[u8], kind: MediaKind) -> Result<UploadedMedia, TransportError> {
        self.recorder.uploads.lock().unwrap().push(kind);
        Ok(UploadedMedia {
            url: "https://mmg.test/upload".into(),
            direct_path: "/v/t62/upload".into(),
            media_key: vec![7; 32],
            file_sha256: vec![1; 32],
            file_enc_sha256: vec![2; 32],
            file_length: data.len() as u64,
        })
    }

    async fn download(&self, _media: &MediaRef) -> Result<Vec<u8>, TransportError> {
        Ok(self.recorder.behavior().download.clone())
    }

    async fn send_message(
        &self,
        to: &Jid,
        message: &OutboundMessage,
    ) -> Result<String, TransportError> {
        let attempt = self.recorder.send_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.recorder.behavior().send_failures.pop_front() {
            return Err(error);
        }
        self.recorder
            .sent
            .lock()
            .unwrap()
            .push((to.clone(), message.clone()));
        Ok(format!("WA-OUT-{attempt}"))
    }

    async fn send_presence_available(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_chat_presence(
        &self,
        _to: &Jid,
        presence: ChatPresence,
    ) -> Result<(), TransportError> {
        self.recorder.presences.lock().unwrap().push(presence);
        Ok(())
    }

    async fn mark_read(&self, message_ids: &[String], _chat: &Jid) -> Result<(), TransportError> {
        self.recorder
            .read_receipts
            .lock()
            .unwrap()
            .extend(message_ids.iter().cloned());
        Ok(())
    }

    async fn profile_picture_url(&self, _jid: &Jid) -> Result<Option<String>, TransportError> {
        Ok(None)
    }
}

#[derive(Default)]
pub(crate) struct FakeFactory {
    recorder: Arc<Recorder>,
    clients: Mutex<Vec<Arc<FakeClient>>>,
}

impl FakeFactory {
    pub fn last_client(&self) -> Arc<FakeClient> {
        Arc::clone(self.clients.lock().unwrap().last().unwrap())
    }
}

impl Deref for FakeFactory {
    type Target = Recorder;

    fn deref(&self) -> &Recorder {
        &self.recorder
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn create(
        &self,
        sector_id: SectorId,
        _storage: LocalSessionStore,
        _device_name: &str,
    ) -> Result<Arc<dyn ProtocolClient>, TransportError> {
        self.recorder.created.fetch_add(1, Ordering::SeqCst);
        let (events, _) = broadcast::channel(64);
        let client = Arc::new(FakeClient {
            sector_id,
            recorder: Arc::clone(&self.recorder),
            events,
            connected: AtomicBool::new(false),
            logged_in: AtomicBool::new(false),
        });
        self.clients.lock().unwrap().push(Arc::clone(&client));
        Ok(client)
    }
}

#[derive(Default)]
pub(crate) struct FakeAudio {
    pub fail: AtomicBool,
}

#[async_trait]
impl AudioPipeline for FakeAudio {
    async fn prepare(&self, _raw: &[u8]) -> anyhow::Result<PreparedAudio> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("ffmpeg exited with 1");
        }
        Ok(PreparedAudio {
            data: b"OggS\0\x02voice".to_vec(),
            mime_type: VOICE_MIME,
            duration_secs: 4,
            waveform: vec![10; 32],
        })
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

/// Bridge wired to an in-memory database, a temp dir and the fakes above.
/// Sector 7 is a bridge tenant, sector 8 uses the official API.
pub(crate) struct Harness {
    pub stores: Stores,
    pub hub: Arc<NotificationHub>,
    pub factory: Arc<FakeFactory>,
    pub audio: Arc<FakeAudio>,
    ctx: Arc<BridgeContext>,
    dir: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        wabridge_store::schema::init(&pool).await.unwrap();
        let stores = Stores::new(pool);
        stores.sectors.upsert(7, "Atendimento", false).await.unwrap();
        stores.sectors.upsert(8, "Oficial", true).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let hub = Arc::new(NotificationHub::new());
        let factory = Arc::new(FakeFactory::default());
        let audio = Arc::new(FakeAudio::default());
        let ctx = Arc::new(Self::context(
            &stores,
            &hub,
            &audio,
            Arc::clone(&factory) as Arc<dyn ClientFactory>,
            &dir,
        ));
        Self {
            stores,
            hub,
            factory,
            audio,
            ctx,
            dir,
        }
    }

    fn context(
        stores: &Stores,
        hub: &Arc<NotificationHub>,
        audio: &Arc<FakeAudio>,
        factory: Arc<dyn ClientFactory>,
        dir: &tempfile::TempDir,
    ) -> BridgeContext {
        let blob = Arc::new(LocalBlobStore::new(
            dir.path().join("media"),
            "https://media.test",
        ));
        let sessions = SessionsConfig {
            pairing_poll_interval_ms: 20,
            pairing_poll_attempts: 10,
            reconnect_timeout_ms: 200,
            close_timeout_ms: 300,
            republish_delay_ms: 10,
            recovery_settle_ms: 1,
            typing_default_secs: 1,
            ..SessionsConfig::default()
        };
        BridgeContext::new(
            stores.clone(),
            Arc::clone(hub),
            blob,
            Arc::clone(audio) as Arc<dyn AudioPipeline>,
            factory,
        )
        .with_sessions_config(sessions)
        .with_storage(dir.path().join("sessions"), true)
    }

    pub fn ctx(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    pub fn registry(&self) -> SessionRegistry {
        SessionRegistry::new(Arc::clone(&self.ctx))
    }

    pub fn registry_with(&self, factory: Arc<dyn ClientFactory>) -> SessionRegistry {
        let ctx = Self::context(&self.stores, &self.hub, &self.audio, factory, &self.dir);
        SessionRegistry::new(Arc::new(ctx))
    }

    pub fn behavior(&self, change: impl FnOnce(&mut FakeBehavior)) {
        change(&mut self.factory.behavior());
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.dir.path().join("media")
    }

    pub async fn save_inbound(&self, contact: &Contact, whatsapp_id: &str) -> Message {
        self.stores
            .messages
            .save(&NewMessage {
                sector_id: contact.sector_id,
                contact_id: contact.id,
                content: "oi".into(),
                kind: MessageKind::Text,
                media_url: None,
                file_name: None,
                mime_type: None,
                whatsapp_id: Some(whatsapp_id.into()),
                sent: false,
                read: false,
                user_id: None,
                sent_at: now_ms() - 1_000,
            })
            .await
            .unwrap()
    }
}

/// Poll `check` for up to two seconds.
pub(crate) async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Let background work settle, then return the queued `message` frames.
pub(crate) async fn message_frames(
    frames: &mut mpsc::UnboundedReceiver<String>,
) -> Vec<serde_json::Value> {
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut out = Vec::new();
    while let Ok(frame) = frames.try_recv() {
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        if value["type"] == "message" {
            out.push(value);
        }
    }
    out
}
