use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    wabridge_common::SectorId,
    wabridge_config::SessionsConfig,
    wabridge_media::{AudioPipeline, BlobStore},
    wabridge_notify::NotificationHub,
    wabridge_store::Stores,
};

use crate::{local_store::LocalSessionStore, ordering::ContactOrdering, transport::ClientFactory};

/// Everything a session needs from the rest of the bridge.
pub struct BridgeContext {
    pub sessions: SessionsConfig,
    pub stores: Stores,
    pub hub: Arc<NotificationHub>,
    pub blob: Arc<dyn BlobStore>,
    pub audio: Arc<dyn AudioPipeline>,
    pub factory: Arc<dyn ClientFactory>,
    pub ordering: ContactOrdering,
    /// Used to fetch profile pictures.
    pub http: reqwest::Client,
    data_dir: PathBuf,
    reset_storage_on_start: bool,
}

impl BridgeContext {
    pub fn new(
        stores: Stores,
        hub: Arc<NotificationHub>,
        blob: Arc<dyn BlobStore>,
        audio: Arc<dyn AudioPipeline>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        let sessions = SessionsConfig::default();
        let ordering = ContactOrdering::new(
            stores.contacts.clone(),
            Arc::clone(&hub),
            sessions.republish_delay(),
        );
        Self {
            sessions,
            stores,
            hub,
            blob,
            audio,
            factory,
            ordering,
            http: reqwest::Client::new(),
            data_dir: wabridge_config::data_dir().join("sessions"),
            reset_storage_on_start: true,
        }
    }

    pub fn with_sessions_config(mut self, sessions: SessionsConfig) -> Self {
        self.ordering = ContactOrdering::new(
            self.stores.contacts.clone(),
            Arc::clone(&self.hub),
            sessions.republish_delay(),
        );
        self.sessions = sessions;
        self
    }

    pub fn with_storage(mut self, data_dir: PathBuf, reset_on_start: bool) -> Self {
        self.data_dir = data_dir;
        self.reset_storage_on_start = reset_on_start;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn reset_storage_on_start(&self) -> bool {
        self.reset_storage_on_start
    }

    pub fn storage_path(&self, sector_id: SectorId) -> PathBuf {
        LocalSessionStore::path_for(&self.data_dir, sector_id)
    }
}
