//! Outbound media staging: every payload lands in blob storage (durable
//! public URL) and on the protocol's media servers (for the message itself).

use std::sync::Arc;

use {tracing::debug, wabridge_common::SectorId};

use crate::{
    error::{Error, Result},
    session::Session,
    transport::{MediaKind, UploadedMedia},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFolder {
    Images,
    Audios,
    Videos,
    Documents,
    Stickers,
    Avatars,
}

impl MediaFolder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Images => "images",
            Self::Audios => "audios",
            Self::Videos => "videos",
            Self::Documents => "documents",
            Self::Stickers => "stickers",
            Self::Avatars => "avatars",
        }
    }
}

/// `sector_{id}/{folder}/{name}`
pub fn object_key(sector_id: SectorId, folder: MediaFolder, name: &str) -> String {
    format!("sector_{sector_id}/{}/{name}", folder.as_str())
}

/// Media uploaded to both destinations.
#[derive(Debug, Clone)]
pub struct StagedMedia {
    pub public_url: String,
    pub upload: UploadedMedia,
}

impl Session {
    pub(crate) async fn stage_media(
        self: &Arc<Self>,
        data: &[u8],
        content_type: &str,
        key: &str,
        kind: MediaKind,
    ) -> Result<StagedMedia> {
        let public_url = self
            .ctx
            .blob
            .upload(data, key, content_type)
            .await
            .map_err(Error::Blob)?;
        let upload = self
            .with_recovery("upload", move |client| async move { client.upload(data, kind).await })
            .await?;
        debug!(sector_id = self.sector_id(), key, bytes = data.len(), "media staged");
        Ok(StagedMedia { public_url, upload })
    }
}
