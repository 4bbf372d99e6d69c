//! Media pipeline: MIME sniffing, voice-note transcoding and blob storage.

pub mod audio;
pub mod blob;
pub mod mime;

pub use {
    audio::{AudioPipeline, FfmpegAudio, PreparedAudio},
    blob::{BlobStore, HttpBlobStore, LocalBlobStore},
};
