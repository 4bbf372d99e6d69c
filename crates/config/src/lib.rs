//! Configuration loading: discovery, `${ENV}` substitution and schema types.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, data_dir, discover_and_load, load_config},
    schema::{
        BlobBackend, BlobConfig, DatabaseConfig, MediaConfig, ServerConfig, SessionsConfig,
        StorageConfig, WabridgeConfig,
    },
};
