//! Blob storage clients. Objects are addressed by slash-separated keys such
//! as `sector_7/images/1700000000.jpg`.

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    tracing::debug,
    wabridge_config::{BlobBackend, BlobConfig},
};

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key` and return a durable public URL.
    async fn upload(&self, data: &[u8], key: &str, content_type: &str) -> Result<String>;
}

/// Build the configured backend. `default_dir` is used by the local backend
/// when no directory is configured.
pub fn from_config(config: &BlobConfig, default_dir: PathBuf) -> Result<Arc<dyn BlobStore>> {
    match config.backend {
        BlobBackend::Local => Ok(Arc::new(LocalBlobStore::new(
            config.local_dir.clone().unwrap_or(default_dir),
            &config.public_base_url,
        ))),
        BlobBackend::Http => {
            let endpoint = config
                .endpoint
                .as_deref()
                .context("blob.endpoint is required for the http backend")?;
            let token = config
                .token
                .as_ref()
                .map(|t| Secret::new(t.expose_secret().clone()));
            Ok(Arc::new(HttpBlobStore::new(
                endpoint,
                &config.public_base_url,
                token,
            )))
        },
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|part| part == "..") {
        bail!("invalid object key {key:?}");
    }
    Ok(())
}

fn public_url(base: &str, key: &str) -> String {
    format!("{}/{key}", base.trim_end_matches('/'))
}

// ── Local filesystem ─────────────────────────────────────────────────────────

/// Writes objects below a root directory that is served at `public_base_url`.
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: PathBuf, public_base_url: &str) -> Self {
        Self {
            root,
            public_base_url: public_base_url.to_string(),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, data: &[u8], key: &str, content_type: &str) -> Result<String> {
        validate_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(key, content_type, bytes = data.len(), "blob stored locally");
        Ok(public_url(&self.public_base_url, key))
    }
}

// ── HTTP object store ────────────────────────────────────────────────────────

/// Uploads with `PUT {endpoint}/{key}` (S3-compatible presigned or bearer
/// authenticated buckets).
pub struct HttpBlobStore {
    client: reqwest::Client,
    endpoint: String,
    public_base_url: String,
    token: Option<Secret<String>>,
}

impl HttpBlobStore {
    pub fn new(endpoint: &str, public_base_url: &str, token: Option<Secret<String>>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            public_base_url: public_base_url.to_string(),
            token,
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, data: &[u8], key: &str, content_type: &str) -> Result<String> {
        validate_key(key)?;
        let url = format!("{}/{key}", self.endpoint);
        let mut req = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data.to_vec());
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose_secret());
        }
        req.send()
            .await
            .with_context(|| format!("PUT {url} failed"))?
            .error_for_status()
            .with_context(|| format!("PUT {url} rejected"))?;
        debug!(key, content_type, bytes = data.len(), "blob uploaded");
        Ok(public_url(&self.public_base_url, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_store_writes_below_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf(), "https://media.local/");

        let url = store
            .upload(b"abc", "sector_7/images/1.jpg", "image/jpeg")
            .await
            .unwrap();
        assert_eq!(url, "https://media.local/sector_7/images/1.jpg");
        let stored = std::fs::read(dir.path().join("sector_7/images/1.jpg")).unwrap();
        assert_eq!(stored, b"abc");
    }

    #[tokio::test]
    async fn local_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf(), "http://x");
        assert!(store.upload(b"x", "../etc/passwd", "text/plain").await.is_err());
        assert!(store.upload(b"x", "/abs", "text/plain").await.is_err());
        assert!(store.upload(b"x", "", "text/plain").await.is_err());
    }

    #[tokio::test]
    async fn http_store_puts_with_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/bucket/sector_1/documents/9_report.pdf")
            .match_header("content-type", "application/pdf")
            .match_header("authorization", "Bearer tok")
            .match_body("%PDF-")
            .with_status(200)
            .create_async()
            .await;

        let store = HttpBlobStore::new(
            &format!("{}/bucket/", server.url()),
            "https://cdn.example.com/bucket",
            Some(Secret::new("tok".to_string())),
        );
        let url = store
            .upload(b"%PDF-", "sector_1/documents/9_report.pdf", "application/pdf")
            .await
            .unwrap();
        assert_eq!(
            url,
            "https://cdn.example.com/bucket/sector_1/documents/9_report.pdf"
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_store_surfaces_rejections() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("PUT", "/k")
            .with_status(403)
            .create_async()
            .await;
        let store = HttpBlobStore::new(&server.url(), "https://cdn", None);
        assert!(store.upload(b"x", "k", "text/plain").await.is_err());
    }

    #[test]
    fn from_config_requires_endpoint_for_http() {
        let config = BlobConfig {
            backend: BlobBackend::Http,
            ..BlobConfig::default()
        };
        assert!(from_config(&config, PathBuf::from("/tmp")).is_err());
        assert!(from_config(&BlobConfig::default(), PathBuf::from("/tmp")).is_ok());
    }
}
