//! Per-sector protocol storage (device identity, keys, app state) in an
//! embedded sled database at `{data_dir}/whatsapp-{sector}.db`.

use std::{
    io,
    path::{Path, PathBuf},
};

use {
    serde::{Serialize, de::DeserializeOwned},
    tracing::{debug, info},
    wabridge_common::{SectorId, time::now_ms},
};

use crate::transport::TransportError;

#[derive(Clone)]
pub struct LocalSessionStore {
    db: sled::Db,
    path: PathBuf,
}

impl LocalSessionStore {
    pub fn path_for(data_dir: &Path, sector_id: SectorId) -> PathBuf {
        data_dir.join(format!("whatsapp-{sector_id}.db"))
    }

    /// Open (or create) the store. A store already held by another handle
    /// reports [`TransportError::StorageLocked`].
    pub fn open(path: &Path) -> Result<Self, TransportError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TransportError::Storage(format!("{}: {e}", parent.display())))?;
        }
        let db = sled::open(path).map_err(classify)?;
        debug!(path = %path.display(), "session storage opened");
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, TransportError> {
        let Some(raw) = self.db.get(key).map_err(classify)? else {
            return Ok(None);
        };
        postcard::from_bytes(&raw)
            .map(Some)
            .map_err(|e| TransportError::Storage(format!("corrupt entry {key:?}: {e}")))
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), TransportError> {
        let raw = postcard::to_allocvec(value)
            .map_err(|e| TransportError::Storage(format!("encode {key:?}: {e}")))?;
        self.db.insert(key, raw).map_err(classify)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<bool, TransportError> {
        Ok(self.db.remove(key).map_err(classify)?.is_some())
    }

    pub async fn flush(&self) -> Result<(), TransportError> {
        self.db.flush_async().await.map_err(classify)?;
        Ok(())
    }

    /// Delete the store at `path`, if any.
    pub fn destroy(path: &Path) -> io::Result<()> {
        if path.is_dir() {
            std::fs::remove_dir_all(path)?;
        } else if path.exists() {
            std::fs::remove_file(path)?;
        } else {
            return Ok(());
        }
        info!(path = %path.display(), "session storage removed");
        Ok(())
    }

    /// Move the store at `path` aside, returning where it went.
    pub fn backup(path: &Path) -> io::Result<Option<PathBuf>> {
        if !path.exists() {
            return Ok(None);
        }
        let target = PathBuf::from(format!("{}.backup.{}", path.display(), now_ms()));
        std::fs::rename(path, &target)?;
        info!(from = %path.display(), to = %target.display(), "session storage moved aside");
        Ok(Some(target))
    }

    pub fn restore(backup: &Path, path: &Path) -> io::Result<()> {
        std::fs::rename(backup, path)?;
        info!(path = %path.display(), "session storage restored from backup");
        Ok(())
    }
}

pub(crate) fn classify(err: sled::Error) -> TransportError {
    match &err {
        sled::Error::Io(io) if is_lock_error(io) => TransportError::StorageLocked,
        _ => TransportError::Storage(err.to_string()),
    }
}

fn is_lock_error(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.to_string().contains("lock")
}

#[cfg(test)]
mod tests {
    use {super::*, serde::Deserialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Identity {
        registration_id: u32,
        public_key: Vec<u8>,
    }

    #[test]
    fn put_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalSessionStore::open(&LocalSessionStore::path_for(dir.path(), 3)).unwrap();
        assert!(store.path().ends_with("whatsapp-3.db"));

        let identity = Identity {
            registration_id: 42,
            public_key: vec![1, 2, 3],
        };
        store.put("identity", &identity).unwrap();
        assert_eq!(store.get::<Identity>("identity").unwrap(), Some(identity));
        assert!(store.remove("identity").unwrap());
        assert_eq!(store.get::<Identity>("identity").unwrap(), None);
    }

    #[test]
    fn second_open_reports_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whatsapp-1.db");
        let _held = LocalSessionStore::open(&path).unwrap();
        assert!(matches!(
            LocalSessionStore::open(&path),
            Err(TransportError::StorageLocked)
        ));
    }

    #[test]
    fn classify_maps_lock_failures() {
        let locked = sled::Error::Io(io::Error::new(
            io::ErrorKind::Other,
            "could not acquire lock on \"db\"",
        ));
        assert_eq!(classify(locked), TransportError::StorageLocked);
        let other = sled::Error::Unsupported("nope".into());
        assert!(matches!(classify(other), TransportError::Storage(_)));
    }

    #[test]
    fn backup_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whatsapp-2.db");
        assert_eq!(LocalSessionStore::backup(&path).unwrap(), None);

        {
            let store = LocalSessionStore::open(&path).unwrap();
            store.put("k", &7u32).unwrap();
            store.db.flush().unwrap();
        }
        let backup = LocalSessionStore::backup(&path).unwrap().unwrap();
        assert!(!path.exists());
        LocalSessionStore::restore(&backup, &path).unwrap();

        let store = LocalSessionStore::open(&path).unwrap();
        assert_eq!(store.get::<u32>("k").unwrap(), Some(7));
        drop(store);
        LocalSessionStore::destroy(&path).unwrap();
        assert!(!path.exists());
    }
}
