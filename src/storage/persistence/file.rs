//! Plain file backend: one file per key inside the data directory

use super::{PersistenceBackend, PersistenceConfig, PersistenceError};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

pub struct FileBackend {
    config: PersistenceConfig,
}

impl FileBackend {
    /// Create the backend, making sure the data directory exists
    pub fn new(config: PersistenceConfig) -> Result<Self, PersistenceError> {
        fs::create_dir_all(&config.data_dir)?;
        Ok(Self { config })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.config.data_dir.join(format!("{}.json", key))
    }
}

impl PersistenceBackend for FileBackend {
    fn write(&self, key: &str, data: &[u8]) -> Result<(), PersistenceError> {
        let path = self.key_path(key);
        let tmp = path.with_extension("json.tmp");

        // Write-then-rename so a crash mid-write never leaves a torn file
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        match fs::read(self.key_path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        match fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_read_delete() {
        let temp_dir = TempDir::new().unwrap();
        let backend = FileBackend::new(PersistenceConfig::new(temp_dir.path())).unwrap();

        assert!(backend.read("store").unwrap().is_none());

        backend.write("store", b"{\"a\":1}").unwrap();
        assert_eq!(backend.read("store").unwrap().unwrap(), b"{\"a\":1}".to_vec());

        backend.write("store", b"{}").unwrap();
        assert_eq!(backend.read("store").unwrap().unwrap(), b"{}".to_vec());

        backend.delete("store").unwrap();
        assert!(backend.read("store").unwrap().is_none());

        // Deleting a missing key is fine
        backend.delete("store").unwrap();
    }

    #[test]
    fn test_creates_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        let backend = FileBackend::new(PersistenceConfig::new(&nested)).unwrap();

        backend.write("k", b"v").unwrap();
        assert!(nested.join("k.json").exists());
    }
}
