//! A file-backed credential store

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use super::{CredentialKey, CredentialStore, StoreError};

/// A credential store persisted as a small JSON document on the local filesystem
///
/// The file is read once at construction. Reads are served from memory, and
/// every change rewrites the whole file.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileCredentialStore {
    /// Opens the store at `path`, loading any credentials already saved there
    ///
    /// A missing file starts an empty store. An unreadable or corrupt file is
    /// reported and also starts an empty store; it is overwritten on the
    /// next change.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match Self::load(&path) {
            Ok(values) => values,
            Err(error) if error.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = (&error as &dyn std::error::Error),
                    "unable to read credentials file, starting empty"
                );
                BTreeMap::new()
            }
        };

        Self { path, values }
    }

    fn load(path: &Path) -> Result<BTreeMap<String, String>, io::Error> {
        let data = fs::read_to_string(path)?;
        let values = serde_json::from_str(&data)?;
        Ok(values)
    }

    fn write(&self) -> Result<(), io::Error> {
        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            file_opts.mode(0o600);
        }

        let mut file = file_opts.open(&self.path)?;
        let data = serde_json::to_string_pretty(&self.values)?;
        file.write_all(data.as_bytes())?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: CredentialKey) -> Option<String> {
        self.values.get(key.as_str()).cloned()
    }

    fn set(&mut self, key: CredentialKey, value: &str) -> Result<(), StoreError> {
        self.values.insert(key.as_str().to_owned(), value.to_owned());
        Ok(self.write()?)
    }

    fn remove(&mut self, key: CredentialKey) -> Result<(), StoreError> {
        if self.values.remove(key.as_str()).is_some() {
            self.write()?;
        }
        Ok(())
    }
}
