//! An in-memory credential store

use std::collections::HashMap;

use super::{CredentialKey, CredentialStore, StoreError};

/// A credential store that lives only as long as the process
#[derive(Default, Debug)]
pub struct InMemoryCredentialStore {
    values: HashMap<CredentialKey, String>,
}

impl InMemoryCredentialStore {
    /// Constructs a new, empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with a value, for starting a session from known credentials
    pub fn with(mut self, key: CredentialKey, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn get(&self, key: CredentialKey) -> Option<String> {
        self.values.get(&key).cloned()
    }

    fn set(&mut self, key: CredentialKey, value: &str) -> Result<(), StoreError> {
        self.values.insert(key, value.to_owned());
        Ok(())
    }

    fn remove(&mut self, key: CredentialKey) -> Result<(), StoreError> {
        self.values.remove(&key);
        Ok(())
    }
}
