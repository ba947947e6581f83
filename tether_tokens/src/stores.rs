//! Durable storage for the current credentials

use std::{error, fmt};

pub mod file;
pub mod in_memory;

pub use file::FileCredentialStore;
pub use in_memory::InMemoryCredentialStore;

/// The two credentials a session persists
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    /// The bearer access token
    Access,
    /// The refresh token used to renew the access token
    Renewal,
}

impl CredentialKey {
    /// The stable name the credential is stored under
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access_token",
            Self::Renewal => "refresh_token",
        }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error persisting a value to a credential store
pub type StoreError = Box<dyn error::Error + Send + Sync + 'static>;

/// A durable key-value store for credentials
///
/// Reads never fail: a store that cannot produce a value reports it as absent.
pub trait CredentialStore: Send {
    /// Reads the value stored under `key`
    fn get(&self, key: CredentialKey) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous value
    fn set(&mut self, key: CredentialKey, value: &str) -> Result<(), StoreError>;

    /// Removes the value stored under `key`, if any
    fn remove(&mut self, key: CredentialKey) -> Result<(), StoreError>;
}

impl<S: CredentialStore + ?Sized> CredentialStore for Box<S> {
    fn get(&self, key: CredentialKey) -> Option<String> {
        (**self).get(key)
    }

    fn set(&mut self, key: CredentialKey, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: CredentialKey) -> Result<(), StoreError> {
        (**self).remove(key)
    }
}
