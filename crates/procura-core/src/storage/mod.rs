//! Key-value persistence for credentials.
//!
//! Two logical stores back the token manager:
//! - a session-scoped store that ends with the process (`MemoryStore`)
//! - a durable store that survives restarts (`FileStore` or `KeyringStore`)
//!
//! All of them implement `KeyValueStore` so the token logic never touches
//! a concrete backend.

pub mod file;
pub mod keychain;
pub mod memory;

pub use file::FileStore;
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to access store file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse store file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Keychain error: {0}")]
    Keychain(#[from] keyring::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }
}
