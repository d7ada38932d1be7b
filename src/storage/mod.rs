//! Session state persistence.
//!
//! Every backend implements [`SessionStore`] over opaque byte blobs keyed by a
//! token's [`SessionId`]. Typed access goes through [`SessionStoreExt`], which
//! encodes state as MessagePack so backends never see the caller's types.
//!
//! Contract shared by all backends:
//! - `save_raw` overwrites any previous value and (re)sets the TTL.
//! - `get_raw` refreshes the TTL in the same atomic step as the read, so a
//!   racing `delete` can never be undone by the refresh.
//! - `delete` of an absent entry succeeds.

pub mod distributed;
pub mod memory;
pub mod models;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::tokens::SessionId;

pub use distributed::RedisStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no session state was found in the session store")]
    NotFound,
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    #[error("session state serialization error: {0}")]
    Serialization(String),
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// A backend that persists session blobs with sliding expiration.
pub trait SessionStore: Send + Sync {
    /// Store `blob` under `id`, replacing any previous value and resetting its TTL.
    fn save_raw(&self, id: &SessionId, blob: Vec<u8>) -> Result<(), StoreError>;

    /// Fetch the blob stored under `id` and refresh its TTL.
    fn get_raw(&self, id: &SessionId) -> Result<Vec<u8>, StoreError>;

    /// Remove the entry for `id`. Absence is not an error.
    fn delete(&self, id: &SessionId) -> Result<(), StoreError>;

    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;
}

/// Typed helpers available on every [`SessionStore`], including trait objects.
pub trait SessionStoreExt: SessionStore {
    fn save<S: Serialize + ?Sized>(&self, id: &SessionId, state: &S) -> Result<(), StoreError> {
        let blob = rmp_serde::to_vec_named(state)?;
        self.save_raw(id, blob)
    }

    fn get<S: DeserializeOwned>(&self, id: &SessionId) -> Result<S, StoreError> {
        let blob = self.get_raw(id)?;
        Ok(rmp_serde::from_slice(&blob)?)
    }
}

impl<T: SessionStore + ?Sized> SessionStoreExt for T {}
