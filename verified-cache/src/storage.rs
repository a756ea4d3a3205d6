// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Byte storage contract and the in-process implementation. */

use {
    crate::{error::Result, scope},
    async_trait::async_trait,
    std::{
        collections::HashMap,
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    },
};

/// An opaque `string -> bytes` store with per-entry expiry.
///
/// Absence (no such key, or the entry expired) is the non-error
/// `Ok(None)`. A zero `ttl` resolves through [scope::resolve].
#[async_trait]
pub trait ByteStorage: Send + Sync {
    /// Fetch the bytes stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Drop every entry. Test support.
    async fn flush(&self) -> Result<()>;
}

#[async_trait]
impl<S> ByteStorage for Arc<S>
where
    S: ByteStorage + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        (**self).set(key, value, ttl).await
    }

    async fn flush(&self) -> Result<()> {
        (**self).flush().await
    }
}

struct MemoryEntry {
    value: Vec<u8>,
    expiry: Instant,
}

/// Process-local [ByteStorage] backed by a mutexed map.
///
/// Expired entries are dropped on read. The mutex is held only around
/// map access, never across an await point.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ByteStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().expect("storage mutex poisoned");

        if let Some(entry) = entries.get(key) {
            if Instant::now() < entry.expiry {
                return Ok(Some(entry.value.clone()));
            }

            entries.remove(key);
        }

        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let expiry = Instant::now() + scope::resolve(ttl);

        self.entries
            .lock()
            .expect("storage mutex poisoned")
            .insert(
                key.to_string(),
                MemoryEntry {
                    value: value.to_vec(),
                    expiry,
                },
            );

        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.entries
            .lock()
            .expect("storage mutex poisoned")
            .clear();

        Ok(())
    }
}
