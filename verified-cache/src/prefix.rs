// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Key-namespacing storage wrapper. */

use {
    crate::{error::Result, storage::ByteStorage},
    async_trait::async_trait,
    std::time::Duration,
};

/// A [ByteStorage] that prepends `"<label>:"` to every key.
///
/// Different consumers of a shared backend use distinct labels so
/// their entries cannot collide.
pub struct PrefixStorage<S> {
    prefix: String,
    inner: S,
}

impl<S> PrefixStorage<S>
where
    S: ByteStorage,
{
    pub fn new(prefix: impl ToString, inner: S) -> Self {
        Self {
            prefix: prefix.to_string(),
            inner,
        }
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl<S> ByteStorage for PrefixStorage<S>
where
    S: ByteStorage,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(&self.prefixed(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.inner.set(&self.prefixed(key), value, ttl).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}
