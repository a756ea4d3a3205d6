// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Function memoization over byte storage.

[Memoized] turns any [Function] into a cached one. The application key
is reduced to a storage key by a [KeyMapper]; the value crosses the
storage boundary through a [ValueCodec]. Cache layers therefore compose
by wrapping functions and storages, not by subtyping.
*/

use {
    crate::{
        error::Result,
        storage::ByteStorage,
    },
    async_trait::async_trait,
    serde::{de::DeserializeOwned, Serialize},
    sha2::{Digest, Sha256},
    std::{sync::Arc, time::Duration},
};

/// An async unary function `K -> V`.
#[async_trait]
pub trait Function<K, V>: Send + Sync {
    async fn call(&self, key: K) -> Result<V>;
}

#[async_trait]
impl<K, V, F> Function<K, V> for Arc<F>
where
    F: Function<K, V> + ?Sized,
    K: Send + 'static,
    V: Send + 'static,
{
    async fn call(&self, key: K) -> Result<V> {
        (**self).call(key).await
    }
}

/// Reduces an application key to a storage key.
pub trait KeyMapper<K>: Send + Sync {
    fn storage_key(&self, key: &K) -> Result<String>;
}

/// Default mapper: stable JSON encoding of the key, SHA-256 hashed,
/// rendered as lowercase hex.
///
/// Stability relies on the key type serializing deterministically;
/// map-shaped keys should use `BTreeMap` so entry order is fixed.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSha256;

impl<K> KeyMapper<K> for JsonSha256
where
    K: Serialize + Send + Sync,
{
    fn storage_key(&self, key: &K) -> Result<String> {
        let encoded = serde_json::to_vec(key)?;
        Ok(hex::encode(Sha256::digest(&encoded)))
    }
}

/// Encodes values crossing the storage boundary.
pub trait ValueCodec<V>: Send + Sync {
    fn encode(&self, value: &V) -> Result<Vec<u8>>;
    fn decode(&self, data: &[u8]) -> Result<V>;
}

/// Identity codec for raw byte values.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawCodec;

impl ValueCodec<Vec<u8>> for RawCodec {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// JSON value codec. The default choice for serde-modeled values.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl<V> ValueCodec<V> for JsonCodec
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, data: &[u8]) -> Result<V> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Protobuf value codec for prost messages.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProtoCodec;

impl<V> ValueCodec<V> for ProtoCodec
where
    V: prost::Message + Default,
{
    fn encode(&self, value: &V) -> Result<Vec<u8>> {
        Ok(value.encode_to_vec())
    }

    fn decode(&self, data: &[u8]) -> Result<V> {
        Ok(V::decode(data)?)
    }
}

/// A [Function] cached over a [ByteStorage].
///
/// On a hit the stored bytes are decoded and returned. A value that no
/// longer decodes (codec change, partial write) is treated as a miss
/// rather than poisoning the caller. On a miss the inner function runs
/// and only a successful result is stored; errors surface unchanged
/// and are never cached.
pub struct Memoized<F, S, C, M = JsonSha256> {
    inner: F,
    storage: S,
    codec: C,
    mapper: M,
    ttl: Duration,
}

impl<F, S, C> Memoized<F, S, C> {
    /// Construct an instance with the default JSON/SHA-256 key mapper.
    ///
    /// A zero `ttl` resolves through the scoped override at store time.
    pub fn new(storage: S, inner: F, codec: C, ttl: Duration) -> Self {
        Self {
            inner,
            storage,
            codec,
            mapper: JsonSha256,
            ttl,
        }
    }
}

impl<F, S, C, M> Memoized<F, S, C, M> {
    /// Construct an instance with an explicit key mapper.
    pub fn with_mapper(storage: S, inner: F, codec: C, mapper: M, ttl: Duration) -> Self {
        Self {
            inner,
            storage,
            codec,
            mapper,
            ttl,
        }
    }
}

#[async_trait]
impl<K, V, F, S, C, M> Function<K, V> for Memoized<F, S, C, M>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
    F: Function<K, V>,
    S: ByteStorage,
    C: ValueCodec<V>,
    M: KeyMapper<K>,
{
    async fn call(&self, key: K) -> Result<V> {
        let storage_key = self.mapper.storage_key(&key)?;

        if let Some(stored) = self.storage.get(&storage_key).await? {
            match self.codec.decode(&stored) {
                Ok(value) => return Ok(value),
                Err(error) => {
                    tracing::warn!(key = %storage_key, %error, "discarding undecodable cache entry");
                }
            }
        }

        let value = self.inner.call(key).await?;

        let encoded = self.codec.encode(&value)?;
        self.storage.set(&storage_key, &encoded, self.ttl).await?;

        Ok(value)
    }
}
