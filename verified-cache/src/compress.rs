// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Transparent compression wrappers.

Values are compressed on `set` and decompressed on `get`. The key is
untouched, so compressed and uncompressed stacks over the same backend
must use distinct key prefixes. Empty values pass through untouched in
both directions.
*/

use {
    crate::{error::Result, storage::ByteStorage},
    async_compression::futures::bufread::{GzipDecoder, GzipEncoder, ZstdDecoder, ZstdEncoder},
    async_trait::async_trait,
    futures::AsyncReadExt,
    std::time::Duration,
};

async fn gzip_compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzipEncoder::new(data).read_to_end(&mut out).await?;
    Ok(out)
}

async fn gzip_decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzipDecoder::new(data).read_to_end(&mut out).await?;
    Ok(out)
}

async fn zstd_compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    ZstdEncoder::new(data).read_to_end(&mut out).await?;
    Ok(out)
}

async fn zstd_decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    ZstdDecoder::new(data).read_to_end(&mut out).await?;
    Ok(out)
}

/// A [ByteStorage] storing values gzip-compressed.
pub struct GzipStorage<S> {
    inner: S,
}

impl<S: ByteStorage> GzipStorage<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> ByteStorage for GzipStorage<S>
where
    S: ByteStorage,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.inner.get(key).await? {
            None => Ok(None),
            Some(stored) if stored.is_empty() => Ok(Some(stored)),
            Some(stored) => Ok(Some(gzip_decompress(&stored).await?)),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        if value.is_empty() {
            return self.inner.set(key, value, ttl).await;
        }

        let compressed = gzip_compress(value).await?;
        self.inner.set(key, &compressed, ttl).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

/// A [ByteStorage] storing values zstd-compressed.
pub struct ZstdStorage<S> {
    inner: S,
}

impl<S: ByteStorage> ZstdStorage<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> ByteStorage for ZstdStorage<S>
where
    S: ByteStorage,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.inner.get(key).await? {
            None => Ok(None),
            Some(stored) if stored.is_empty() => Ok(Some(stored)),
            Some(stored) => Ok(Some(zstd_decompress(&stored).await?)),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        if value.is_empty() {
            return self.inner.set(key, value, ttl).await;
        }

        let compressed = zstd_compress(value).await?;
        self.inner.set(key, &compressed, ttl).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}
