// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! HMAC-authenticated storage envelope.

A shared cache backend (Redis reachable by several services) is not a
trust boundary. This wrapper seals every value in a [SignedEntry]
envelope: `set` stamps the payload with the active key's HMAC-SHA256,
`get` refuses to return a payload whose MAC does not verify against a
trusted key. Verification is constant-time.
*/

use {
    crate::{
        error::{CacheError, Result},
        storage::ByteStorage,
    },
    async_trait::async_trait,
    hmac::{Hmac, Mac},
    prost::Message,
    sha2::Sha256,
    std::{collections::HashMap, time::Duration},
};

type HmacSha256 = Hmac<Sha256>;

/// Wire envelope for authenticated cache entries.
#[derive(Clone, PartialEq, Message)]
pub struct SignedEntry {
    /// Identifier of the HMAC key that produced `signature`.
    #[prost(string, tag = "1")]
    pub key_id: String,

    /// HMAC-SHA256 over `payload`.
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,

    /// The caller's value, unmodified.
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
}

/// A [ByteStorage] that authenticates values with HMAC-SHA256.
pub struct SignedStorage<S> {
    trusted_keys: HashMap<String, Vec<u8>>,
    active_key: String,
    inner: S,
}

impl<S> SignedStorage<S>
where
    S: ByteStorage,
{
    /// Construct an instance writing under `active_key`.
    ///
    /// Reads accept envelopes stamped by any key in `trusted_keys`,
    /// which allows key rotation without flushing the backend.
    pub fn new(
        trusted_keys: HashMap<String, Vec<u8>>,
        active_key: impl ToString,
        inner: S,
    ) -> Result<Self> {
        let active_key = active_key.to_string();
        if !trusted_keys.contains_key(&active_key) {
            return Err(CacheError::ActiveKeyMissing(active_key));
        }

        Ok(Self {
            trusted_keys,
            active_key,
            inner,
        })
    }

    fn mac(key: &[u8], payload: &[u8]) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(payload);
        mac
    }
}

#[async_trait]
impl<S> ByteStorage for SignedStorage<S>
where
    S: ByteStorage,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let stored = match self.inner.get(key).await? {
            Some(stored) => stored,
            None => return Ok(None),
        };

        let entry = SignedEntry::decode(stored.as_slice())?;

        let hmac_key = self
            .trusted_keys
            .get(&entry.key_id)
            .ok_or_else(|| CacheError::UnknownKeyId(entry.key_id.clone()))?;

        Self::mac(hmac_key, &entry.payload)
            .verify_slice(&entry.signature)
            .map_err(|_| CacheError::BadEnvelopeSignature)?;

        Ok(Some(entry.payload))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let hmac_key = &self.trusted_keys[&self.active_key];

        let entry = SignedEntry {
            key_id: self.active_key.clone(),
            signature: Self::mac(hmac_key, value).finalize().into_bytes().to_vec(),
            payload: value.to_vec(),
        };

        self.inner.set(key, &entry.encode_to_vec(), ttl).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::storage::MemoryStorage, std::sync::Arc};

    fn keys() -> HashMap<String, Vec<u8>> {
        HashMap::from([
            ("k1".to_string(), b"first secret".to_vec()),
            ("k2".to_string(), b"second secret".to_vec()),
        ])
    }

    #[tokio::test]
    async fn roundtrip() -> Result<()> {
        let storage = SignedStorage::new(keys(), "k1", MemoryStorage::new())?;

        storage.set("key", b"payload", Duration::from_secs(60)).await?;

        assert_eq!(storage.get("key").await?, Some(b"payload".to_vec()));

        Ok(())
    }

    #[tokio::test]
    async fn unknown_active_key_refused() {
        assert!(matches!(
            SignedStorage::new(keys(), "nope", MemoryStorage::new()),
            Err(CacheError::ActiveKeyMissing(_))
        ));
    }

    #[tokio::test]
    async fn tampered_payload_fails_closed() -> Result<()> {
        let backend = Arc::new(MemoryStorage::new());
        let storage = SignedStorage::new(keys(), "k1", backend.clone())?;

        storage.set("key", b"payload", Duration::from_secs(60)).await?;

        // Flip one bit of the stored envelope's payload bytes.
        let mut raw = backend.get("key").await?.unwrap();
        let mut entry = SignedEntry::decode(raw.as_slice()).unwrap();
        entry.payload[0] ^= 0x01;
        raw = entry.encode_to_vec();
        backend.set("key", &raw, Duration::from_secs(60)).await?;

        assert!(matches!(
            storage.get("key").await,
            Err(CacheError::BadEnvelopeSignature)
        ));

        Ok(())
    }

    #[tokio::test]
    async fn unknown_key_id_fails_closed() -> Result<()> {
        let backend = Arc::new(MemoryStorage::new());
        let storage = SignedStorage::new(keys(), "k1", backend.clone())?;

        storage.set("key", b"payload", Duration::from_secs(60)).await?;

        let mut entry =
            SignedEntry::decode(backend.get("key").await?.unwrap().as_slice()).unwrap();
        entry.key_id = "rogue".to_string();
        backend
            .set("key", &entry.encode_to_vec(), Duration::from_secs(60))
            .await?;

        assert!(matches!(
            storage.get("key").await,
            Err(CacheError::UnknownKeyId(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn rotated_reader_accepts_old_writer() -> Result<()> {
        let backend = Arc::new(MemoryStorage::new());

        let writer = SignedStorage::new(keys(), "k1", backend.clone())?;
        writer.set("key", b"payload", Duration::from_secs(60)).await?;

        let reader = SignedStorage::new(keys(), "k2", backend)?;
        assert_eq!(reader.get("key").await?, Some(b"payload".to_vec()));

        Ok(())
    }
}
