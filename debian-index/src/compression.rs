// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Compression formats used by repository index files. */

use {
    async_compression::futures::bufread::{GzipDecoder, GzipEncoder, XzDecoder, XzEncoder},
    futures::AsyncReadExt,
};

/// Compression applied to an index file.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Compression {
    /// No compression (no extension).
    None,

    /// Gzip compression (.gz extension).
    Gzip,

    /// XZ compression (.xz extension).
    Xz,
}

impl Compression {
    /// Filename extension for files compressed in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => ".gz",
            Self::Xz => ".xz",
        }
    }

    /// Resolve a filename extension to a compression format.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "" => Some(Self::None),
            ".gz" => Some(Self::Gzip),
            ".xz" => Some(Self::Xz),
            _ => None,
        }
    }

    /// Compress a buffer. The identity for [Self::None].
    pub async fn compress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();

        match self {
            Self::None => out.extend_from_slice(data),
            Self::Gzip => {
                GzipEncoder::new(data).read_to_end(&mut out).await?;
            }
            Self::Xz => {
                XzEncoder::new(data).read_to_end(&mut out).await?;
            }
        }

        Ok(out)
    }

    /// Decompress a buffer. The identity for [Self::None].
    pub async fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();

        match self {
            Self::None => out.extend_from_slice(data),
            Self::Gzip => {
                GzipDecoder::new(data).read_to_end(&mut out).await?;
            }
            Self::Xz => {
                XzDecoder::new(data).read_to_end(&mut out).await?;
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gzip_roundtrip() -> std::io::Result<()> {
        let compressed = Compression::Gzip.compress(b"hello").await?;
        assert_ne!(compressed, b"hello");
        assert_eq!(Compression::Gzip.decompress(&compressed).await?, b"hello");

        Ok(())
    }

    #[tokio::test]
    async fn xz_roundtrip() -> std::io::Result<()> {
        let compressed = Compression::Xz.compress(b"hello").await?;
        assert_ne!(compressed, b"hello");
        assert_eq!(Compression::Xz.decompress(&compressed).await?, b"hello");

        Ok(())
    }

    #[tokio::test]
    async fn none_is_identity() -> std::io::Result<()> {
        assert_eq!(Compression::None.compress(b"hello").await?, b"hello");
        assert_eq!(Compression::None.decompress(b"hello").await?, b"hello");

        Ok(())
    }

    #[tokio::test]
    async fn gzip_is_deterministic() -> std::io::Result<()> {
        let a = Compression::Gzip.compress(b"same input").await?;
        let b = Compression::Gzip.compress(b"same input").await?;
        assert_eq!(a, b);

        Ok(())
    }

    #[test]
    fn extension_mapping() {
        assert_eq!(Compression::from_extension(""), Some(Compression::None));
        assert_eq!(Compression::from_extension(".gz"), Some(Compression::Gzip));
        assert_eq!(Compression::from_extension(".xz"), Some(Compression::Xz));
        assert_eq!(Compression::from_extension(".bz2"), None);

        assert_eq!(Compression::Gzip.extension(), ".gz");
    }
}
