// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("JSON codec error: {0:?}")]
    Json(#[from] serde_json::Error),

    #[error("protobuf decode error: {0:?}")]
    ProtoDecode(#[from] prost::DecodeError),

    #[error("Redis error: {0:?}")]
    Redis(#[from] ::redis::RedisError),

    #[error("HTTP error: {0:?}")]
    Http(#[from] reqwest::Error),

    #[error("envelope stamped by unknown key: {0}")]
    UnknownKeyId(String),

    #[error("envelope signature verification failed")]
    BadEnvelopeSignature,

    #[error("active signing key {0} is not in the trusted set")]
    ActiveKeyMissing(String),

    #[error("handler error: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("race had no entrants")]
    NoRaceEntrants,

    #[error("race entrant panicked or was aborted")]
    RaceEntrantLost,
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, CacheError>;
