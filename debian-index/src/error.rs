// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum DebianError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0:?}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0:?}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("hex parsing error: {0:?}")]
    Hex(#[from] hex::FromHexError),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("PGP error: {0:?}")]
    Pgp(#[from] pgp::errors::Error),

    #[error("regex error: {0:?}")]
    Regex(#[from] regex::Error),

    #[error("cache error: {0}")]
    Cache(#[from] verified_cache::CacheError),

    #[error("signature verification failed")]
    BadSignature,

    #[error("control file parse error: {0}")]
    ControlParse(String),

    #[error("expected 1 paragraph in control file; got {0}")]
    ParagraphCount(usize),

    #[error("unknown field in paragraph: {0}")]
    UnknownField(String),

    #[error("required field missing in paragraph: {0}")]
    MissingField(&'static str),

    #[error("malformed date: {0}")]
    BadDate(String),

    #[error("malformed digest table line: {0}")]
    DigestLine(String),

    #[error("release is missing the {component}/{architecture} packages index")]
    MissingIndex {
        component: String,
        architecture: String,
    },

    #[error("size mismatch for {path}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("configured architecture not declared by upstream release: {0}")]
    UnknownArchitecture(String),

    #[error("configured component not declared by upstream release: {0}")]
    UnknownComponent(String),

    #[error("policy {0} contains no constraints and would admit everything")]
    PolicyEmpty(String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, DebianError>;
