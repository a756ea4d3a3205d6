// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Content-verified, function-keyed caching.

This crate provides the cache substrate used by the proxy: an opaque
byte storage contract with in-memory and Redis implementations,
composable codec wrappers (key prefixing, gzip/zstd compression, an
HMAC-authenticated envelope), and a memoization layer that turns any
`async fn(K) -> V` into a cached function with pluggable key hashing
and value encoding.

# A Tour of Functionality

[storage::ByteStorage] is the foundational contract: `get` resolves a
UTF-8 key to bytes (absence is a non-error `None`), `set` stores bytes
with a TTL. [storage::MemoryStorage] keeps entries in a mutexed map and
[redis::RedisStorage] delegates to a Redis server.

Wrappers implement the same contract over an inner storage:
[prefix::PrefixStorage] namespaces keys, [compress::GzipStorage] and
[compress::ZstdStorage] transparently compress values, and
[signed::SignedStorage] authenticates values with HMAC-SHA256 so a
shared backend cannot silently alter cached bytes.

[function::Function] abstracts an async unary function.
[function::Memoized] caches such a function over a [storage::ByteStorage],
mapping application keys to storage keys via a [function::KeyMapper]
(stable JSON encoding hashed with SHA-256 by default) and values through
a [function::ValueCodec] (raw bytes, JSON, or protobuf). [race::Race]
runs several functions against the same key and resolves with the first
success. [fetch::UrlFetcher] is the HTTP `GET` building block that,
memoized, becomes the cached fetcher the repository pipeline rides on.

TTLs of zero resolve through [scope]: callers can install a
request-scoped override (used for content-addressed URLs that are safe
to cache for a long time) without threading a duration through every
call site.
*/

pub mod compress;
pub mod error;
pub mod fetch;
pub mod function;
pub mod prefix;
pub mod race;
pub mod redis;
pub mod scope;
pub mod signed;
pub mod storage;

pub use crate::{
    error::{CacheError, Result},
    function::{Function, JsonCodec, JsonSha256, KeyMapper, Memoized, ProtoCodec, RawCodec},
    storage::{ByteStorage, MemoryStorage},
};
