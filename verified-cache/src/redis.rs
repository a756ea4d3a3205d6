// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Redis-backed byte storage. */

use {
    crate::{error::Result, scope, storage::ByteStorage},
    async_trait::async_trait,
    redis::AsyncCommands,
    std::time::Duration,
};

/// Shared external [ByteStorage] on a Redis server.
///
/// The connection manager transparently reconnects, so instances are
/// cheap to clone and long-lived.
#[derive(Clone)]
pub struct RedisStorage {
    connection: redis::aio::ConnectionManager,
}

impl RedisStorage {
    /// Connect to the server at `url` (`redis://host:port`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection_manager().await?;

        Ok(Self { connection })
    }
}

#[async_trait]
impl ByteStorage for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut connection = self.connection.clone();
        Ok(connection.get(key).await?)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let ttl = scope::resolve(ttl);
        let mut connection = self.connection.clone();
        connection
            .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await?;

        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("FLUSHDB")
            .query_async::<_, ()>(&mut connection)
            .await?;

        Ok(())
    }
}
