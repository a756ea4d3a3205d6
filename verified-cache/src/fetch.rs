// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! HTTP fetching as a cacheable function. */

use {
    crate::{error::Result, function::Function},
    async_trait::async_trait,
};

/// `GET url -> body` as a [Function].
///
/// Wrapped in [crate::function::Memoized] with [crate::function::RawCodec]
/// this becomes a URL-keyed byte cache. Non-success statuses are errors,
/// so they never reach a cache layer above.
pub struct UrlFetcher {
    client: reqwest::Client,
}

impl UrlFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Function<String, Vec<u8>> for UrlFetcher {
    async fn call(&self, url: String) -> Result<Vec<u8>> {
        tracing::debug!(%url, "fetching upstream");

        let response = self.client.get(&url).send().await?.error_for_status()?;

        Ok(response.bytes().await?.to_vec())
    }
}
