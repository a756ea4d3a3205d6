// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Remote repository loading.

[RemoteRepository] reads an upstream Debian mirror through the caching
function layer. The release pipeline is flat: the verified release is
loaded once, then threaded by value into the packages loader, so the
two stages share nothing but the data.

Both loader entry points implement [Function] over serializable query
types, which makes them directly memoizable: the query *is* the cache
key.
*/

use {
    crate::{
        compression::Compression,
        control::parse_control_file,
        error::{DebianError, Result},
        package::Package,
        release::{packages_index_path, Release},
        signing,
    },
    async_trait::async_trait,
    futures::{StreamExt, TryStreamExt},
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    std::sync::Arc,
    verified_cache::{scope, CacheError, Function},
};

/// How many `Packages` indices are fetched concurrently.
pub const COMPONENT_FETCH_CONCURRENCY: usize = 4;

/// A boxed URL fetcher, usually memoized.
pub type UrlFn = Arc<dyn Function<String, Vec<u8>>>;

/// A boxed verifying index fetcher, usually memoized.
pub type IndexFn = Arc<dyn Function<IndexFetch, Vec<u8>>>;

/// Identifies one upstream release. Also the release loader cache key.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ReleaseQuery {
    /// Upstream mirror base, e.g. `https://deb.debian.org/debian`.
    pub mirror_url: String,

    /// Distribution under `dists/`, e.g. `bullseye`.
    pub dist: String,

    /// Architectures to serve; must be declared by the upstream release.
    pub architectures: Vec<String>,

    /// Components to mirror; must be declared by the upstream release.
    pub components: Vec<String>,

    /// Armored public key the upstream `InRelease` must verify against.
    pub upstream_key: String,
}

/// Identifies one packages load. Also the packages loader cache key.
///
/// Embedding the verified release makes the key content-addressed:
/// when the upstream digest table changes, so does the key.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PackagesQuery {
    pub query: ReleaseQuery,
    pub release: Release,
    pub architecture: String,

    /// Downstream repository name, used to rewrite pool paths.
    pub repo: String,
}

/// A digest-pinned fetch. Also the index fetcher cache key, so cached
/// bytes are bound to the digest they were verified against.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IndexFetch {
    pub url: String,
    pub size: u64,
    pub sha256: String,
}

/// Check a body against its expected size and SHA-256.
pub fn verify_index(body: &[u8], expected_size: u64, expected_sha256: &str, path: &str) -> Result<()> {
    if body.len() as u64 != expected_size {
        return Err(DebianError::SizeMismatch {
            path: path.to_string(),
            expected: expected_size,
            actual: body.len() as u64,
        });
    }

    let actual = hex::encode(Sha256::digest(body));
    if actual != expected_sha256 {
        return Err(DebianError::DigestMismatch {
            path: path.to_string(),
            expected: expected_sha256.to_string(),
            actual,
        });
    }

    Ok(())
}

/// Inner function of the memoized index fetcher.
///
/// Verification happens here, before any memoization layer stores the
/// bytes: a body that fails its size or digest check is an error, and
/// errors are never cached.
pub struct VerifyingFetch {
    fetcher: UrlFn,
}

impl VerifyingFetch {
    pub fn new(fetcher: UrlFn) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Function<IndexFetch, Vec<u8>> for VerifyingFetch {
    async fn call(&self, fetch: IndexFetch) -> verified_cache::Result<Vec<u8>> {
        let body = self.fetcher.call(fetch.url.clone()).await?;

        verify_index(&body, fetch.size, &fetch.sha256, &fetch.url)
            .map_err(|e| CacheError::Handler(Box::new(e)))?;

        Ok(body)
    }
}

/// Loads releases and package lists from an upstream mirror.
pub struct RemoteRepository {
    urls: UrlFn,
    indices: IndexFn,
}

impl RemoteRepository {
    pub fn new(urls: UrlFn, indices: IndexFn) -> Self {
        Self { urls, indices }
    }

    async fn load_release(&self, query: &ReleaseQuery) -> Result<Release> {
        let key = signing::parse_armored_public_key(&query.upstream_key)?;

        let url = format!(
            "{}/dists/{}/InRelease",
            query.mirror_url.trim_end_matches('/'),
            query.dist
        );

        tracing::debug!(dist = %query.dist, %url, "loading upstream release");
        let raw = self.urls.call(url).await?;

        let mut release = Release::from_clearsigned(&raw, &key)?;

        // The upstream declaration is trusted; configuration only
        // narrows it. Asking for something upstream does not publish
        // is a configuration error, not a reason to extend the lists.
        for architecture in &query.architectures {
            if !release.architectures.contains(architecture) {
                return Err(DebianError::UnknownArchitecture(architecture.clone()));
            }
        }
        for component in &query.components {
            if !release.components.contains(component) {
                return Err(DebianError::UnknownComponent(component.clone()));
            }
        }

        release.architectures = query.architectures.clone();
        release.components = query.components.clone();

        Ok(release)
    }

    async fn load_packages(&self, query: &PackagesQuery) -> Result<Vec<Package>> {
        tracing::debug!(
            dist = %query.query.dist,
            architecture = %query.architecture,
            "loading upstream packages"
        );

        let mut fetches = Vec::with_capacity(query.query.components.len());
        for component in &query.query.components {
            fetches.push(self.load_component(query, component.clone()));
        }

        // Ordered bounded fan-out: output stays in component order and
        // the first failure drops the in-flight siblings.
        let lists: Vec<Vec<Package>> = futures::stream::iter(fetches)
            .buffered(COMPONENT_FETCH_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(lists.into_iter().flatten().collect())
    }

    fn load_component<'a>(
        &'a self,
        query: &'a PackagesQuery,
        component: String,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<Package>>> + Send + 'a>> {
        Box::pin(async move { self.load_component_inner(query, &component).await })
    }

    async fn load_component_inner(
        &self,
        query: &PackagesQuery,
        component: &str,
    ) -> Result<Vec<Package>> {
        let index = packages_index_path(component, &query.architecture);

        let entry = query.release.digests.get(&index).ok_or_else(|| {
            DebianError::MissingIndex {
                component: component.to_string(),
                architecture: query.architecture.clone(),
            }
        })?;

        let url = format!(
            "{}/dists/{}/{}",
            query.query.mirror_url.trim_end_matches('/'),
            query.query.dist,
            entry.path
        );

        let fetch = IndexFetch {
            url,
            size: entry.size,
            sha256: entry.sha256.clone(),
        };

        let body = if entry.path.contains("/by-hash/") {
            // Content-addressed: the URL names the digest, so the cached
            // bytes stay valid far longer than a mutable index.
            scope::with_ttl(scope::CONTENT_ADDRESSED_TTL, self.indices.call(fetch)).await?
        } else {
            self.indices.call(fetch).await?
        };

        // Hits come out of a shared backend; re-check before trusting.
        verify_index(&body, entry.size, &entry.sha256, &entry.path)?;

        let text = Compression::Gzip.decompress(&body).await?;

        let paragraphs = parse_control_file(&mut text.as_slice())?;
        let mut packages = paragraphs
            .iter()
            .map(Package::from_paragraph)
            .collect::<Result<Vec<_>>>()?;

        // Pool URLs must resolve through the proxy's dist-scoped pool
        // route rather than against the mirror root.
        for package in &mut packages {
            if !package.filename.is_empty() {
                package.filename = format!("dists/{}/{}", query.repo, package.filename);
            }
        }

        Ok(packages)
    }
}

#[async_trait]
impl Function<ReleaseQuery, Release> for RemoteRepository {
    async fn call(&self, query: ReleaseQuery) -> verified_cache::Result<Release> {
        self.load_release(&query)
            .await
            .map_err(|e| CacheError::Handler(Box::new(e)))
    }
}

#[async_trait]
impl Function<PackagesQuery, Vec<Package>> for RemoteRepository {
    async fn call(&self, query: PackagesQuery) -> verified_cache::Result<Vec<Package>> {
        self.load_packages(&query)
            .await
            .map_err(|e| CacheError::Handler(Box::new(e)))
    }
}
