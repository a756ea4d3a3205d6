// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The APT-facing routes.

Implements <https://wiki.debian.org/DebianRepository/Format> on top of
the repository pipeline:

* `/debian/dists/{repo}/InRelease` serves the rebuilt, locally signed
  index.
* `/debian/dists/{repo}/{component}/{arch_dir}/Packages[.gz|.xz]`
  serves the admitted package lists the index digests.
* `/debian/dists/{repo}/pool/{*path}` redirects pool downloads to the
  upstream mirror.

An unknown repository name is a 404 with an empty body. Everything a
client can fetch is derived from the same filtered package lists, so
the digests in `InRelease` always match the sibling responses.
*/

use {
    crate::mux::{CachedMux, CachedResponse, RouteRequest},
    async_trait::async_trait,
    debian_index::{
        loader::{PackagesQuery, ReleaseQuery},
        policy::{self, PackagePolicy},
        rebuild,
        release::Release,
        signing::SignedSecretKey,
        compression::Compression,
        DebianError, Package,
    },
    std::{collections::BTreeMap, collections::HashMap, sync::Arc, time::Duration},
    verified_cache::{CacheError, Function},
};

/// Response cache lifetime for the index routes.
const INDEX_TTL: Duration = Duration::from_secs(5 * 60);

/// The memoized release loader.
pub type ReleaseFn = Arc<dyn Function<ReleaseQuery, Release>>;

/// The memoized packages loader.
pub type PackagesFn = Arc<dyn Function<PackagesQuery, Vec<Package>>>;

fn handler_error(error: DebianError) -> CacheError {
    CacheError::Handler(Box::new(error))
}

struct RepoContext {
    query: ReleaseQuery,
    signing_key: SignedSecretKey,
    policy: Arc<dyn PackagePolicy>,
}

/// Serves one or more downstream repositories.
pub struct DebianHandler {
    repos: HashMap<String, RepoContext>,
    releases: ReleaseFn,
    packages: PackagesFn,
}

impl DebianHandler {
    pub fn new(releases: ReleaseFn, packages: PackagesFn) -> Self {
        Self {
            repos: HashMap::new(),
            releases,
            packages,
        }
    }

    /// Add a downstream repository.
    pub fn add_repository(
        &mut self,
        name: impl ToString,
        query: ReleaseQuery,
        signing_key: SignedSecretKey,
        policy: Arc<dyn PackagePolicy>,
    ) {
        self.repos.insert(
            name.to_string(),
            RepoContext {
                query,
                signing_key,
                policy,
            },
        );
    }

    /// Bind all routes, consuming the handler.
    pub fn register(self, mux: &mut CachedMux) {
        let handler = Arc::new(self);

        mux.register(
            "/debian/dists/{repo}/InRelease",
            INDEX_TTL,
            Arc::new(InReleaseRoute {
                handler: handler.clone(),
            }),
        );

        for (path, compression) in [
            (
                "/debian/dists/{repo}/{component}/{arch_dir}/Packages",
                Compression::None,
            ),
            (
                "/debian/dists/{repo}/{component}/{arch_dir}/Packages.gz",
                Compression::Gzip,
            ),
            (
                "/debian/dists/{repo}/{component}/{arch_dir}/Packages.xz",
                Compression::Xz,
            ),
        ] {
            mux.register(
                path,
                INDEX_TTL,
                Arc::new(PackagesRoute {
                    handler: handler.clone(),
                    compression,
                }),
            );
        }

        // Pool redirects are cheap to compute; caching them buys nothing.
        mux.register(
            "/debian/dists/{repo}/pool/{*path}",
            Duration::ZERO,
            Arc::new(PoolRoute { handler }),
        );
    }

    /// Load and filter the packages of one architecture.
    async fn admitted_packages(
        &self,
        context: &RepoContext,
        release: &Release,
        architecture: &str,
        repo: &str,
    ) -> verified_cache::Result<Vec<Package>> {
        let packages = self
            .packages
            .call(PackagesQuery {
                query: context.query.clone(),
                release: release.clone(),
                architecture: architecture.to_string(),
                repo: repo.to_string(),
            })
            .await?;

        policy::filter_packages(context.policy.as_ref(), packages).map_err(handler_error)
    }
}

struct InReleaseRoute {
    handler: Arc<DebianHandler>,
}

#[async_trait]
impl Function<RouteRequest, CachedResponse> for InReleaseRoute {
    async fn call(&self, request: RouteRequest) -> verified_cache::Result<CachedResponse> {
        let repo = request.vars.get("repo").cloned().unwrap_or_default();
        let Some(context) = self.handler.repos.get(&repo) else {
            return Ok(CachedResponse::not_found());
        };

        let release = self.handler.releases.call(context.query.clone()).await?;

        let mut admitted = BTreeMap::new();
        for architecture in &release.architectures {
            let packages = self
                .handler
                .admitted_packages(context, &release, architecture, &repo)
                .await?;
            admitted.insert(architecture.clone(), packages);
        }

        let signed = rebuild::build_signed_release(&release, &admitted, &context.signing_key)
            .await
            .map_err(handler_error)?;

        Ok(CachedResponse::ok("text/plain", signed.into_bytes()))
    }
}

struct PackagesRoute {
    handler: Arc<DebianHandler>,
    compression: Compression,
}

#[async_trait]
impl Function<RouteRequest, CachedResponse> for PackagesRoute {
    async fn call(&self, request: RouteRequest) -> verified_cache::Result<CachedResponse> {
        let repo = request.vars.get("repo").cloned().unwrap_or_default();
        let Some(context) = self.handler.repos.get(&repo) else {
            return Ok(CachedResponse::not_found());
        };

        // The rebuilt index digests everything under the merged `main`
        // component; other component paths do not exist downstream.
        if request.vars.get("component").map(String::as_str) != Some(rebuild::REBUILT_COMPONENT) {
            return Ok(CachedResponse::not_found());
        }

        let arch_dir = request.vars.get("arch_dir").cloned().unwrap_or_default();
        let Some(architecture) = arch_dir.strip_prefix("binary-") else {
            return Ok(CachedResponse::not_found());
        };

        let release = self.handler.releases.call(context.query.clone()).await?;
        if !release.architectures.iter().any(|a| a.as_str() == architecture) {
            return Ok(CachedResponse::not_found());
        }

        let admitted = self
            .handler
            .admitted_packages(context, &release, architecture, &repo)
            .await?;

        let body = rebuild::render_packages(&admitted);
        let bytes = self
            .compression
            .compress(&body)
            .await
            .map_err(|e| handler_error(e.into()))?;

        let content_type = match self.compression {
            Compression::None => "text/plain",
            Compression::Gzip => "application/gzip",
            Compression::Xz => "application/x-xz",
        };

        Ok(CachedResponse::ok(content_type, bytes))
    }
}

struct PoolRoute {
    handler: Arc<DebianHandler>,
}

#[async_trait]
impl Function<RouteRequest, CachedResponse> for PoolRoute {
    async fn call(&self, request: RouteRequest) -> verified_cache::Result<CachedResponse> {
        let repo = request.vars.get("repo").cloned().unwrap_or_default();
        let Some(context) = self.handler.repos.get(&repo) else {
            return Ok(CachedResponse::not_found());
        };

        let path = request.vars.get("path").cloned().unwrap_or_default();

        Ok(CachedResponse::redirect(format!(
            "{}/pool/{}",
            context.query.mirror_url.trim_end_matches('/'),
            path
        )))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        axum::{
            body::Body,
            http::{header, Request, StatusCode},
            Router,
        },
        debian_index::{
            control::parse_control_file,
            signing,
        },
        md5::Md5,
        sha2::{Digest, Sha256},
        std::collections::HashMap,
        tower::ServiceExt,
        verified_cache::MemoryStorage,
    };

    struct MapFetcher {
        responses: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl Function<String, Vec<u8>> for MapFetcher {
        async fn call(&self, url: String) -> verified_cache::Result<Vec<u8>> {
            self.responses
                .get(&url)
                .cloned()
                .ok_or_else(|| CacheError::Handler(format!("no response for {}", url).into()))
        }
    }

    struct Fixture {
        router: Router,
        local_public: signing::SignedPublicKey,
    }

    /// A mirror with three packages; the policy admits the two whose
    /// name starts with `keep` and drops the deprecated one of those.
    async fn build_fixture() -> Fixture {
        let (upstream_secret, upstream_public) =
            signing::generate_signing_key("Upstream <upstream@example.com>").unwrap();
        let (local_secret, local_public) =
            signing::generate_signing_key("Local <local@example.com>").unwrap();

        let packages = [
            Package {
                package: "keep-me".to_string(),
                version: "1.0".to_string(),
                architecture: "amd64".to_string(),
                filename: "pool/main/k/keep-me/keep-me_1.0_amd64.deb".to_string(),
                size: 10,
                ..Default::default()
            },
            Package {
                package: "drop-me".to_string(),
                version: "1.0".to_string(),
                architecture: "amd64".to_string(),
                filename: "pool/main/d/drop-me/drop-me_1.0_amd64.deb".to_string(),
                size: 11,
                ..Default::default()
            },
            Package {
                package: "keep-old".to_string(),
                version: "0.1".to_string(),
                architecture: "amd64".to_string(),
                tag: "status::deprecated".to_string(),
                size: 12,
                ..Default::default()
            },
        ];

        let body = rebuild::render_packages(&packages);
        let gz = Compression::Gzip.compress(&body).await.unwrap();
        let sha256 = hex::encode(Sha256::digest(&gz));
        let md5 = hex::encode(Md5::digest(&gz));

        let mut release_text = String::new();
        release_text.push_str("Origin: Test\nSuite: stable\nCodename: tester\n");
        release_text.push_str("Date: Sat, 09 Jul 2022 09:14:46 UTC\n");
        release_text.push_str("Architectures: amd64\nComponents: main\n");
        release_text.push_str("MD5Sum:\n");
        release_text.push_str(&format!(
            " {} {} main/binary-amd64/Packages.gz\n",
            md5,
            gz.len()
        ));
        release_text.push_str("SHA256:\n");
        release_text.push_str(&format!(
            " {} {} main/binary-amd64/Packages.gz\n",
            sha256,
            gz.len()
        ));

        let signed = signing::clearsign(release_text.as_bytes(), &upstream_secret).unwrap();

        let fetcher: debian_index::loader::UrlFn = Arc::new(MapFetcher {
            responses: HashMap::from([
                (
                    "https://mirror.test/debian/dists/tester/InRelease".to_string(),
                    signed.into_bytes(),
                ),
                (
                    "https://mirror.test/debian/dists/tester/main/binary-amd64/Packages.gz"
                        .to_string(),
                    gz,
                ),
            ]),
        });

        let repository = Arc::new(debian_index::loader::RemoteRepository::new(
            fetcher.clone(),
            Arc::new(debian_index::loader::VerifyingFetch::new(fetcher)),
        ));

        let policy = policy::compile_str(
            "fixture",
            "kind: rules\nallow:\n  - Package: { pattern: \"keep.*\" }\ndeny:\n  - Tag: { pattern: \".*deprecated.*\" }\n",
        )
        .unwrap();

        let query = ReleaseQuery {
            mirror_url: "https://mirror.test/debian".to_string(),
            dist: "tester".to_string(),
            architectures: vec!["amd64".to_string()],
            components: vec!["main".to_string()],
            upstream_key: upstream_public.to_armored_string(None).unwrap(),
        };

        let mut handler = DebianHandler::new(repository.clone(), repository);
        handler.add_repository("tester", query, local_secret, Arc::from(policy));

        let mut mux = CachedMux::new(Arc::new(MemoryStorage::new()));
        handler.register(&mut mux);

        Fixture {
            router: mux.into_router(),
            local_public,
        }
    }

    async fn fetch(router: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();

        (status, body)
    }

    #[tokio::test]
    async fn end_to_end_rebuild() {
        let fixture = build_fixture().await;

        // The served InRelease verifies under the local key, not the
        // upstream one.
        let (status, body) = fetch(&fixture.router, "/debian/dists/tester/InRelease").await;
        assert_eq!(status, StatusCode::OK);

        let payload = signing::verify_clearsigned(&body, &fixture.local_public).unwrap();

        let paragraphs = parse_control_file(&mut payload.as_slice()).unwrap();
        assert_eq!(paragraphs.len(), 1);
        let release = Release::from_paragraph(&paragraphs[0]).unwrap();
        assert_eq!(release.codename, "tester");

        // The sibling Packages route serves exactly the admitted list.
        let (status, plain) = fetch(
            &fixture.router,
            "/debian/dists/tester/main/binary-amd64/Packages",
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let served = parse_control_file(&mut plain.as_slice()).unwrap();
        let names: Vec<&str> = served.iter().map(|p| p.get("Package").unwrap()).collect();
        assert_eq!(names, vec!["keep-me"]);

        // Pool paths were rewritten through the proxy.
        assert_eq!(
            served[0].get("Filename"),
            Some("dists/tester/pool/main/k/keep-me/keep-me_1.0_amd64.deb")
        );

        // The digest table matches the served bytes, for both variants.
        let plain_entry = &release.digests["main/binary-amd64/Packages"];
        assert_eq!(plain_entry.size, plain.len() as u64);
        assert_eq!(plain_entry.sha256, hex::encode(Sha256::digest(&plain)));

        let (_, gz) = fetch(
            &fixture.router,
            "/debian/dists/tester/main/binary-amd64/Packages.gz",
        )
        .await;
        let gz_entry = &release.digests["main/binary-amd64/Packages.gz"];
        assert_eq!(gz_entry.size, gz.len() as u64);
        assert_eq!(gz_entry.sha256, hex::encode(Sha256::digest(&gz)));
        assert_eq!(gz_entry.md5.as_deref(), Some(hex::encode(Md5::digest(&gz)).as_str()));
    }

    #[tokio::test]
    async fn xz_route_decompresses_to_plain() {
        let fixture = build_fixture().await;

        let (_, plain) = fetch(
            &fixture.router,
            "/debian/dists/tester/main/binary-amd64/Packages",
        )
        .await;
        let (status, xz) = fetch(
            &fixture.router,
            "/debian/dists/tester/main/binary-amd64/Packages.xz",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(Compression::Xz.decompress(&xz).await.unwrap(), plain);
    }

    #[tokio::test]
    async fn unknown_repo_is_404() {
        let fixture = build_fixture().await;

        let (status, body) = fetch(&fixture.router, "/debian/dists/nope/InRelease").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn unknown_component_and_architecture_are_404() {
        let fixture = build_fixture().await;

        let (status, _) = fetch(
            &fixture.router,
            "/debian/dists/tester/contrib/binary-amd64/Packages",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = fetch(
            &fixture.router,
            "/debian/dists/tester/main/binary-riscv64/Packages",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = fetch(
            &fixture.router,
            "/debian/dists/tester/main/source/Packages",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn pool_redirects_to_mirror() {
        let fixture = build_fixture().await;

        let response = fixture
            .router
            .clone()
            .oneshot(
                Request::get("/debian/dists/tester/pool/main/k/keep-me/keep-me_1.0_amd64.deb")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://mirror.test/debian/pool/main/k/keep-me/keep-me_1.0_amd64.deb"
        );
    }
}
