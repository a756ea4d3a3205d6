// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Caching, policy-filtering reverse proxy for APT repositories.

For each configured downstream repository the server mirrors a trusted
upstream mirror, re-signs the top-level index under a locally held
key, applies a package admission policy, and serves the standard APT
wire format.
*/

mod config;
mod debian;
mod mux;

use {
    anyhow::{Context, Result},
    clap::Parser,
    debian_index::{
        loader::{IndexFn, ReleaseQuery, RemoteRepository, UrlFn, VerifyingFetch},
        policy::{self, AdmitAll, AnyOf, PackagePolicy},
        signing,
    },
    std::{sync::Arc, time::Duration},
    tokio::signal,
    tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter},
    verified_cache::{
        compress::{GzipStorage, ZstdStorage},
        fetch::UrlFetcher,
        prefix::PrefixStorage,
        redis::RedisStorage,
        signed::SignedStorage,
        ByteStorage, JsonCodec, Memoized, MemoryStorage, RawCodec,
    },
};

#[derive(Parser, Debug)]
#[command(name = "apt-gate", about = "Caching, policy-filtering APT reverse proxy")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/apt-gate/config.yaml")]
    config: String,
}

/// Assemble the storage stack: backend, then the optional HMAC
/// envelope, then the optional compression layer. Key prefixes are
/// applied per consumer.
async fn build_storage(storage: &config::StorageConfig) -> Result<Arc<dyn ByteStorage>> {
    let mut stack: Arc<dyn ByteStorage> = match &storage.backend {
        config::StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        config::StorageBackend::Redis { url } => Arc::new(
            RedisStorage::connect(url)
                .await
                .context("failed to connect to Redis")?,
        ),
    };

    if let Some(signing) = &storage.signing {
        let keys = signing
            .keys
            .iter()
            .map(|(id, secret)| (id.clone(), secret.as_bytes().to_vec()))
            .collect();

        stack = Arc::new(SignedStorage::new(keys, &signing.active, stack)?);
    }

    stack = match storage.compression {
        config::StorageCompression::None => stack,
        config::StorageCompression::Gzip => Arc::new(GzipStorage::new(stack)),
        config::StorageCompression::Zstd => Arc::new(ZstdStorage::new(stack)),
    };

    Ok(stack)
}

fn build_handler(
    config: &config::Config,
    storage: Arc<dyn ByteStorage>,
    client: reqwest::Client,
) -> Result<debian::DebianHandler> {
    // Raw upstream bytes, keyed by URL. Zero TTL defers to the
    // request scope, so content-addressed fetches live longer.
    let urls: UrlFn = Arc::new(Memoized::new(
        PrefixStorage::new("debian_urls", storage.clone()),
        UrlFetcher::new(client.clone()),
        RawCodec,
        Duration::ZERO,
    ));

    // Digest-verified index bytes. Verification runs inside the inner
    // function, so nothing unverified is ever stored.
    let indices: IndexFn = Arc::new(Memoized::new(
        PrefixStorage::new("debian_indices", storage.clone()),
        VerifyingFetch::new(Arc::new(UrlFetcher::new(client))),
        RawCodec,
        Duration::ZERO,
    ));

    let repository = Arc::new(RemoteRepository::new(urls, indices));
    let release_source: debian::ReleaseFn = repository.clone();
    let packages_source: debian::PackagesFn = repository;

    let releases: debian::ReleaseFn = Arc::new(Memoized::new(
        PrefixStorage::new("debian_releases", storage.clone()),
        release_source,
        JsonCodec,
        Duration::ZERO,
    ));

    let packages: debian::PackagesFn = Arc::new(Memoized::new(
        PrefixStorage::new("debian_packages", storage),
        packages_source,
        JsonCodec,
        Duration::ZERO,
    ));

    let mut handler = debian::DebianHandler::new(releases, packages);

    for (name, repository_config) in &config.repositories {
        let signing_key = signing::read_armored_secret_key(&repository_config.signing_key_path)
            .with_context(|| format!("reading signing key for {name}"))?;

        let admission: Arc<dyn PackagePolicy> = if repository_config.policies.is_empty() {
            Arc::new(AdmitAll)
        } else {
            let policy_dir = config
                .policy_dir
                .as_ref()
                .expect("validated at config load");

            let mut members = Vec::with_capacity(repository_config.policies.len());
            for file in &repository_config.policies {
                members.push(
                    policy::load_policy_file(&policy_dir.join(file))
                        .with_context(|| format!("loading policy {file} for {name}"))?,
                );
            }

            Arc::new(AnyOf::new(members))
        };

        handler.add_repository(
            name,
            ReleaseQuery {
                mirror_url: repository_config.mirror_url.clone(),
                dist: repository_config.release.clone(),
                architectures: repository_config.architectures.clone(),
                components: repository_config.components.clone(),
                upstream_key: repository_config.upstream_key.clone(),
            },
            signing_key,
            admission,
        );

        tracing::info!(
            repository = %name,
            dist = %repository_config.release,
            mirror = %repository_config.mirror_url,
            policies = repository_config.policies.len(),
            "repository configured"
        );
    }

    Ok(handler)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = config::load_config(&cli.config)?;
    tracing::info!(config_path = %cli.config, "starting apt-gate");

    let storage = build_storage(&config.storage).await?;

    let client = reqwest::Client::builder()
        .user_agent("apt-gate/0.1")
        .build()
        .context("failed to build HTTP client")?;

    let handler = build_handler(&config, storage.clone(), client)?;

    let mut mux = mux::CachedMux::new(storage);
    handler.register(&mut mux);
    let router = mux.into_router();

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", config.listen))?;

    tracing::info!(listen = %config.listen, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("apt-gate shut down cleanly");

    Ok(())
}
