// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Server configuration. */

use {
    anyhow::{Context, Result},
    serde::Deserialize,
    std::{collections::HashMap, path::Path, path::PathBuf},
};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Socket address for the HTTP listener.
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Directory holding policy documents referenced by repositories.
    #[serde(default)]
    pub policy_dir: Option<PathBuf>,

    /// Downstream repositories by name. The name is the `dists/<name>`
    /// path segment clients use.
    pub repositories: HashMap<String, RepositoryConfig>,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Compression applied to stored values.
    #[serde(default)]
    pub compression: StorageCompression,

    /// When set, values are sealed in HMAC envelopes.
    #[serde(default)]
    pub signing: Option<StorageSigning>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Redis {
        url: String,
    },
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StorageCompression {
    None,
    Gzip,
    #[default]
    Zstd,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSigning {
    /// Key id new entries are stamped with.
    pub active: String,

    /// Trusted keys by id. Extra entries keep rotated-out keys readable.
    pub keys: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    /// Upstream mirror base URL.
    #[serde(default = "default_mirror")]
    pub mirror_url: String,

    /// Upstream distribution name under `dists/`.
    pub release: String,

    #[serde(default = "default_architectures")]
    pub architectures: Vec<String>,

    #[serde(default = "default_components")]
    pub components: Vec<String>,

    /// Armored public key the upstream release must verify against.
    pub upstream_key: String,

    /// Path to the armored secret key used to re-sign the index.
    pub signing_key_path: PathBuf,

    /// Policy files under `policy_dir`; a package is admitted when any
    /// of them admits it. Empty means no filtering.
    #[serde(default)]
    pub policies: Vec<String>,
}

fn default_mirror() -> String {
    "https://deb.debian.org/debian".to_string()
}

fn default_architectures() -> Vec<String> {
    vec!["all".to_string(), "amd64".to_string()]
}

fn default_components() -> Vec<String> {
    vec![
        "main".to_string(),
        "contrib".to_string(),
        "non-free".to_string(),
    ]
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.repositories.is_empty(),
        "no repositories configured"
    );

    if let Some(signing) = &config.storage.signing {
        anyhow::ensure!(
            signing.keys.contains_key(&signing.active),
            "storage signing key {} is not in the trusted set",
            signing.active
        );
    }

    for (name, repository) in &config.repositories {
        anyhow::ensure!(
            !repository.release.is_empty(),
            "repository {name} has no release"
        );
        anyhow::ensure!(
            !repository.upstream_key.is_empty(),
            "repository {name} has no upstream key"
        );
        if !repository.policies.is_empty() {
            anyhow::ensure!(
                config.policy_dir.is_some(),
                "repository {name} references policies but no policy_dir is set"
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
listen: 127.0.0.1:9000
storage:
  backend:
    kind: memory
  compression: zstd
repositories:
  bullseye:
    release: bullseye
    upstream_key: |
      -----BEGIN PGP PUBLIC KEY BLOCK-----
      placeholder
      -----END PGP PUBLIC KEY BLOCK-----
    signing_key_path: /etc/apt-gate/keys/bullseye.asc
";

    #[test]
    fn parses_with_defaults() {
        let config: Config = serde_yaml::from_str(SAMPLE).unwrap();
        validate_config(&config).unwrap();

        assert_eq!(config.listen, "127.0.0.1:9000");

        let repo = &config.repositories["bullseye"];
        assert_eq!(repo.mirror_url, "https://deb.debian.org/debian");
        assert_eq!(repo.architectures, vec!["all", "amd64"]);
        assert_eq!(repo.components, vec!["main", "contrib", "non-free"]);
        assert!(repo.policies.is_empty());
    }

    #[test]
    fn empty_repositories_fail_validation() {
        let config: Config = serde_yaml::from_str("repositories: {}\n").unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn policies_require_policy_dir() {
        let sample = SAMPLE.replace(
            "    signing_key_path: /etc/apt-gate/keys/bullseye.asc",
            "    signing_key_path: /etc/apt-gate/keys/bullseye.asc\n    policies: [strict.yaml]",
        );

        let config: Config = serde_yaml::from_str(&sample).unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn signing_active_key_must_be_trusted() {
        let sample = SAMPLE.replace(
            "  compression: zstd",
            "  compression: zstd\n  signing:\n    active: missing\n    keys:\n      other: secret",
        );

        let config: Config = serde_yaml::from_str(&sample).unwrap();
        assert!(validate_config(&config).is_err());
    }
}
