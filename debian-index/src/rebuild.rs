// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Release reassembly and re-signing.

After the admission policy has pruned the package lists, the upstream
digest table no longer describes what this server serves. This module
recomputes a digest table from the admitted lists, rewrites the
release paragraph around it, and clearsigns the result with the local
key. The emitted bytes are deterministic for identical inputs, which
is what lets the `InRelease` digests match the sibling `Packages`
responses byte for byte.
*/

use {
    crate::{
        compression::Compression,
        control::{write_control_file, write_paragraph},
        error::Result,
        package::Package,
        release::Release,
        signing,
    },
    md5::Md5,
    pgp::SignedSecretKey,
    sha2::{Digest, Sha256},
    std::collections::BTreeMap,
};

/// The single component the rebuilt release publishes.
///
/// Admitted packages from every mirrored upstream component are merged
/// into one pool, so the synthetic index always advertises `main`.
pub const REBUILT_COMPONENT: &str = "main";

/// Compressions the digest table covers.
///
/// XZ is supported on the wire but not digested: computing it for
/// every rebuild costs far more than the transfer savings are worth.
const DIGESTED_COMPRESSIONS: &[Compression] = &[Compression::None, Compression::Gzip];

/// Size and digests of one rendered `Packages` file variant.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackagesDigest {
    pub path: String,
    pub size: u64,
    pub sha256: String,
    pub md5: String,
}

/// Serialize packages into canonical control file bytes.
pub fn render_packages(packages: &[Package]) -> Vec<u8> {
    let paragraphs: Vec<_> = packages.iter().map(|p| p.to_paragraph()).collect();

    let mut out = Vec::new();
    write_control_file(&mut out, &paragraphs).expect("in-memory write");

    out
}

/// Digest the rendered `Packages` file for one architecture.
pub async fn packages_digests(
    architecture: &str,
    packages: &[Package],
) -> Result<Vec<PackagesDigest>> {
    let body = render_packages(packages);

    let mut digests = Vec::with_capacity(DIGESTED_COMPRESSIONS.len());
    for compression in DIGESTED_COMPRESSIONS {
        let bytes = compression.compress(&body).await?;

        digests.push(PackagesDigest {
            path: format!(
                "{}/binary-{}/Packages{}",
                REBUILT_COMPONENT,
                architecture,
                compression.extension()
            ),
            size: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(&bytes)),
            md5: hex::encode(Md5::digest(&bytes)),
        });
    }

    Ok(digests)
}

/// Render the rebuilt release paragraph with a fresh digest table.
pub async fn render_release(
    release: &Release,
    packages: &BTreeMap<String, Vec<Package>>,
) -> Result<Vec<u8>> {
    let mut paragraph = release.to_paragraph();

    // The synthetic index is only served under canonical paths.
    paragraph.remove("Acquire-By-Hash");

    let mut digests = Vec::new();
    for (architecture, admitted) in packages {
        digests.extend(packages_digests(architecture, admitted).await?);
    }
    digests.sort_by(|a, b| a.path.cmp(&b.path));

    let sha256_lines: Vec<String> = digests
        .iter()
        .map(|d| format!("{} {} {}", d.sha256, d.size, d.path))
        .collect();
    let md5_lines: Vec<String> = digests
        .iter()
        .map(|d| format!("{} {} {}", d.md5, d.size, d.path))
        .collect();

    paragraph.set("SHA256", sha256_lines.join("\n"));
    paragraph.set("MD5Sum", md5_lines.join("\n"));

    let mut out = Vec::new();
    write_paragraph(&mut out, &paragraph).expect("in-memory write");

    Ok(out)
}

/// Render and clearsign the rebuilt release.
pub async fn build_signed_release(
    release: &Release,
    packages: &BTreeMap<String, Vec<Package>>,
    signing_key: &SignedSecretKey,
) -> Result<String> {
    let body = render_release(release, packages).await?;

    signing::clearsign(&body, signing_key)
}
