// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian repository index pipeline.

This crate implements the repository-facing half of the proxy: reading
a trusted upstream Debian mirror, deciding which packages to admit, and
producing a re-signed index describing exactly what will be served.

See <https://wiki.debian.org/DebianRepository/Format> for the canonical
definition of the formats involved.

# A Tour of Functionality

Control files are the common primitive. The [control] module parses
them into [control::Paragraph] values via a streaming
[control::ControlParser] and writes them back with the canonical field
ordering the rest of the pipeline relies on.

[package::Package] is the typed view of one binary package paragraph,
restricted to a closed field set so that policy decisions cannot be
bypassed by unrecognized upstream extensions. [release::Release] is the
typed view of an `InRelease` paragraph plus its digest table.

The [signing] module loads armored OpenPGP keys, verifies the cleartext
signature framework wrapped around `InRelease` files, and produces the
local cleartext signature for rebuilt indexes.

[loader::RemoteRepository] fetches and verifies upstream content
through the caching functions of the `verified-cache` crate: the
release is checked against the pinned upstream key, each `Packages`
index against the size and SHA-256 recorded in the release.

[policy] evaluates declarative admission policies against packages, and
[rebuild] reassembles a release whose digest table matches the admitted
package lists byte for byte before clearsigning it with the local key.
*/

pub mod compression;
pub mod control;
pub mod error;
pub mod loader;
pub mod package;
pub mod policy;
pub mod rebuild;
pub mod release;
pub mod signing;

pub use crate::{
    error::{DebianError, Result},
    package::Package,
    release::Release,
};
