// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Typed `Release` records.

A `Release` (or clearsigned `InRelease`) paragraph enumerates the
index files of one distribution together with their sizes and
digests. [Release] is the typed projection of that paragraph; its
digest table is the authority for every subsequent fetch.
*/

use {
    crate::{
        control::{parse_control_file, Paragraph},
        error::{DebianError, Result},
        signing,
    },
    chrono::{DateTime, TimeZone, Utc},
    mailparse::dateparse,
    pgp::SignedPublicKey,
    regex::Regex,
    serde::{Deserialize, Serialize},
    std::{collections::BTreeMap, sync::OnceLock},
};

/// Format for the `Date` field.
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S UTC";

fn sha256_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9a-f]{64})\s+([0-9]+)\s+(\S+)$").expect("static regex"))
}

fn md5_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9a-f]{32})\s+([0-9]+)\s+(\S+)$").expect("static regex"))
}

/// Size and digests of one file listed by a release.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DigestEntry {
    /// Repository path to fetch.
    ///
    /// The `by-hash` form when the release advertises
    /// `Acquire-By-Hash`, making the path content-addressed.
    pub path: String,

    /// Expected size in bytes.
    pub size: u64,

    /// Expected SHA-256 as lowercase hex.
    pub sha256: String,

    /// Expected MD5 as lowercase hex, when listed.
    pub md5: Option<String>,
}

/// Typed view of a release paragraph.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Release {
    pub origin: String,
    pub label: String,
    pub suite: String,
    pub version: String,
    pub codename: String,
    pub changelogs: String,
    pub description: String,

    /// Creation time, normalized to UTC.
    pub date: DateTime<Utc>,

    pub architectures: Vec<String>,
    pub components: Vec<String>,

    pub acquire_by_hash: bool,
    pub no_support_for_architecture_all: bool,

    /// Indexed files keyed by their listed (non-`by-hash`) path.
    pub digests: BTreeMap<String, DigestEntry>,
}

impl Default for Release {
    fn default() -> Self {
        Self {
            origin: String::new(),
            label: String::new(),
            suite: String::new(),
            version: String::new(),
            codename: String::new(),
            changelogs: String::new(),
            description: String::new(),
            date: DateTime::UNIX_EPOCH,
            architectures: Vec::new(),
            components: Vec::new(),
            acquire_by_hash: false,
            no_support_for_architecture_all: false,
            digests: BTreeMap::new(),
        }
    }
}

/// Path of the gzip `Packages` index for one component and architecture.
pub fn packages_index_path(component: &str, architecture: &str) -> String {
    format!("{}/binary-{}/Packages.gz", component, architecture)
}

fn by_hash_path(path: &str, sha256: &str) -> String {
    if let Some((parent, _)) = path.rsplit_once('/') {
        format!("{}/by-hash/SHA256/{}", parent, sha256)
    } else {
        format!("by-hash/SHA256/{}", sha256)
    }
}

impl Release {
    /// Construct an instance from a control paragraph.
    ///
    /// The field set is closed; an unrecognized field is an error so
    /// that nothing silently influences what the proxy republishes.
    pub fn from_paragraph(paragraph: &Paragraph) -> Result<Self> {
        let mut release = Self::default();
        let mut date = None;

        for (name, value) in paragraph.iter() {
            match name.as_str() {
                "Origin" => release.origin = value.clone(),
                "Label" => release.label = value.clone(),
                "Suite" => release.suite = value.clone(),
                "Version" => release.version = value.clone(),
                "Codename" => release.codename = value.clone(),
                "Changelogs" => release.changelogs = value.clone(),
                "Description" => release.description = value.clone(),
                "Date" => {
                    let seconds = dateparse(value)
                        .map_err(|_| DebianError::BadDate(value.clone()))?;
                    date = Some(
                        Utc.timestamp_opt(seconds, 0)
                            .single()
                            .ok_or_else(|| DebianError::BadDate(value.clone()))?,
                    );
                }
                "Architectures" => {
                    release.architectures =
                        value.split_whitespace().map(String::from).collect()
                }
                "Components" => {
                    release.components = value.split_whitespace().map(String::from).collect()
                }
                "Acquire-By-Hash" => release.acquire_by_hash = value == "yes",
                "No-Support-for-Architecture-all" => {
                    release.no_support_for_architecture_all = value == "yes"
                }
                "MD5Sum" | "SHA256" => {}
                other => return Err(DebianError::UnknownField(other.to_string())),
            }
        }

        release.date = date.ok_or(DebianError::MissingField("Date"))?;
        release.digests = parse_digests(paragraph, release.acquire_by_hash)?;

        Ok(release)
    }

    /// Verify a clearsigned `InRelease` document and parse it.
    pub fn from_clearsigned(data: &[u8], key: &SignedPublicKey) -> Result<Self> {
        let payload = signing::verify_clearsigned(data, key)?;

        let paragraphs = parse_control_file(&mut payload.as_slice())?;
        if paragraphs.len() != 1 {
            return Err(DebianError::ParagraphCount(paragraphs.len()));
        }

        Self::from_paragraph(&paragraphs[0])
    }

    /// Convert back to a control paragraph, digest table excluded.
    ///
    /// The rebuild path attaches a freshly computed digest table
    /// before emission.
    pub fn to_paragraph(&self) -> Paragraph {
        let mut paragraph = Paragraph::default();

        let strings = [
            ("Origin", &self.origin),
            ("Label", &self.label),
            ("Suite", &self.suite),
            ("Version", &self.version),
            ("Codename", &self.codename),
            ("Changelogs", &self.changelogs),
            ("Description", &self.description),
        ];
        for (name, value) in strings {
            if !value.is_empty() {
                paragraph.set(name, value);
            }
        }

        paragraph.set("Date", self.date.format(DATE_FORMAT));

        if !self.architectures.is_empty() {
            paragraph.set("Architectures", self.architectures.join(" "));
        }
        if !self.components.is_empty() {
            paragraph.set("Components", self.components.join(" "));
        }

        if self.acquire_by_hash {
            paragraph.set("Acquire-By-Hash", "yes");
        }
        if self.no_support_for_architecture_all {
            paragraph.set("No-Support-for-Architecture-all", "yes");
        }

        paragraph
    }
}

fn parse_digests(
    paragraph: &Paragraph,
    acquire_by_hash: bool,
) -> Result<BTreeMap<String, DigestEntry>> {
    let mut digests = BTreeMap::new();

    if let Some(sha256) = paragraph.get("SHA256") {
        for line in sha256.lines().filter(|l| !l.trim().is_empty()) {
            let captures = sha256_line_re()
                .captures(line.trim())
                .ok_or_else(|| DebianError::DigestLine(line.to_string()))?;

            let sha256 = captures[1].to_string();
            let size: u64 = captures[2].parse()?;
            let path = captures[3].to_string();

            let fetch_path = if acquire_by_hash {
                by_hash_path(&path, &sha256)
            } else {
                path.clone()
            };

            digests.insert(
                path,
                DigestEntry {
                    path: fetch_path,
                    size,
                    sha256,
                    md5: None,
                },
            );
        }
    }

    if let Some(md5sum) = paragraph.get("MD5Sum") {
        for line in md5sum.lines().filter(|l| !l.trim().is_empty()) {
            let captures = md5_line_re()
                .captures(line.trim())
                .ok_or_else(|| DebianError::DigestLine(line.to_string()))?;

            // Paths listed only under MD5Sum have no integrity story
            // worth keeping.
            if let Some(entry) = digests.get_mut(&captures[3]) {
                entry.md5 = Some(captures[1].to_string());
            }
        }
    }

    Ok(digests)
}
