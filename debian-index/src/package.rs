// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Typed binary package records.

A [Package] is the structured view of one `Packages` paragraph. The
field set is closed: fields that neither the struct nor the ignore
list recognizes fail the parse, so a policy written against the known
fields cannot be sidestepped by novel upstream metadata.
*/

use {
    crate::{
        control::Paragraph,
        error::{DebianError, Result},
    },
    serde::{Deserialize, Serialize},
};

/// Upstream fields dropped during parsing.
///
/// These carry distribution tooling metadata with no bearing on
/// admission decisions or the serving pipeline.
const IGNORED_FIELDS: &[&str] = &[
    "Build-Ids",
    "Built-Using",
    "Build-Essential",
    "Description-md5",
    "Efi-Vendor",
    "Ghc-Package",
    "Go-Import-Path",
    "Postgresql-Catversion",
    "Python-Egg-Name",
    "X-Cargo-Built-Using",
];

const IGNORED_PREFIXES: &[&str] = &["Cnf-", "Gstreamer-"];

fn is_ignored(name: &str) -> bool {
    IGNORED_FIELDS.contains(&name) || IGNORED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// A binary package described by a `Packages` index.
///
/// Serde field names match the control file spellings, so the JSON
/// form seen by policies reads like the paragraph it came from.
/// Relationship fields keep their raw comma-separated syntax.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Package {
    pub package: String,
    pub source: String,
    pub version: String,
    pub architecture: String,
    pub maintainer: String,
    #[serde(rename = "Installed-Size")]
    pub installed_size: u64,
    pub depends: String,
    #[serde(rename = "Pre-Depends")]
    pub pre_depends: String,
    pub recommends: String,
    pub suggests: String,
    pub enhances: String,
    pub breaks: String,
    pub conflicts: String,
    pub replaces: String,
    pub provides: String,
    pub section: String,
    pub priority: String,
    pub essential: bool,
    pub important: bool,
    pub protected: bool,
    #[serde(rename = "Multi-Arch")]
    pub multi_arch: String,
    pub homepage: String,
    pub description: String,
    pub tag: String,
    pub filename: String,
    pub size: u64,
    #[serde(rename = "MD5sum")]
    pub md5sum: String,
    #[serde(rename = "SHA256")]
    pub sha256: String,
    #[serde(rename = "Lua-Versions")]
    pub lua_versions: String,
    #[serde(rename = "Python-Version")]
    pub python_version: String,
    #[serde(rename = "Ruby-Versions")]
    pub ruby_versions: String,
}

impl Package {
    /// Construct an instance from a control paragraph.
    pub fn from_paragraph(paragraph: &Paragraph) -> Result<Self> {
        let mut package = Self::default();

        for (name, value) in paragraph.iter() {
            match name.as_str() {
                "Package" => package.package = value.clone(),
                "Source" => package.source = value.clone(),
                "Version" => package.version = value.clone(),
                "Architecture" => package.architecture = value.clone(),
                "Maintainer" => package.maintainer = value.clone(),
                "Installed-Size" => package.installed_size = value.parse()?,
                "Depends" => package.depends = value.clone(),
                "Pre-Depends" => package.pre_depends = value.clone(),
                "Recommends" => package.recommends = value.clone(),
                "Suggests" => package.suggests = value.clone(),
                "Enhances" => package.enhances = value.clone(),
                "Breaks" => package.breaks = value.clone(),
                "Conflicts" => package.conflicts = value.clone(),
                "Replaces" => package.replaces = value.clone(),
                "Provides" => package.provides = value.clone(),
                "Section" => package.section = value.clone(),
                "Priority" => package.priority = value.clone(),
                "Essential" => package.essential = value == "yes",
                "Important" => package.important = value == "yes",
                "Protected" => package.protected = value == "yes",
                "Multi-Arch" => package.multi_arch = value.clone(),
                "Homepage" => package.homepage = value.clone(),
                "Description" => package.description = value.clone(),
                "Tag" => package.tag = value.clone(),
                "Filename" => package.filename = value.clone(),
                "Size" => package.size = value.parse()?,
                "MD5sum" => {
                    hex::decode(value)?;
                    package.md5sum = value.clone();
                }
                "SHA256" => {
                    hex::decode(value)?;
                    package.sha256 = value.clone();
                }
                "Lua-Versions" => package.lua_versions = value.clone(),
                "Python-Version" => package.python_version = value.clone(),
                "Ruby-Versions" => package.ruby_versions = value.clone(),
                other if is_ignored(other) => {}
                other => return Err(DebianError::UnknownField(other.to_string())),
            }
        }

        Ok(package)
    }

    /// Convert back to a control paragraph.
    ///
    /// Default-valued fields (empty strings, zero sizes, false flags)
    /// are omitted, mirroring how the paragraph parsed.
    pub fn to_paragraph(&self) -> Paragraph {
        let mut paragraph = Paragraph::default();

        let strings = [
            ("Package", &self.package),
            ("Source", &self.source),
            ("Version", &self.version),
            ("Architecture", &self.architecture),
            ("Maintainer", &self.maintainer),
            ("Depends", &self.depends),
            ("Pre-Depends", &self.pre_depends),
            ("Recommends", &self.recommends),
            ("Suggests", &self.suggests),
            ("Enhances", &self.enhances),
            ("Breaks", &self.breaks),
            ("Conflicts", &self.conflicts),
            ("Replaces", &self.replaces),
            ("Provides", &self.provides),
            ("Section", &self.section),
            ("Priority", &self.priority),
            ("Multi-Arch", &self.multi_arch),
            ("Homepage", &self.homepage),
            ("Description", &self.description),
            ("Tag", &self.tag),
            ("Filename", &self.filename),
            ("MD5sum", &self.md5sum),
            ("SHA256", &self.sha256),
            ("Lua-Versions", &self.lua_versions),
            ("Python-Version", &self.python_version),
            ("Ruby-Versions", &self.ruby_versions),
        ];
        for (name, value) in strings {
            if !value.is_empty() {
                paragraph.set(name, value);
            }
        }

        if self.installed_size != 0 {
            paragraph.set("Installed-Size", self.installed_size);
        }
        if self.size != 0 {
            paragraph.set("Size", self.size);
        }
        for (name, flag) in [
            ("Essential", self.essential),
            ("Important", self.important),
            ("Protected", self.protected),
        ] {
            if flag {
                paragraph.set(name, "yes");
            }
        }

        paragraph
    }

    /// Entries of the `Tag` field.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tag.split(", ").filter(|t| !t.is_empty())
    }

    /// Entries of the `Depends` field.
    pub fn depends(&self) -> impl Iterator<Item = &str> {
        self.depends.split(", ").filter(|d| !d.is_empty())
    }
}
