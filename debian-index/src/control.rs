// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian control file parsing and emission.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html>
for the canonical source of truth for how control files work.

A control file is a series of *paragraphs* separated by blank lines;
each paragraph is a series of `Name: value` fields where indented
lines continue the previous field. Most continuations fold into a
single logical line; the digest table fields (`MD5Sum`, `SHA256`)
keep their newlines.
*/

use {
    crate::error::{DebianError, Result},
    std::{
        collections::{btree_map, BTreeMap},
        io::{BufRead, Write},
    },
};

/// Fields whose continuation lines are newline-joined instead of folded.
const MULTILINE_FIELDS: &[&str] = &["MD5Sum", "SHA256"];

fn is_multiline(name: &str) -> bool {
    MULTILINE_FIELDS.contains(&name)
}

/// A paragraph in a control file: an association of field names to values.
///
/// Values of multiline fields hold their newline-separated lines without
/// the leading indentation of the file form.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Paragraph {
    fields: BTreeMap<String, String>,
}

impl Paragraph {
    /// Whether the paragraph has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Obtain the value of the named field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|v| v.as_str())
    }

    /// Whether the named field is present.
    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Set a field, replacing any previous value.
    pub fn set(&mut self, name: impl ToString, value: impl ToString) {
        self.fields.insert(name.to_string(), value.to_string());
    }

    /// Remove a field, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    /// Iterate over fields in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.fields.iter()
    }

    fn append_folded(&mut self, name: &str, line: &str) {
        let value = self.fields.entry(name.to_string()).or_default();
        value.push_str(line);
    }

    fn append_line(&mut self, name: &str, line: &str) {
        let value = self.fields.entry(name.to_string()).or_default();
        if !value.is_empty() {
            value.push('\n');
        }
        value.push_str(line.trim());
    }
}

/// Streaming control file parser.
///
/// Instances are fed lines of text and periodically emit completed
/// [Paragraph] values. Lines may be arbitrarily long; buffered line
/// reading grows as needed for the large `Description` and digest
/// fields found in real `Packages` data.
#[derive(Clone, Debug, Default)]
pub struct ControlParser {
    paragraph: Paragraph,
    current_field: Option<String>,
}

impl ControlParser {
    /// Feed one line to the parser.
    ///
    /// Returns a paragraph when `line` completes one, `Ok(None)` otherwise.
    pub fn write_line(&mut self, line: &str) -> Result<Option<Paragraph>> {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.trim().is_empty() {
            self.current_field = None;

            if self.paragraph.is_empty() {
                return Ok(None);
            }

            return Ok(Some(std::mem::take(&mut self.paragraph)));
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            let name = self.current_field.clone().ok_or_else(|| {
                DebianError::ControlParse(format!(
                    "continuation line without a preceding field: {:?}",
                    line
                ))
            })?;

            if is_multiline(&name) {
                self.paragraph.append_line(&name, line);
            } else {
                // The leading whitespace of the continuation acts as the
                // separator of the folded value.
                self.paragraph.append_folded(&name, line);
            }

            return Ok(None);
        }

        let (name, value) = line.split_once(':').ok_or_else(|| {
            DebianError::ControlParse(format!("line is not a field definition: {:?}", line))
        })?;

        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(DebianError::ControlParse(format!(
                "malformed field name: {:?}",
                name
            )));
        }

        self.current_field = Some(name.to_string());
        self.paragraph.set(name, value.trim());

        Ok(None)
    }

    /// Finish parsing, returning the trailing paragraph if non-empty.
    pub fn finish(self) -> Option<Paragraph> {
        if self.paragraph.is_empty() {
            None
        } else {
            Some(self.paragraph)
        }
    }
}

/// Parse a full control file from a reader.
pub fn parse_control_file<R: BufRead>(reader: &mut R) -> Result<Vec<Paragraph>> {
    let mut paragraphs = Vec::new();
    let mut parser = ControlParser::default();

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }

        if let Some(paragraph) = parser.write_line(&line)? {
            paragraphs.push(paragraph);
        }
    }

    if let Some(paragraph) = parser.finish() {
        paragraphs.push(paragraph);
    }

    Ok(paragraphs)
}

/// Parse a control file from a string.
pub fn parse_str(s: &str) -> Result<Vec<Paragraph>> {
    parse_control_file(&mut s.as_bytes())
}

/// Emission order: `Package` leads, the digest table fields trail
/// (`MD5Sum` before `SHA256`), everything else is alphabetical.
fn field_rank(name: &str) -> u8 {
    if name == "Package" {
        0
    } else if name == "MD5Sum" {
        2
    } else if name.eq_ignore_ascii_case("SHA256") {
        3
    } else {
        1
    }
}

/// Serialize one paragraph.
///
/// Empty-valued fields are dropped. Multiline fields render as a bare
/// `Name:` followed by one space-indented line per value line.
pub fn write_paragraph<W: Write>(writer: &mut W, paragraph: &Paragraph) -> std::io::Result<()> {
    let mut names: Vec<&str> = paragraph.iter().map(|(name, _)| name.as_str()).collect();
    names.sort_by(|a, b| field_rank(a).cmp(&field_rank(b)).then_with(|| a.cmp(b)));

    for name in names {
        let value = paragraph.get(name).expect("name came from this paragraph");
        if value.is_empty() {
            continue;
        }

        if is_multiline(name) {
            writeln!(writer, "{}:", name)?;
            for line in value.lines() {
                writeln!(writer, " {}", line)?;
            }
        } else {
            writeln!(writer, "{}: {}", name, value)?;
        }
    }

    Ok(())
}

/// Serialize paragraphs separated by blank lines.
pub fn write_control_file<'a, W, I>(writer: &mut W, paragraphs: I) -> std::io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a Paragraph>,
{
    for (i, paragraph) in paragraphs.into_iter().enumerate() {
        if i > 0 {
            writeln!(writer)?;
        }

        write_paragraph(writer, paragraph)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Package: alpha
Version: 1.0-1
Description: first line
 folded onto the first

Package: beta
SHA256:
 aa 1 one
 bb 2 two
Version: 2.0
";

    #[test]
    fn parses_paragraphs_and_fields() -> Result<()> {
        let paragraphs = parse_str(SAMPLE)?;
        assert_eq!(paragraphs.len(), 2);

        let alpha = &paragraphs[0];
        assert_eq!(alpha.get("Package"), Some("alpha"));
        assert_eq!(alpha.get("Version"), Some("1.0-1"));
        assert_eq!(
            alpha.get("Description"),
            Some("first line folded onto the first")
        );

        let beta = &paragraphs[1];
        assert_eq!(beta.get("SHA256"), Some("aa 1 one\nbb 2 two"));
        assert_eq!(beta.get("Version"), Some("2.0"));

        Ok(())
    }

    #[test]
    fn trailing_paragraph_without_blank_line() -> Result<()> {
        let paragraphs = parse_str("Package: solo\nVersion: 1")?;
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(paragraphs[0].get("Package"), Some("solo"));

        Ok(())
    }

    #[test]
    fn continuation_without_field_is_an_error() {
        assert!(matches!(
            parse_str(" dangling continuation\n"),
            Err(DebianError::ControlParse(_))
        ));
    }

    #[test]
    fn line_without_colon_is_an_error() {
        assert!(matches!(
            parse_str("Package alpha\n"),
            Err(DebianError::ControlParse(_))
        ));
    }

    #[test]
    fn field_name_with_space_is_an_error() {
        assert!(matches!(
            parse_str("Bad Name: value\n"),
            Err(DebianError::ControlParse(_))
        ));
    }

    #[test]
    fn long_lines_are_accepted() -> Result<()> {
        let long = "x".repeat(600 * 1024);
        let paragraphs = parse_str(&format!("Description: {}\n", long))?;
        assert_eq!(paragraphs[0].get("Description"), Some(long.as_str()));

        Ok(())
    }

    #[test]
    fn emission_orders_fields() -> std::io::Result<()> {
        let mut paragraph = Paragraph::default();
        paragraph.set("Version", "1");
        paragraph.set("SHA256", "aa 1 one");
        paragraph.set("Architecture", "amd64");
        paragraph.set("MD5Sum", "bb 1 one");
        paragraph.set("Package", "alpha");

        let mut out = Vec::new();
        write_paragraph(&mut out, &paragraph)?;

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Package: alpha\nArchitecture: amd64\nVersion: 1\nMD5Sum:\n bb 1 one\nSHA256:\n aa 1 one\n"
        );

        Ok(())
    }

    #[test]
    fn roundtrip() -> Result<()> {
        let original = parse_str(SAMPLE)?;

        let mut emitted = Vec::new();
        write_control_file(&mut emitted, &original).unwrap();

        let reparsed = parse_control_file(&mut emitted.as_slice())?;
        assert_eq!(reparsed, original);

        Ok(())
    }
}
