//! Canonical content fingerprints.
//!
//! Sections are written into a fixed byte layout before hashing:
//!
//! ```text
//! "mono/1" | count:u64le | { tag:u8 | len:u64le | utf8 bytes }*
//! ```
//!
//! Only the ordered section list feeds the hash, so timestamps, authorship,
//! ids and JSON field order never change a fingerprint. The digest is
//! xxh3-64: well distributed and fast, which is all an equality oracle needs.

use crate::error::{MonographError, Result};
use crate::types::{Fingerprint, Section};
use serde_json::Value;
use xxhash_rust::xxh3::Xxh3;

const DOMAIN: &[u8] = b"mono/1";
const TAG_STATIC: u8 = 0x01;
const TAG_DYNAMIC: u8 = 0x02;

/// Pure fingerprinting over section lists.
pub struct ContentHasher;

impl ContentHasher {
    /// Fingerprint a typed section list.
    pub fn hash(sections: &[Section]) -> Fingerprint {
        let mut hasher = Xxh3::new();
        hasher.update(DOMAIN);
        hasher.update(&(sections.len() as u64).to_le_bytes());
        for section in sections {
            let (tag, body) = match section {
                Section::Static { text } => (TAG_STATIC, text.as_bytes()),
                Section::Dynamic { expression } => (TAG_DYNAMIC, expression.as_bytes()),
            };
            hasher.update(&[tag]);
            hasher.update(&(body.len() as u64).to_le_bytes());
            hasher.update(body);
        }
        Fingerprint(hasher.digest())
    }

    /// Fingerprint an untyped section list, e.g. straight from an editor payload.
    /// Fails fast on the first malformed section; nothing is partially hashed.
    pub fn hash_json(value: &Value) -> Result<Fingerprint> {
        let sections = parse_sections(value)?;
        Ok(Self::hash(&sections))
    }
}

/// Convert a JSON section array into typed sections.
///
/// Unknown keys on a section (timestamps, editor state) are ignored. An unknown
/// `kind`, a missing body field or a non-string body is `MalformedContent`.
pub fn parse_sections(value: &Value) -> Result<Vec<Section>> {
    let items = value.as_array().ok_or_else(|| {
        MonographError::MalformedContent("sections must be a JSON array".to_string())
    })?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| parse_section(index, item))
        .collect()
}

fn parse_section(index: usize, item: &Value) -> Result<Section> {
    let obj = item.as_object().ok_or_else(|| {
        MonographError::MalformedContent(format!("section {} is not an object", index))
    })?;

    let kind = obj.get("kind").and_then(Value::as_str).ok_or_else(|| {
        MonographError::MalformedContent(format!("section {} has no string 'kind'", index))
    })?;

    let field = match kind {
        "static" => "text",
        "dynamic" => "expression",
        other => {
            return Err(MonographError::MalformedContent(format!(
                "section {} has unknown kind '{}'",
                index, other
            )))
        }
    };

    let body = obj.get(field).and_then(Value::as_str).ok_or_else(|| {
        MonographError::MalformedContent(format!(
            "section {} ({}) is missing string field '{}'",
            index, kind, field
        ))
    })?;

    Ok(match kind {
        "static" => Section::static_text(body),
        _ => Section::dynamic(body),
    })
}
