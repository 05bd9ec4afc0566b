//! Multi-document manifest parsing
//!
//! Splits rendered manifest text into decoded cluster objects plus the raw
//! documents that could not be decoded. Nothing non-empty is dropped: a
//! document that fails decoding is kept verbatim as a blob so callers can
//! report it, and parsing continues with the next document.

use std::io::BufRead;

use kube::api::DynamicObject;
use serde_json::Value;

use crate::{yaml, Error};

/// Literal YAML null document
const NULL_DOCUMENT: &str = "null";

/// Rendered manifest split into decoded objects and undecodable blobs.
///
/// Both sequences keep document order so apply ordering stays deterministic.
#[derive(Clone, Debug, Default)]
pub struct ParsedManifest {
    /// Decoded cluster objects, in document order
    pub resources: Vec<DynamicObject>,
    /// Documents that failed structured decoding, newline-terminated
    pub blobs: Vec<Vec<u8>>,
}

enum Decoded {
    Resource(Box<DynamicObject>),
    Empty,
    Invalid,
}

impl ParsedManifest {
    /// True when neither resources nor blobs were found
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.blobs.is_empty()
    }

    /// Render back into a multi-document string.
    ///
    /// Resources are emitted as JSON documents (valid YAML), followed by the
    /// blobs verbatim. Parsing the output again yields the same counts.
    pub fn to_yaml(&self) -> Result<String, Error> {
        let mut docs = Vec::with_capacity(self.resources.len() + self.blobs.len());
        for resource in &self.resources {
            let json = serde_json::to_string(resource).map_err(|e| {
                Error::serialization_for_kind(
                    resource
                        .types
                        .as_ref()
                        .map(|t| t.kind.as_str())
                        .unwrap_or_default(),
                    e.to_string(),
                )
            })?;
            docs.push(json);
        }
        for blob in &self.blobs {
            docs.push(String::from_utf8_lossy(blob).trim_end().to_string());
        }

        let mut out = String::new();
        for doc in docs {
            if !out.is_empty() {
                out.push_str("---\n");
            }
            out.push_str(&doc);
            out.push('\n');
        }
        Ok(out)
    }

    fn push_document(&mut self, document: &str) {
        let trimmed = document.trim();
        if trimmed.is_empty() || trimmed == NULL_DOCUMENT {
            return;
        }

        match decode_document(trimmed) {
            Decoded::Resource(obj) => self.resources.push(*obj),
            Decoded::Empty => {}
            Decoded::Invalid => {
                tracing::debug!(bytes = trimmed.len(), "keeping undecodable document as raw blob");
                let mut blob = trimmed.as_bytes().to_vec();
                blob.push(b'\n');
                self.blobs.push(blob);
            }
        }
    }
}

/// Parse a manifest string.
pub fn parse_manifest_str(manifest: &str) -> Result<ParsedManifest, Error> {
    parse_manifest_reader(manifest.as_bytes())
}

/// Parse a manifest stream document by document.
///
/// End of input terminates successfully; any read failure aborts the whole
/// parse so a truncated stream is never mistaken for a complete bundle.
pub fn parse_manifest_reader<R: BufRead>(mut reader: R) -> Result<ParsedManifest, Error> {
    let mut parsed = ParsedManifest::default();
    let mut document = String::new();
    let mut line = String::new();

    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| Error::parse(format!("invalid YAML doc: {e}")))?;

        if read == 0 {
            parsed.push_document(&document);
            return Ok(parsed);
        }

        if is_document_separator(&line) {
            parsed.push_document(&document);
            document.clear();
        } else {
            document.push_str(&line);
        }
    }
}

/// A separator line is `---` optionally followed by whitespace or a comment.
fn is_document_separator(line: &str) -> bool {
    match line.strip_prefix("---") {
        Some(rest) => {
            let rest = rest.trim();
            rest.is_empty() || rest.starts_with('#')
        }
        None => false,
    }
}

fn decode_document(document: &str) -> Decoded {
    let value = match yaml::parse_yaml(document) {
        Ok(value) => value,
        Err(_) => return Decoded::Invalid,
    };

    let map = match value {
        Value::Null => return Decoded::Empty,
        Value::Object(map) if map.is_empty() => return Decoded::Empty,
        Value::Object(map) => map,
        _ => return Decoded::Invalid,
    };

    let has_type = |key: &str| map.get(key).and_then(Value::as_str).is_some_and(|s| !s.is_empty());
    if !has_type("kind") || !has_type("apiVersion") {
        return Decoded::Invalid;
    }

    match serde_json::from_value::<DynamicObject>(Value::Object(map)) {
        Ok(obj) => Decoded::Resource(Box::new(obj)),
        Err(_) => Decoded::Invalid,
    }
}
