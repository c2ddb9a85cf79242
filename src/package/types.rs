//! Package types for plughost
//!
//! This module defines the data contracts of the plugin subsystem: the
//! manifest parsed from a package's `manifest.json`, the self-describing
//! file payloads that make up a package's virtual file set, and the
//! `Package` aggregate that flows between ingestion, the repository, and
//! the installed set.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{HostError, Result};

/// What a plugin contributes to the host.
///
/// A `tool` surfaces its own view in the host UI; a `theme` only restyles
/// the host and has no addressable surface of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    #[default]
    Tool,
    Theme,
}

/// The manifest loaded from a package's `manifest.json` file.
///
/// The manifest declares the plugin's identity, its entry point inside the
/// package, and the namespace key under which the loaded code publishes its
/// export (the namespace bridge).
///
/// # Example
///
/// ```json
/// {
///   "id": "com.example.schema-builder",
///   "name": "Schema Builder",
///   "version": "1.0.0",
///   "description": "Visual schema editing",
///   "main": "index.js",
///   "style": "style.css",
///   "globalVar": "PlughostSchemaBuilder",
///   "kind": "tool"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Globally unique, reverse-domain-style identifier. The sole join key
    /// across the repository, the installed set, and both denylists.
    pub id: String,

    /// Human-readable plugin name.
    pub name: String,

    /// Dotted-numeric version string (e.g., "1.2.0").
    pub version: String,

    /// Human-readable description of what the plugin provides.
    #[serde(default)]
    pub description: String,

    /// Entry-point filename inside the package (e.g., "index.js").
    pub main: String,

    /// Optional stylesheet filename inside the package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,

    /// Namespace key the loaded code publishes its export under.
    #[serde(rename = "globalVar")]
    pub global_var: String,

    /// Plugin kind. Defaults to `tool` when absent from the manifest.
    #[serde(default)]
    pub kind: PluginKind,
}

/// An opaque, self-describing file payload: raw content plus its MIME type.
///
/// On the wire and in the persisted host configuration a blob is a single
/// data-URI string (`data:<mime>;base64,<payload>`), so the same value works
/// for disk storage and for runtime injection without a side channel for the
/// content type.
#[derive(Clone, PartialEq, Eq)]
pub struct FileBlob {
    mime: String,
    bytes: Vec<u8>,
}

impl FileBlob {
    /// Create a blob from raw bytes and a MIME type.
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    /// The blob's MIME type.
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// The blob's raw content.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Content length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the blob carries no content.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Encode as a `data:<mime>;base64,<payload>` string.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, BASE64.encode(&self.bytes))
    }

    /// Parse a `data:` URI back into a blob.
    pub fn from_data_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| HostError::Validation(format!("not a data URI: {}", truncate(uri))))?;
        let (meta, payload) = rest.split_once(',').ok_or_else(|| {
            HostError::Validation(format!("data URI missing payload: {}", truncate(uri)))
        })?;
        let mime = match meta.strip_suffix(";base64") {
            Some(mime) => mime,
            None => {
                return Err(HostError::Validation(
                    "data URI is not base64-encoded".to_string(),
                ))
            }
        };
        let bytes = BASE64
            .decode(payload)
            .map_err(|e| HostError::Validation(format!("invalid base64 payload: {}", e)))?;
        let mime = if mime.is_empty() {
            "application/octet-stream"
        } else {
            mime
        };
        Ok(Self::new(mime, bytes))
    }
}

impl fmt::Debug for FileBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBlob")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Serialize for FileBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_data_uri())
    }
}

impl<'de> Deserialize<'de> for FileBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct BlobVisitor;

        impl Visitor<'_> for BlobVisitor {
            type Value = FileBlob;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a base64 data URI string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<FileBlob, E> {
                FileBlob::from_data_uri(v).map_err(|e| E::custom(e.to_string()))
            }
        }

        deserializer.deserialize_str(BlobVisitor)
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() > 48 {
        format!("{}...", s.chars().take(48).collect::<String>())
    } else {
        s.to_string()
    }
}

/// A plugin package: a manifest plus its resolved file contents.
///
/// Packages exist in two homes with independent `enabled` flags: repository
/// entries materialized from physical storage (always disabled), and entries
/// in the host configuration's installed set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Mirrors `manifest.id`; duplicated at the top level so wire consumers
    /// can key packages without descending into the manifest.
    pub id: String,

    /// The parsed plugin manifest.
    pub manifest: PluginManifest,

    /// Virtual file set keyed by filename. Ordered so serialized packages
    /// compare byte-for-byte.
    pub files: BTreeMap<String, FileBlob>,

    /// Whether the host should load this package.
    pub enabled: bool,
}

impl Package {
    /// Create a package from a manifest and file set.
    pub fn new(manifest: PluginManifest, files: BTreeMap<String, FileBlob>, enabled: bool) -> Self {
        Self {
            id: manifest.id.clone(),
            manifest,
            files,
            enabled,
        }
    }

    /// The entry-point blob, if present in the file set.
    pub fn main_blob(&self) -> Option<&FileBlob> {
        self.files.get(&self.manifest.main)
    }

    /// The stylesheet blob, if the manifest declares one and it is present.
    pub fn style_blob(&self) -> Option<&FileBlob> {
        self.manifest
            .style
            .as_deref()
            .and_then(|name| self.files.get(name))
    }

    /// A package is installable only when its declared entry point resolves
    /// to an actual file in the set.
    pub fn is_installable(&self) -> bool {
        self.main_blob().is_some()
    }

    /// SHA-256 digest of the entry-point content, hex-encoded. Used for
    /// integrity reporting in logs and the CLI, never for trust decisions.
    pub fn entry_digest(&self) -> Option<String> {
        self.main_blob()
            .map(|blob| hex::encode(Sha256::digest(blob.bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest() -> PluginManifest {
        PluginManifest {
            id: "com.example.tool".to_string(),
            name: "Example Tool".to_string(),
            version: "1.0.0".to_string(),
            description: "A sample plugin".to_string(),
            main: "index.js".to_string(),
            style: Some("style.css".to_string()),
            global_var: "ExampleTool".to_string(),
            kind: PluginKind::Tool,
        }
    }

    fn sample_package() -> Package {
        let mut files = BTreeMap::new();
        files.insert(
            "index.js".to_string(),
            FileBlob::new("text/javascript", b"window.ExampleTool = {};".to_vec()),
        );
        files.insert(
            "style.css".to_string(),
            FileBlob::new("text/css", b"body { margin: 0 }".to_vec()),
        );
        Package::new(sample_manifest(), files, true)
    }

    #[test]
    fn test_manifest_serialization_roundtrip() {
        let manifest = sample_manifest();
        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains("\"globalVar\":\"ExampleTool\""));
        assert!(json.contains("\"kind\":\"tool\""));

        let back: PluginManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn test_manifest_kind_defaults_to_tool() {
        let json = r#"{
            "id": "com.example.min",
            "name": "Minimal",
            "version": "0.1.0",
            "main": "index.js",
            "globalVar": "Minimal"
        }"#;
        let manifest: PluginManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.kind, PluginKind::Tool);
        assert!(manifest.style.is_none());
        assert!(manifest.description.is_empty());
    }

    #[test]
    fn test_manifest_theme_kind() {
        let json = r#"{
            "id": "com.example.skin",
            "name": "Skin",
            "version": "2.0.0",
            "main": "index.js",
            "globalVar": "Skin",
            "kind": "theme"
        }"#;
        let manifest: PluginManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.kind, PluginKind::Theme);
    }

    #[test]
    fn test_blob_data_uri_roundtrip() {
        let blob = FileBlob::new("text/javascript", b"console.log(1);".to_vec());
        let uri = blob.to_data_uri();
        assert!(uri.starts_with("data:text/javascript;base64,"));

        let back = FileBlob::from_data_uri(&uri).unwrap();
        assert_eq!(back, blob);
    }

    #[test]
    fn test_blob_rejects_non_data_uri() {
        let result = FileBlob::from_data_uri("https://example.com/index.js");
        assert!(matches!(result, Err(HostError::Validation(_))));
    }

    #[test]
    fn test_blob_rejects_unencoded_payload() {
        let result = FileBlob::from_data_uri("data:text/plain,hello");
        assert!(matches!(result, Err(HostError::Validation(_))));
    }

    #[test]
    fn test_blob_empty_mime_defaults_to_octet_stream() {
        let blob = FileBlob::from_data_uri("data:;base64,aGk=").unwrap();
        assert_eq!(blob.mime(), "application/octet-stream");
        assert_eq!(blob.bytes(), b"hi");
    }

    #[test]
    fn test_blob_serde_as_string() {
        let blob = FileBlob::new("text/css", b".a{}".to_vec());
        let json = serde_json::to_string(&blob).unwrap();
        assert!(json.starts_with("\"data:text/css;base64,"));

        let back: FileBlob = serde_json::from_str(&json).unwrap();
        assert_eq!(back, blob);
    }

    #[test]
    fn test_package_accessors() {
        let pkg = sample_package();
        assert!(pkg.is_installable());
        assert_eq!(pkg.main_blob().unwrap().mime(), "text/javascript");
        assert_eq!(pkg.style_blob().unwrap().mime(), "text/css");
        assert_eq!(pkg.id, pkg.manifest.id);
    }

    #[test]
    fn test_package_without_main_not_installable() {
        let mut pkg = sample_package();
        pkg.files.remove("index.js");
        assert!(!pkg.is_installable());
        assert!(pkg.entry_digest().is_none());
    }

    #[test]
    fn test_package_style_blob_absent_when_undeclared() {
        let mut pkg = sample_package();
        pkg.manifest.style = None;
        assert!(pkg.style_blob().is_none());
    }

    #[test]
    fn test_entry_digest_stable() {
        let pkg = sample_package();
        let first = pkg.entry_digest().unwrap();
        let second = pkg.entry_digest().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_package_serde_roundtrip_is_byte_identical() {
        let pkg = sample_package();
        let json = serde_json::to_string(&pkg).unwrap();
        let back: Package = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pkg);
        // BTreeMap ordering makes re-serialization deterministic
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }
}
