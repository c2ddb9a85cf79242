//! Package ingestion for plughost
//!
//! This module turns an uploaded zip archive into a validated [`Package`]:
//! it locates the `manifest.json`, parses and validates it, then resolves
//! the declared entry point and optional stylesheet to actual archive
//! entries. Every failure mode is fatal to the ingestion call; no partial
//! state is committed until the caller installs or uploads the result.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::{HostError, Result};

use super::types::{FileBlob, Package, PluginManifest};

/// Well-known manifest filename at the archive root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Subdirectories probed for the manifest, in order. Build tooling commonly
/// emits the distributable package under `public/` or `dist/`.
const MANIFEST_DIRS: &[&str] = &["", "public/", "dist/"];

/// MIME type assigned to entry-point blobs.
pub const MAIN_MIME: &str = "text/javascript";

/// MIME type assigned to stylesheet blobs.
pub const STYLE_MIME: &str = "text/css";

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)*([\-+][0-9A-Za-z.\-]+)?$").unwrap());

/// How the resulting package's `enabled` flag is defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// The user is installing this archive directly; start enabled.
    DirectInstall,
    /// The archive is being materialized for repository discovery; start
    /// disabled until the user installs it.
    Discovery,
}

/// Validate a plugin manifest for completeness.
///
/// A manifest is well-formed iff `id`, `name`, `main`, and `globalVar` are
/// non-empty and `version` is a dotted-numeric version string (an optional
/// pre-release/build suffix is accepted).
pub fn validate_manifest(manifest: &PluginManifest) -> Result<()> {
    let required = [
        ("id", &manifest.id),
        ("name", &manifest.name),
        ("main", &manifest.main),
        ("globalVar", &manifest.global_var),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(HostError::Validation(format!(
                "manifest field '{}' must be a non-empty string",
                field
            )));
        }
    }

    if !VERSION_RE.is_match(manifest.version.trim()) {
        return Err(HostError::Validation(format!(
            "manifest version '{}' is not a valid version string",
            manifest.version
        )));
    }

    Ok(())
}

/// Ingest a zip archive into a complete [`Package`].
///
/// The manifest is looked up at the archive root, then under `public/` and
/// `dist/`. `manifest.main` and, if declared, `manifest.style` are resolved
/// relative to the manifest's directory, falling back to the archive root.
///
/// # Errors
/// - `HostError::Validation` if the archive is unreadable, `manifest.json`
///   is missing, or the manifest is malformed or incomplete
/// - `HostError::AssetMissing` if a referenced main/style entry is absent
pub fn ingest_archive(bytes: &[u8], mode: IngestMode) -> Result<Package> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| HostError::Validation(format!("unreadable archive: {}", e)))?;

    let (base, manifest_bytes) = read_manifest(&mut archive)?;
    let manifest: PluginManifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| HostError::Validation(format!("invalid manifest.json: {}", e)))?;
    validate_manifest(&manifest)?;

    let mut files = BTreeMap::new();

    let main_bytes = read_entry(&mut archive, base, &manifest.main).ok_or_else(|| {
        HostError::AssetMissing(format!(
            "entry file '{}' not found in archive",
            manifest.main
        ))
    })?;
    files.insert(
        manifest.main.clone(),
        FileBlob::new(MAIN_MIME, main_bytes),
    );

    if let Some(style) = manifest.style.as_deref() {
        let style_bytes = read_entry(&mut archive, base, style).ok_or_else(|| {
            HostError::AssetMissing(format!("style file '{}' not found in archive", style))
        })?;
        files.insert(style.to_string(), FileBlob::new(STYLE_MIME, style_bytes));
    }

    let enabled = matches!(mode, IngestMode::DirectInstall);
    let package = Package::new(manifest, files, enabled);

    info!(
        plugin = %package.id,
        version = %package.manifest.version,
        files = package.files.len(),
        digest = %package.entry_digest().unwrap_or_default(),
        "Ingested package"
    );

    Ok(package)
}

/// Serialize a package back into a standalone zip archive (manifest plus
/// decoded file contents), for portability between hosts.
pub fn export_package(package: &Package) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    let manifest_json = serde_json::to_vec_pretty(&package.manifest)?;
    writer
        .start_file(MANIFEST_FILE, options)
        .and_then(|_| writer.write_all(&manifest_json).map_err(Into::into))
        .map_err(|e| HostError::Validation(format!("failed to write archive: {}", e)))?;

    for (name, blob) in &package.files {
        writer
            .start_file(name.as_str(), options)
            .and_then(|_| writer.write_all(blob.bytes()).map_err(Into::into))
            .map_err(|e| HostError::Validation(format!("failed to write archive: {}", e)))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| HostError::Validation(format!("failed to finish archive: {}", e)))?;
    Ok(cursor.into_inner())
}

/// Locate and read the manifest, returning the directory prefix it was
/// found under together with its raw bytes.
fn read_manifest(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<(&'static str, Vec<u8>)> {
    for &base in MANIFEST_DIRS {
        let path = format!("{}{}", base, MANIFEST_FILE);
        if let Some(bytes) = read_exact(archive, &path) {
            debug!(path = %path, "Located manifest in archive");
            return Ok((base, bytes));
        }
    }
    Err(HostError::Validation(
        "missing manifest.json in archive root".to_string(),
    ))
}

/// Read an entry relative to the manifest's directory, falling back to the
/// archive root.
fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, base: &str, name: &str) -> Option<Vec<u8>> {
    if !base.is_empty() {
        if let Some(bytes) = read_exact(archive, &format!("{}{}", base, name)) {
            return Some(bytes);
        }
    }
    read_exact(archive, name)
}

fn read_exact(archive: &mut ZipArchive<Cursor<&[u8]>>, path: &str) -> Option<Vec<u8>> {
    let mut entry = archive.by_name(path).ok()?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes).ok()?;
    Some(bytes)
}
