//! Physical package storage
//!
//! The server side of the disk protocol: a directory tree where each
//! package lives under `<root>/<sanitized-id>/public/` as a `manifest.json`
//! plus its decoded file contents. Scanning materializes repository
//! entries; writing overwrites by sanitized id; destruction removes the
//! package directory once the serving process can release its locks.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{HostError, Result};
use crate::package::{
    validate_manifest, FileBlob, Package, PluginManifest, MAIN_MIME, MANIFEST_FILE, STYLE_MIME,
};

/// Subdirectory the writer places package contents under; scanning probes
/// it first, then `dist/` (build output), then the package directory root.
const PUBLIC_DIR: &str = "public";

static UNSAFE_ID_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9.\-]").unwrap());

/// Reduce a package id to a filesystem-safe directory token: every
/// character outside `[a-zA-Z0-9.-]` becomes `_`.
pub fn sanitize_id(id: &str) -> String {
    UNSAFE_ID_CHARS.replace_all(id, "_").into_owned()
}

/// Validate a package-relative filename: no absolute paths, no parent
/// components, nothing empty.
fn sanitize_relative(name: &str) -> Result<PathBuf> {
    let mut cleaned = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::ParentDir => {
                return Err(HostError::Validation(format!(
                    "file name escapes the package directory: {}",
                    name
                )));
            }
            Component::CurDir => {}
            Component::Normal(part) => cleaned.push(part),
        }
    }
    if cleaned.as_os_str().is_empty() {
        return Err(HostError::Validation("empty file name".to_string()));
    }
    Ok(cleaned)
}

/// Repository storage rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Storage rooted at `root`. The directory is created lazily on first
    /// write; a missing root simply lists as empty.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scan physical storage and materialize every discoverable package as
    /// a repository entry (`enabled=false`).
    ///
    /// Directories without a parseable manifest or without their declared
    /// entry file are logged and skipped; scanning itself never fails.
    pub fn list_packages(&self) -> Vec<Package> {
        let mut packages = Vec::new();

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => {
                debug!(root = %self.root.display(), "Repository root absent, listing empty");
                return packages;
            }
        };

        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            match self.load_entry(&dir) {
                Ok(Some(package)) => {
                    debug!(
                        plugin = %package.id,
                        dir = %dir.display(),
                        "Discovered repository entry"
                    );
                    packages.push(package);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable package directory");
                }
            }
        }

        packages.sort_by(|a, b| a.id.cmp(&b.id));
        packages
    }

    /// Write (or overwrite, by sanitized id) a package's manifest and
    /// decoded file contents.
    pub fn write_package(&self, package: &Package) -> Result<PathBuf> {
        let safe_id = sanitize_id(&package.id);
        let package_dir = self.root.join(&safe_id);
        let content_dir = package_dir.join(PUBLIC_DIR);

        // Validate every target path before touching the directory so a
        // bad file set cannot leave a half-written package behind.
        let mut targets = Vec::with_capacity(package.files.len());
        for (name, blob) in &package.files {
            targets.push((content_dir.join(sanitize_relative(name)?), blob));
        }

        if package_dir.exists() {
            std::fs::remove_dir_all(&package_dir)?;
        }
        std::fs::create_dir_all(&content_dir)?;

        let manifest_json = serde_json::to_vec_pretty(&package.manifest)?;
        std::fs::write(content_dir.join(MANIFEST_FILE), manifest_json)?;

        for (target, blob) in targets {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, blob.bytes())?;
        }

        info!(
            plugin = %package.id,
            dir = %package_dir.display(),
            files = package.files.len(),
            "Wrote package to repository storage"
        );
        Ok(package_dir)
    }

    /// Delete a package's on-disk directory. Locates the target by
    /// sanitized directory name first, then by scanning manifests for a
    /// matching id. A missing target is already clean: `Ok(false)`.
    pub fn destroy_package(&self, id: &str) -> Result<bool> {
        let target = self.find_package_dir(id);
        match target {
            Some(dir) => {
                std::fs::remove_dir_all(&dir)?;
                info!(plugin = id, dir = %dir.display(), "Destroyed package on disk");
                Ok(true)
            }
            None => {
                debug!(plugin = id, "No on-disk package to destroy");
                Ok(false)
            }
        }
    }

    fn find_package_dir(&self, id: &str) -> Option<PathBuf> {
        let by_name = self.root.join(sanitize_id(id));
        if by_name.is_dir() {
            return Some(by_name);
        }

        // The directory may predate the current sanitization rules; fall
        // back to matching manifest ids.
        let entries = std::fs::read_dir(&self.root).ok()?;
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            if let Some((_, manifest)) = self.read_manifest(&dir) {
                if manifest.id == id || sanitize_id(&manifest.id) == id {
                    return Some(dir);
                }
            }
        }
        None
    }

    /// Probe the well-known manifest locations inside a package directory.
    fn read_manifest(&self, dir: &Path) -> Option<(PathBuf, PluginManifest)> {
        let candidates = [
            dir.join(PUBLIC_DIR).join(MANIFEST_FILE),
            dir.join("dist").join(MANIFEST_FILE),
            dir.join(MANIFEST_FILE),
        ];
        for path in candidates {
            if !path.is_file() {
                continue;
            }
            let content = std::fs::read_to_string(&path).ok()?;
            match serde_json::from_str::<PluginManifest>(&content) {
                Ok(manifest) => {
                    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
                    return Some((base, manifest));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unparseable manifest");
                    return None;
                }
            }
        }
        None
    }

    /// Materialize one package directory, or `None` when it holds no
    /// usable package.
    fn load_entry(&self, dir: &Path) -> Result<Option<Package>> {
        let Some((base, manifest)) = self.read_manifest(dir) else {
            return Ok(None);
        };
        if let Err(e) = validate_manifest(&manifest) {
            warn!(dir = %dir.display(), error = %e, "Invalid manifest in repository");
            return Ok(None);
        }

        let Some(main_bytes) = read_package_file(&base, dir, &manifest.main) else {
            warn!(
                dir = %dir.display(),
                main = %manifest.main,
                "Entry file missing, skipping package"
            );
            return Ok(None);
        };

        let mut files = BTreeMap::new();
        files.insert(manifest.main.clone(), FileBlob::new(MAIN_MIME, main_bytes));

        if let Some(style) = manifest.style.as_deref() {
            // A missing stylesheet degrades rendering only; the package
            // still lists.
            if let Some(style_bytes) = read_package_file(&base, dir, style) {
                files.insert(style.to_string(), FileBlob::new(STYLE_MIME, style_bytes));
            }
        }

        Ok(Some(Package::new(manifest, files, false)))
    }
}

/// Read a file relative to the manifest's directory, falling back to the
/// package directory root.
fn read_package_file(base: &Path, dir: &Path, name: &str) -> Option<Vec<u8>> {
    let rel = sanitize_relative(name).ok()?;
    for candidate in [base.join(&rel), dir.join(&rel)] {
        if candidate.is_file() {
            if let Ok(bytes) = std::fs::read(&candidate) {
                return Some(bytes);
            }
        }
    }
    None
}
