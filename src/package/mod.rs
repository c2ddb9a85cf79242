//! Package model and ingestion for plughost
//!
//! A plugin ships as a zip archive containing a `manifest.json` plus the
//! files the manifest references. Ingestion validates the archive and
//! produces a [`Package`]: the manifest together with a small virtual file
//! set of self-describing blobs, ready to be installed into the host
//! configuration or uploaded to the repository.
//!
//! # Archive layout
//!
//! ```text
//! my-plugin.zip
//! ├── manifest.json        (or public/manifest.json, dist/manifest.json)
//! ├── index.js             (manifest.main, required)
//! └── style.css            (manifest.style, optional)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use plughost::package::{ingest_archive, IngestMode};
//!
//! let bytes = std::fs::read("my-plugin.zip").unwrap();
//! let package = ingest_archive(&bytes, IngestMode::DirectInstall).unwrap();
//! println!("{} v{}", package.manifest.name, package.manifest.version);
//! ```

mod ingest;
pub mod types;

pub use ingest::{
    export_package, ingest_archive, validate_manifest, IngestMode, MAIN_MIME, MANIFEST_FILE,
    STYLE_MIME,
};
pub use types::{FileBlob, Package, PluginKind, PluginManifest};
