//! Built-in default packages
//!
//! Packages shipped with the host itself, fed to
//! `Lifecycle::reconcile_defaults` at startup. Each is constructed from
//! payloads embedded in the binary, so a fresh host works before any
//! repository exists.

use std::collections::BTreeMap;

use crate::package::{FileBlob, Package, PluginKind, PluginManifest, MAIN_MIME, STYLE_MIME};

const ENTERPRISE_THEME_CSS: &str = r#"/* Enterprise restyling overrides */
body {
  font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif !important;
  background-color: #f4f5f7 !important;
}

header {
  background-color: #ffffff !important;
  border-bottom: 1px solid #dfe1e6 !important;
}

button {
  border-radius: 3px !important;
  font-weight: 500 !important;
  text-transform: none !important;
}

.accent {
  background-color: #0052cc !important;
}
.accent:hover {
  background-color: #0747a6 !important;
}
"#;

const ENTERPRISE_THEME_JS: &str = r#"(function (global) {
  'use strict';
  var theme = {
    name: 'Enterprise Theme',
    apply: function (root) {
      (root || global.document.body).classList.add('enterprise-theme');
    },
    remove: function (root) {
      (root || global.document.body).classList.remove('enterprise-theme');
    }
  };
  global.PlughostEnterpriseTheme = { default: theme };
})(typeof window !== 'undefined' ? window : globalThis);
"#;

/// The enterprise restyling theme shipped with the host.
pub fn enterprise_theme() -> Package {
    let manifest = PluginManifest {
        id: "com.plughost.enterprise-theme".to_string(),
        name: "Enterprise Theme".to_string(),
        version: "1.2.0".to_string(),
        description: "Restyles the host with a muted, enterprise look".to_string(),
        main: "index.js".to_string(),
        style: Some("style.css".to_string()),
        global_var: "PlughostEnterpriseTheme".to_string(),
        kind: PluginKind::Theme,
    };

    let mut files = BTreeMap::new();
    files.insert(
        manifest.main.clone(),
        FileBlob::new(MAIN_MIME, ENTERPRISE_THEME_JS.as_bytes().to_vec()),
    );
    files.insert(
        "style.css".to_string(),
        FileBlob::new(STYLE_MIME, ENTERPRISE_THEME_CSS.as_bytes().to_vec()),
    );

    Package::new(manifest, files, true)
}

/// Every package the host ships as a default, in reconciliation order.
pub fn builtin_packages() -> Vec<Package> {
    vec![enterprise_theme()]
}
