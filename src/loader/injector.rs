//! Resource injection boundary
//!
//! The loader never executes plugin payloads itself; it delegates to a
//! [`ResourceInjector`], the capability boundary between validated package
//! data and live code in the host. The embedding application supplies the
//! real implementation (a script/style injector for a web shell, an
//! embedded interpreter, ...). Implementations execute the code payload and
//! must publish the module's export under the request's `global_var` in the
//! shared namespace before returning; the loader verifies the binding
//! afterwards and treats a missing entry as a runtime failure.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::error::Result;
use crate::package::FileBlob;

use super::namespace::ModuleNamespace;

/// Everything an injector needs to activate a package's code resource.
pub struct InjectionRequest<'a> {
    /// Package id tagging the injected resource.
    pub id: &'a str,
    /// Namespace key the executed code must populate.
    pub global_var: &'a str,
    /// The entry-point payload.
    pub code: &'a FileBlob,
    /// The namespace the export is published into.
    pub namespace: &'a ModuleNamespace,
}

/// Makes package resources observably active in the running host.
///
/// All failures must be returned as errors, never panics: loading
/// user-supplied code is an expected, recoverable outcome.
#[async_trait]
pub trait ResourceInjector: Send + Sync {
    /// Execute a package's entry-point payload.
    async fn inject_code(&self, request: InjectionRequest<'_>) -> Result<()>;

    /// Activate a package's stylesheet payload, tagged by package id.
    async fn inject_style(&self, id: &str, style: &FileBlob) -> Result<()>;

    /// Tear down whatever `inject_code`/`inject_style` set up for this id.
    async fn remove(&self, id: &str);
}

/// Injector that activates nothing but records the binding a real host
/// would observe.
///
/// Used by the CLI to verify that every enabled package resolves end to end
/// (archive intact, entry point present, namespace key bindable) without
/// executing untrusted payloads. It publishes a descriptor of the code
/// resource under the package's namespace key.
#[derive(Debug, Default)]
pub struct DryRunInjector;

#[async_trait]
impl ResourceInjector for DryRunInjector {
    async fn inject_code(&self, request: InjectionRequest<'_>) -> Result<()> {
        debug!(
            plugin = request.id,
            global_var = request.global_var,
            bytes = request.code.len(),
            "Dry-run code injection"
        );
        request.namespace.publish(
            request.global_var,
            json!({
                "id": request.id,
                "contentType": request.code.mime(),
                "contentLength": request.code.len(),
                "dryRun": true,
            }),
        );
        Ok(())
    }

    async fn inject_style(&self, id: &str, style: &FileBlob) -> Result<()> {
        debug!(plugin = id, bytes = style.len(), "Dry-run style injection");
        Ok(())
    }

    async fn remove(&self, _id: &str) {}
}
