//! Dependency evaluation: callables, runtime, platform and sibling extensions.
//!
//! Evaluation never stops at the first problem. Every declared requirement
//! is checked and every failure lands in the report, so the administrator
//! sees the whole list at once.

use serde::{Deserialize, Serialize};

use crate::config::LoaderConfig;
use crate::descriptor::DependencyManifest;
use crate::host::{Host, PackageKind};
use crate::version::{self, GateFailure};

/// Slug used for the runtime entry of a report.
pub const RUNTIME_SLUG: &str = "php";
/// Slug used for the platform entry of a report.
pub const PLATFORM_SLUG: &str = "core";

/// What kind of dependency a version error is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyKind {
    #[serde(rename = "php")]
    Runtime,
    #[serde(rename = "core")]
    Platform,
    #[serde(rename = "plugin")]
    Plugin,
}

/// One unmet version requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionError {
    pub dependency_slug: String,
    pub kind: DependencyKind,
    pub required_version: String,
    /// Installed version, `None` when the dependency is missing or inactive.
    pub installed: Option<String>,
}

/// Everything that failed for one extension. Empty means it may run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub extension_name: String,
    pub callable_errors: Vec<String>,
    pub version_errors: Vec<VersionError>,
}

impl DiagnosticReport {
    pub fn new(extension_name: impl Into<String>) -> Self {
        Self {
            extension_name: extension_name.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.callable_errors.is_empty() && self.version_errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.callable_errors.len() + self.version_errors.len()
    }

    fn push_version_error(
        &mut self,
        slug: &str,
        kind: DependencyKind,
        required: &str,
        failure: GateFailure,
    ) {
        self.version_errors.push(VersionError {
            dependency_slug: slug.to_string(),
            kind,
            required_version: required.to_string(),
            installed: failure.installed,
        });
    }
}

/// Canonical basename of a sibling extension id.
///
/// `forms` → `forms/forms.php`, `forms.php` → `forms/forms.php`,
/// `forms/main.php` stays as is.
pub fn canonical_extension_id(id: &str, suffix: &str) -> String {
    let mut stem = id.trim();
    if !suffix.is_empty() {
        stem = stem.strip_suffix(suffix).unwrap_or(stem);
    }
    let mut canonical = if stem.contains('/') {
        stem.to_string()
    } else {
        format!("{stem}/{stem}")
    };
    canonical.push_str(suffix);
    canonical
}

/// Raise declared floors to the configured floors where weaker or empty.
pub fn normalize_manifest(
    manifest: &DependencyManifest,
    config: &LoaderConfig,
) -> DependencyManifest {
    let mut normalized = manifest.clone();
    normalized.min_runtime_version =
        version::max_version(&manifest.min_runtime_version, &config.min_runtime_version)
            .to_string();
    normalized.min_platform_version =
        version::max_version(&manifest.min_platform_version, &config.min_platform_version)
            .to_string();
    normalized
}

/// Evaluates manifests against the host.
pub struct DependencyChecker<'a, H: Host + ?Sized> {
    host: &'a H,
    config: &'a LoaderConfig,
}

impl<'a, H: Host + ?Sized> DependencyChecker<'a, H> {
    pub fn new(host: &'a H, config: &'a LoaderConfig) -> Self {
        Self { host, config }
    }

    /// Check every requirement of `manifest` and collect the failures.
    pub fn evaluate(
        &self,
        extension_name: &str,
        manifest: &DependencyManifest,
    ) -> DiagnosticReport {
        let manifest = normalize_manifest(manifest, self.config);
        let mut report = DiagnosticReport::new(extension_name);

        for callable in &manifest.required_callables {
            if !self.host.is_callable(callable) {
                report.callable_errors.push(callable.display_name());
            }
        }

        if let Err(failure) = version::check(
            self.host.runtime_version().as_deref(),
            &manifest.min_runtime_version,
        ) {
            report.push_version_error(
                RUNTIME_SLUG,
                DependencyKind::Runtime,
                &manifest.min_runtime_version,
                failure,
            );
        }

        if let Err(failure) = version::check(
            self.host.platform_version().as_deref(),
            &manifest.min_platform_version,
        ) {
            report.push_version_error(
                PLATFORM_SLUG,
                DependencyKind::Platform,
                &manifest.min_platform_version,
                failure,
            );
        }

        for (id, required) in manifest.required_extensions.iter() {
            if let Err(failure) = self.check_extension(id, required) {
                report.push_version_error(id, DependencyKind::Plugin, required, failure);
            }
        }

        if !report.is_empty() {
            tracing::debug!(
                extension = %extension_name,
                callable_errors = report.callable_errors.len(),
                version_errors = report.version_errors.len(),
                "dependency checks failed"
            );
        }
        report
    }

    /// Whether a sibling extension is active, and new enough if `required`
    /// is non-empty.
    pub fn check_extension(&self, id: &str, required: &str) -> Result<(), GateFailure> {
        let canonical = canonical_extension_id(id, &self.config.entry_suffix);

        if !self.is_extension_active(&canonical) {
            return Err(GateFailure { installed: None });
        }

        if required.trim().is_empty() {
            return Ok(());
        }

        match self.host.read_local_metadata(&canonical, PackageKind::Plugin) {
            Some(meta) if !meta.version.trim().is_empty() => {
                version::check(Some(&meta.version), required)
            }
            // Active but without a readable version: nothing to compare.
            _ => Ok(()),
        }
    }

    /// Active on the current tenant, or network-wide on multi-tenant hosts.
    pub fn is_extension_active(&self, canonical: &str) -> bool {
        if self.host.active_plugins().iter().any(|b| b == canonical) {
            return true;
        }
        self.host.is_multi_tenant() && self.host.network_active_plugins().contains(canonical)
    }
}
