//! Turns diagnostic reports into renderable records.
//!
//! Rendering stays with the host. A record is a message plus, for sibling
//! extensions the actor can fix from the admin, a remediation action.

use serde::Serialize;
use url::Url;

use crate::config::LoaderConfig;
use crate::dependency::{canonical_extension_id, DependencyKind, DiagnosticReport, VersionError};
use crate::host::{caps, Host, PackageKind, PackageRegistry, RemoteMetadata};
use crate::version;

/// One line of an administrative notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticRecord {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_link: Option<String>,
}

impl DiagnosticRecord {
    fn message(message: String) -> Self {
        Self {
            message,
            action_label: None,
            action_link: None,
        }
    }

    fn with_action(mut self, action: Option<(&str, String)>) -> Self {
        if let Some((label, link)) = action {
            self.action_label = Some(label.to_string());
            self.action_link = Some(link);
        }
        self
    }
}

/// Everything shown for one extension that failed its checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticNotice {
    pub extension_name: String,
    /// Title line naming the extension.
    pub heading: String,
    pub summary: String,
    pub records: Vec<DiagnosticRecord>,
    /// Advice shown after missing callables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callable_hint: Option<String>,
    /// Closing call to action after version errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
}

const NOTICE_SUMMARY: &str =
    "Due to missing dependencies, the plugin has been automatically deactivated.";

const NOTICE_FOOTER: &str = "Please install / update and activate the above resources.";

/// Remediation a sibling extension allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Remedy {
    Install,
    Activate,
    Update,
}

impl Remedy {
    fn label(self) -> &'static str {
        match self {
            Self::Install => "Install",
            Self::Activate => "Activate",
            Self::Update => "Update",
        }
    }

    fn capability(self) -> &'static str {
        match self {
            Self::Install => caps::INSTALL_PLUGINS,
            Self::Activate => caps::ACTIVATE_PLUGINS,
            Self::Update => caps::UPDATE_PLUGINS,
        }
    }
}

pub struct DiagnosticsPresenter<'a, H: Host + ?Sized> {
    host: &'a H,
    registry: &'a dyn PackageRegistry,
    config: &'a LoaderConfig,
}

impl<'a, H: Host + ?Sized> DiagnosticsPresenter<'a, H> {
    pub fn new(host: &'a H, registry: &'a dyn PackageRegistry, config: &'a LoaderConfig) -> Self {
        Self {
            host,
            registry,
            config,
        }
    }

    pub fn present(&self, report: &DiagnosticReport) -> DiagnosticNotice {
        let mut records = Vec::with_capacity(report.error_count());

        for callable in &report.callable_errors {
            records.push(DiagnosticRecord::message(format!(
                "The required function {callable} could not be found."
            )));
        }

        for error in &report.version_errors {
            records.push(self.version_record(error));
        }

        let runtime = &self.config.runtime_label;
        let callable_hint = (!report.callable_errors.is_empty()).then(|| {
            format!(
                "There are probably some {runtime} extensions missing, or you might be using \
                 an outdated version of {runtime}. If you do not know how to fix this, please \
                 ask your hosting provider."
            )
        });

        DiagnosticNotice {
            extension_name: report.extension_name.clone(),
            heading: format!("Fatal error with plugin {}:", report.extension_name),
            summary: NOTICE_SUMMARY.to_string(),
            records,
            callable_hint,
            footer: (!report.version_errors.is_empty()).then(|| NOTICE_FOOTER.to_string()),
        }
    }

    fn version_record(&self, error: &VersionError) -> DiagnosticRecord {
        let (name, action) = match error.kind {
            DependencyKind::Runtime => (self.config.runtime_label.clone(), None),
            DependencyKind::Platform => (self.config.platform_label.clone(), None),
            DependencyKind::Plugin => self.plugin_remedy(error),
        };

        let message = match &error.installed {
            None => format!("{name} could not be found."),
            Some(installed) => format!(
                "{name} is outdated. You are using version {installed}, but version {} is required.",
                error.required_version
            ),
        };
        DiagnosticRecord::message(message).with_action(action)
    }

    /// Display name of a sibling plus the action the actor may take.
    fn plugin_remedy(&self, error: &VersionError) -> (String, Option<(&'static str, String)>) {
        let basename = canonical_extension_id(&error.dependency_slug, &self.config.entry_suffix);
        let registry_slug = basename
            .split_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or(&basename)
            .to_string();
        let local = self
            .host
            .read_local_metadata(&basename, PackageKind::Plugin);

        // Only ask the registry when the answer can change the outcome.
        let needs_remote = local.is_none() || error.installed.is_some();
        let remote = if needs_remote {
            self.fetch_remote(&registry_slug)
        } else {
            None
        };

        let name = local
            .as_ref()
            .map(|m| m.name.clone())
            .filter(|n| !n.trim().is_empty())
            .or_else(|| remote.as_ref().map(|m| m.name.clone()))
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| error.dependency_slug.clone());

        let remedy = match (&error.installed, &local, &remote) {
            (None, None, Some(_)) => Some(Remedy::Install),
            (None, Some(_), _) => Some(Remedy::Activate),
            (Some(_), _, Some(remote))
                if version::check(Some(&remote.version), &error.required_version).is_ok() =>
            {
                Some(Remedy::Update)
            }
            _ => None,
        };

        let action = remedy
            .filter(|r| self.host.actor_can(r.capability()))
            .and_then(|r| {
                let link = self.action_link(r, &registry_slug, &basename)?;
                Some((r.label(), link))
            });
        (name, action)
    }

    fn fetch_remote(&self, slug: &str) -> Option<RemoteMetadata> {
        let remote = self
            .registry
            .fetch_remote_metadata(slug, PackageKind::Plugin);
        if remote.is_none() {
            tracing::debug!(slug = %slug, "no registry data for dependency");
        }
        remote
    }

    fn action_link(&self, remedy: Remedy, registry_slug: &str, basename: &str) -> Option<String> {
        let base = match Url::parse(&self.config.admin_url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(admin_url = %self.config.admin_url, "invalid admin url: {e}");
                return None;
            }
        };
        let (page, pairs) = match remedy {
            Remedy::Install => (
                "update.php",
                [("action", "install-plugin"), ("plugin", registry_slug)],
            ),
            Remedy::Activate => ("plugins.php", [("action", "activate"), ("plugin", basename)]),
            Remedy::Update => (
                "update.php",
                [("action", "upgrade-plugin"), ("plugin", basename)],
            ),
        };
        let mut url = base.join(page).ok()?;
        url.query_pairs_mut().extend_pairs(pairs);
        Some(url.into())
    }
}
