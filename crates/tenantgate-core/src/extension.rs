//! The hook surface extensions implement, and the live instance handle.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::descriptor::DeploymentMode;
use crate::error::HookError;
use crate::host::TenantId;

/// Result of one lifecycle hook.
pub type HookResult = Result<(), HookError>;

/// Where a hook is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookContext {
    /// Tenant whose context is entered, `None` for network-level hooks.
    pub tenant: Option<TenantId>,
    /// Whether the surrounding operation is network-wide.
    pub network_wide: bool,
}

/// An extension's runtime implementation.
///
/// Every lifecycle hook is optional: the default implementations succeed
/// without doing anything, so an extension only overrides what it needs.
pub trait Extension: Send + Sync {
    /// Start the extension. Called once, after all checks passed.
    fn run(&self, info: &ExtensionInfo);

    fn install(&self, _ctx: &HookContext) -> HookResult {
        Ok(())
    }

    fn activate(&self, _ctx: &HookContext) -> HookResult {
        Ok(())
    }

    fn deactivate(&self, _ctx: &HookContext) -> HookResult {
        Ok(())
    }

    fn uninstall(&self, _ctx: &HookContext) -> HookResult {
        Ok(())
    }

    fn network_install(&self, _ctx: &HookContext) -> HookResult {
        Ok(())
    }

    fn network_activate(&self, _ctx: &HookContext) -> HookResult {
        Ok(())
    }

    fn network_deactivate(&self, _ctx: &HookContext) -> HookResult {
        Ok(())
    }

    fn network_uninstall(&self, _ctx: &HookContext) -> HookResult {
        Ok(())
    }
}

/// Builds the runtime instance of an extension from its resolved info.
pub type ExtensionFactory = Arc<dyn Fn(&ExtensionInfo) -> Arc<dyn Extension> + Send + Sync>;

/// Resolved identity of a registered extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionInfo {
    pub slug: String,
    pub name: String,
    pub version: String,
    pub main_file: String,
    /// On-disk identifier the host uses for lifecycle events.
    pub basename: String,
    pub mode: DeploymentMode,
    pub textdomain: Option<String>,
    pub textdomain_dir: String,
}

/// A live extension: its info plus the instance produced by its factory.
#[derive(Clone)]
pub struct ExtensionInstance {
    info: Arc<ExtensionInfo>,
    extension: Arc<dyn Extension>,
    ran: Arc<AtomicBool>,
}

impl fmt::Debug for ExtensionInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionInstance")
            .field("info", &self.info)
            .field("ran", &self.ran.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ExtensionInstance {
    pub fn new(info: ExtensionInfo, extension: Arc<dyn Extension>) -> Self {
        Self {
            info: Arc::new(info),
            extension,
            ran: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn info(&self) -> &ExtensionInfo {
        &self.info
    }

    pub fn slug(&self) -> &str {
        &self.info.slug
    }

    pub fn extension(&self) -> &Arc<dyn Extension> {
        &self.extension
    }

    /// Call `run()` unless it already ran. Returns whether this call ran it.
    pub fn maybe_run(&self) -> bool {
        if self.ran.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.extension.run(&self.info);
        true
    }

    pub fn has_run(&self) -> bool {
        self.ran.load(Ordering::SeqCst)
    }

    // ── Paths ───────────────────────────────────────────────────────

    /// Directory the extension's own files live in.
    ///
    /// Must-use entry files sit in the must-use root, so their files are
    /// looked up in a `<slug>/` directory next to the entry file.
    pub fn base_dir(&self) -> PathBuf {
        let parent = Path::new(&self.info.main_file)
            .parent()
            .unwrap_or_else(|| Path::new(""));
        match self.info.mode {
            DeploymentMode::MustUsePlugin => parent.join(&self.info.slug),
            _ => parent.to_path_buf(),
        }
    }

    /// Absolute path of `relative` inside the extension.
    pub fn path(&self, relative: &str) -> PathBuf {
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            return self.base_dir();
        }
        self.base_dir().join(relative)
    }

    /// Public URL of `relative` inside the extension.
    ///
    /// `content_dir` is the directory served at `content_url`. Returns
    /// `None` when the extension lives outside of it.
    pub fn url(&self, content_dir: &Path, content_url: &Url, relative: &str) -> Option<Url> {
        let base = self.base_dir();
        let inside = base.strip_prefix(content_dir).ok()?;
        let mut segments: Vec<String> = inside
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        segments.extend(
            relative
                .split('/')
                .filter(|part| !part.is_empty())
                .map(String::from),
        );

        let mut url = content_url.clone();
        {
            let mut path = url.path_segments_mut().ok()?;
            path.pop_if_empty().extend(&segments);
            if relative.is_empty() || relative.ends_with('/') {
                path.push("");
            }
        }
        Some(url)
    }

    // ── Developer notices ───────────────────────────────────────────

    /// Report a call that used the extension's API incorrectly.
    ///
    /// Logged on the `tenantgate::developer` target; the message is returned
    /// for hosts that surface it themselves.
    pub fn doing_it_wrong(&self, function: &str, message: &str, since: Option<&str>) -> String {
        let mut text = format!("{function} was called incorrectly: {message}");
        if let Some(version) = since.filter(|v| !v.trim().is_empty()) {
            text.push_str(&format!(
                " This message was added in \"{}\" version {version}.",
                self.info.name
            ));
        }
        tracing::warn!(
            target: "tenantgate::developer",
            extension = %self.info.slug,
            function,
            "{text}"
        );
        text
    }

    /// Report a call to a deprecated function of the extension.
    pub fn deprecated_function(
        &self,
        function: &str,
        version: &str,
        replacement: Option<&str>,
    ) -> String {
        let name = &self.info.name;
        let text = match replacement {
            Some(replacement) => format!(
                "{function} is deprecated as of \"{name}\" version {version}. \
                 Use {replacement} instead!"
            ),
            None => format!(
                "{function} is deprecated as of \"{name}\" version {version} \
                 with no alternative available."
            ),
        };
        tracing::warn!(
            target: "tenantgate::developer",
            extension = %self.info.slug,
            function,
            "{text}"
        );
        text
    }
}
