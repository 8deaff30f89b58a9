//! The loader: the surface extensions and the host talk to.
//!
//! An extension calls [`Loader::load`] with its descriptor and manifest.
//! The loader registers it, evaluates its dependencies and, if everything
//! passes, instantiates it, loads its translations, runs it once and
//! subscribes its lifecycle events. Failures leave a diagnostic report
//! behind for the admin notices.
//!
//! Must-use extensions load before regular plugins: hosts that boot in
//! stages [`enqueue`](Loader::enqueue) descriptors and
//! [`flush`](Loader::flush) one stage at a time. Once the plugins stage is
//! flushed the loading window is closed.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use url::Url;

use crate::config::LoaderConfig;
use crate::dependency::{DependencyChecker, DiagnosticReport};
use crate::descriptor::{DependencyManifest, DeploymentMode, ExtensionDescriptor, ExtensionFile};
use crate::diagnostics::{DiagnosticNotice, DiagnosticsPresenter};
use crate::error::LoaderError;
use crate::events::{DispatchTable, LifecycleEvent, LIFECYCLE_VERBS};
use crate::extension::{ExtensionFactory, ExtensionInfo, ExtensionInstance};
use crate::host::{caps, Host, HostPaths, OptionScope, PackageRegistry};
use crate::lifecycle::{LifecycleCoordinator, LifecycleOutcome, LifecycleState};
use crate::registry::{normalize_path, resolve_info, PluginRegistry};

/// Shared catalog directory the host keeps plugin translations in.
const GLOBAL_PLUGIN_LANGUAGE_DIR: &str = "languages/plugins/";

/// Boot stage a queued extension is loaded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStage {
    /// Must-use extensions, loaded first.
    MustUse,
    /// Everything else. Flushing this stage closes the loading window.
    Plugins,
}

struct Queued {
    stage: LoadStage,
    descriptor: ExtensionDescriptor,
    manifest: DependencyManifest,
}

pub struct Loader {
    host: Arc<dyn Host>,
    packages: Arc<dyn PackageRegistry>,
    config: LoaderConfig,
    registry: PluginRegistry,
    routes: DispatchTable,
    reports: BTreeMap<String, DiagnosticReport>,
    queue: Vec<Queued>,
    closed: bool,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("reports", &self.reports.keys().collect::<Vec<_>>())
            .field("queued", &self.queue.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Loader {
    /// Create a loader bound to `host` and load its own translations.
    pub fn new(
        host: Arc<dyn Host>,
        packages: Arc<dyn PackageRegistry>,
        config: LoaderConfig,
    ) -> Self {
        let config = config.clamped();
        let registry = PluginRegistry::new(host.paths());
        let loader = Self {
            host,
            packages,
            config,
            registry,
            routes: DispatchTable::new(),
            reports: BTreeMap::new(),
            queue: Vec::new(),
            closed: false,
        };
        loader.load_own_catalog();
        loader
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    // ── Loading ─────────────────────────────────────────────────────

    /// Register and gate an extension. True iff it is now running and
    /// wired for lifecycle events.
    pub fn load(&mut self, descriptor: ExtensionDescriptor, manifest: &DependencyManifest) -> bool {
        let slug = descriptor.slug.clone();
        match self.try_load(descriptor, manifest) {
            Ok(running) => running,
            Err(e) => {
                tracing::warn!(slug = %slug, "extension refused: {e}");
                false
            }
        }
    }

    /// Like [`load`](Self::load), but says why an extension was refused.
    ///
    /// `Ok(false)` means the extension registered but failed its checks;
    /// its report is available through [`report`](Self::report).
    pub fn try_load(
        &mut self,
        descriptor: ExtensionDescriptor,
        manifest: &DependencyManifest,
    ) -> Result<bool, LoaderError> {
        if self.closed {
            return Err(LoaderError::LoadingClosed(descriptor.slug));
        }

        let info = self.registry.try_register(&descriptor)?;

        let report = DependencyChecker::new(self.host.as_ref(), &self.config)
            .evaluate(&info.name, manifest);
        if !report.is_empty() {
            tracing::warn!(
                slug = %info.slug,
                errors = report.error_count(),
                "extension failed dependency checks"
            );
            self.reports.insert(info.slug.clone(), report);
            return Ok(false);
        }
        self.reports.remove(&info.slug);

        let instance = self
            .registry
            .instantiate(&info.slug)
            .ok_or_else(|| LoaderError::NotFound(info.slug.clone()))?;

        self.load_extension_catalog(instance.info());
        instance.maybe_run();

        self.routes.subscribe(&info.slug, &info.basename);
        for verb in LIFECYCLE_VERBS {
            self.host.on_lifecycle(*verb, &info.basename);
        }

        tracing::info!(
            slug = %info.slug,
            version = %info.version,
            mode = %info.mode,
            "extension loaded"
        );
        Ok(true)
    }

    /// Load an extension from an `extension.toml` file.
    pub fn load_file(&mut self, path: &Path, factory: ExtensionFactory) -> bool {
        match ExtensionFile::from_path(path) {
            Ok(file) => {
                let (descriptor, manifest) = file.into_parts(factory);
                self.load(descriptor, &manifest)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read extension file: {e}");
                false
            }
        }
    }

    /// Live instance of a loaded extension.
    pub fn lookup(&self, slug: &str) -> Option<ExtensionInstance> {
        self.registry.lookup_by_slug(slug)
    }

    /// Public URL of `relative` inside a loaded extension.
    pub fn extension_url(&self, slug: &str, relative: &str) -> Option<Url> {
        let instance = self.lookup(slug)?;
        let content_url = match Url::parse(&self.config.content_url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(content_url = %self.config.content_url, "invalid content url: {e}");
                return None;
            }
        };
        instance.url(Path::new(&self.config.content_dir), &content_url, relative)
    }

    /// Queue an extension for the stage its location puts it in.
    pub fn enqueue(
        &mut self,
        descriptor: ExtensionDescriptor,
        manifest: DependencyManifest,
    ) -> LoadStage {
        let mode = resolve_info(&descriptor, self.registry.paths()).mode;
        let stage = if mode == DeploymentMode::MustUsePlugin {
            LoadStage::MustUse
        } else {
            LoadStage::Plugins
        };
        self.queue.push(Queued {
            stage,
            descriptor,
            manifest,
        });
        stage
    }

    /// Load everything queued for `stage`, in queue order.
    ///
    /// Flushing [`LoadStage::Plugins`] also loads must-use entries still
    /// queued (they go first) and then closes the loading window.
    pub fn flush(&mut self, stage: LoadStage) -> Vec<(String, bool)> {
        let queued = std::mem::take(&mut self.queue);
        let (mut due, rest): (Vec<_>, Vec<_>) = queued
            .into_iter()
            .partition(|q| stage == LoadStage::Plugins || q.stage == stage);
        self.queue = rest;

        // Stable: must-use entries keep their relative order.
        due.sort_by_key(|q| q.stage != LoadStage::MustUse);

        let mut results = Vec::with_capacity(due.len());
        for q in due {
            let slug = q.descriptor.slug.clone();
            let running = self.load(q.descriptor, &q.manifest);
            results.push((slug, running));
        }

        if stage == LoadStage::Plugins {
            self.close_loading();
        }
        results
    }

    /// Refuse further loads.
    pub fn close_loading(&mut self) {
        if !self.closed {
            tracing::debug!(loaded = self.registry.len(), "loading window closed");
        }
        self.closed = true;
    }

    pub fn is_loading_closed(&self) -> bool {
        self.closed
    }

    // ── Reports and notices ─────────────────────────────────────────

    pub fn report(&self, slug: &str) -> Option<&DiagnosticReport> {
        self.reports.get(slug)
    }

    pub fn reports(&self) -> impl Iterator<Item = (&str, &DiagnosticReport)> {
        self.reports.iter().map(|(slug, report)| (slug.as_str(), report))
    }

    fn actor_may_manage(&self) -> bool {
        self.host.is_admin() && self.host.actor_can(caps::ACTIVATE_PLUGINS)
    }

    /// Admin notices for every extension that failed its checks.
    ///
    /// Empty unless the actor may activate plugins.
    pub fn notices(&self) -> Vec<DiagnosticNotice> {
        if !self.actor_may_manage() {
            return Vec::new();
        }
        let presenter =
            DiagnosticsPresenter::new(self.host.as_ref(), self.packages.as_ref(), &self.config);
        self.reports
            .values()
            .map(|report| presenter.present(report))
            .collect()
    }

    /// Ask the host to deactivate standalone plugins that failed their
    /// checks. Returns the deactivated basenames.
    pub fn deactivate_invalid(&mut self) -> Vec<String> {
        if !self.actor_may_manage() {
            return Vec::new();
        }

        let invalid: Vec<(String, String)> = self
            .registry
            .unresolved()
            .into_iter()
            .filter(|info| info.mode.is_standalone())
            .map(|info| (info.slug.clone(), info.basename.clone()))
            .collect();

        for (slug, basename) in &invalid {
            self.registry.forget_basename(slug);
            self.host.deactivate_plugin(basename);
            tracing::info!(
                slug = %slug,
                basename = %basename,
                "deactivated extension with unmet dependencies"
            );
        }
        invalid.into_iter().map(|(_, basename)| basename).collect()
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    fn coordinator(&self) -> LifecycleCoordinator<'_, dyn Host> {
        LifecycleCoordinator::new(
            self.host.as_ref(),
            &self.registry,
            &self.routes,
            &self.config.option_key,
        )
    }

    /// Handle a lifecycle event fired by the host.
    pub fn dispatch(&self, event: &LifecycleEvent) -> Option<LifecycleOutcome> {
        self.coordinator().dispatch(event)
    }

    /// Handle the host's current event, for hosts that only expose its name.
    pub fn dispatch_current(&self, network_wide: bool) -> Option<LifecycleOutcome> {
        let name = self.host.current_event_name()?;
        let event = LifecycleEvent::from_hook_name(&name, network_wide)?;
        self.dispatch(&event)
    }

    pub fn activate(&self, slug: &str, network_wide: bool) -> Option<LifecycleOutcome> {
        self.coordinator().activate(slug, network_wide)
    }

    pub fn deactivate(&self, slug: &str, network_wide: bool) -> Option<LifecycleOutcome> {
        self.coordinator().deactivate(slug, network_wide)
    }

    pub fn uninstall(&self, slug: &str) -> Option<LifecycleOutcome> {
        self.coordinator().uninstall(slug)
    }

    pub fn state(&self, slug: &str, scope: OptionScope) -> LifecycleState {
        self.coordinator().state(slug, scope)
    }

    // ── Translations ────────────────────────────────────────────────

    fn load_own_catalog(&self) -> bool {
        let domain = &self.config.text_domain;
        let file = catalog_file(domain, &self.host.locale());
        let local = format!("{}{file}", with_trailing_slash(&self.config.language_dir));
        if self.host.load_catalog(domain, &local) {
            return true;
        }
        let global = format!("{GLOBAL_PLUGIN_LANGUAGE_DIR}{file}");
        let loaded = self.host.load_catalog(domain, &global);
        if !loaded {
            tracing::debug!(domain = %domain, "no translation catalog for loader messages");
        }
        loaded
    }

    fn load_extension_catalog(&self, info: &ExtensionInfo) -> bool {
        let Some(domain) = info.textdomain.as_deref() else {
            return false;
        };
        let path = catalog_path(info, &self.host.paths(), &self.host.locale());
        let loaded = self.host.load_catalog(domain, &path);
        if !loaded {
            tracing::debug!(slug = %info.slug, path = %path, "translation catalog not loaded");
        }
        loaded
    }
}

fn catalog_file(domain: &str, locale: &str) -> String {
    format!("{domain}-{locale}.mo")
}

fn with_trailing_slash(dir: &str) -> String {
    if dir.is_empty() || dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{dir}/")
    }
}

/// Catalog location for an extension.
///
/// Absolute translation directories (themes, must-use) are used as is;
/// relative ones live under the plugin directory.
pub fn catalog_path(info: &ExtensionInfo, paths: &HostPaths, locale: &str) -> String {
    let domain = info.textdomain.as_deref().unwrap_or_default();
    let file = catalog_file(domain, locale);
    let dir = with_trailing_slash(&info.textdomain_dir);
    if Path::new(&dir).is_absolute() || dir.starts_with('/') {
        return format!("{dir}{file}");
    }
    let root = with_trailing_slash(&normalize_path(&paths.plugin_dir.to_string_lossy()));
    format!("{root}{dir}{file}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::Extension;
    use crate::host::{Environment, OfflineRegistry};
    use crate::memory::MemoryHost;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    impl Extension for Counting {
        fn run(&self, _info: &ExtensionInfo) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn paths() -> HostPaths {
        HostPaths {
            plugin_dir: "/srv/www/wp-content/plugins".into(),
            mu_plugin_dir: "/srv/www/wp-content/mu-plugins".into(),
            theme_dir: "/srv/www/wp-content/themes/base".into(),
            child_theme_dir: "/srv/www/wp-content/themes/base".into(),
        }
    }

    fn host() -> Arc<MemoryHost> {
        let host = MemoryHost::single_site();
        host.set_runtime_version("8.2.0");
        host.set_platform_version("6.4.2");
        host.set_paths(paths());
        host.set_locale("de_DE");
        Arc::new(host)
    }

    fn loader(host: &Arc<MemoryHost>) -> Loader {
        Loader::new(host.clone(), Arc::new(OfflineRegistry), LoaderConfig::default())
    }

    fn descriptor(slug: &str, main_file: &str, runs: &Arc<AtomicUsize>) -> ExtensionDescriptor {
        let runs = runs.clone();
        ExtensionDescriptor::new(slug, slug.to_uppercase(), "1.0.0", main_file)
            .with_textdomain(slug)
            .with_factory(move |_| Arc::new(Counting(runs.clone())))
    }

    // ── Loading ─────────────────────────────────────────────────────

    #[test]
    fn test_load_runs_once_and_subscribes() {
        let host = host();
        let mut loader = loader(&host);
        let runs = Arc::new(AtomicUsize::new(0));
        let desc = descriptor("shop", "/srv/www/wp-content/plugins/shop/shop.php", &runs);

        assert!(loader.load(desc, &DependencyManifest::new()));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(loader.lookup("shop").unwrap().has_run());
        assert!(loader.report("shop").is_none());

        let subs = host.subscriptions();
        assert!(subs.contains("activate_shop/shop.php"));
        assert!(subs.contains("deactivate_shop/shop.php"));
        assert!(subs.contains("uninstall_shop/shop.php"));
    }

    #[test]
    fn test_load_duplicate_slug_refused_without_report() {
        let host = host();
        let mut loader = loader(&host);
        let runs = Arc::new(AtomicUsize::new(0));
        assert!(loader.load(
            descriptor("shop", "/srv/www/wp-content/plugins/shop/shop.php", &runs),
            &DependencyManifest::new()
        ));
        let err = loader
            .try_load(
                descriptor("shop", "/srv/www/wp-content/plugins/other/other.php", &runs),
                &DependencyManifest::new(),
            )
            .unwrap_err();
        assert!(matches!(err, LoaderError::DuplicateSlug(_)));
        assert!(loader.report("shop").is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_checks_store_report() {
        let host = host();
        let mut loader = loader(&host);
        let runs = Arc::new(AtomicUsize::new(0));
        let manifest = DependencyManifest::new().requires_callable("missing_fn");
        assert!(!loader.load(
            descriptor("shop", "/srv/www/wp-content/plugins/shop/shop.php", &runs),
            &manifest
        ));
        assert!(loader.lookup("shop").is_none());
        assert_eq!(loader.report("shop").unwrap().callable_errors, vec!["missing_fn"]);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(host.subscriptions().is_empty());
    }

    // ── Stages ──────────────────────────────────────────────────────

    #[test]
    fn test_flush_orders_must_use_first_and_closes() {
        let host = host();
        let mut loader = loader(&host);
        let runs = Arc::new(AtomicUsize::new(0));

        let plugin = descriptor("shop", "/srv/www/wp-content/plugins/shop/shop.php", &runs);
        let mu = descriptor("guard", "/srv/www/wp-content/mu-plugins/guard/guard.php", &runs);
        assert_eq!(loader.enqueue(plugin, DependencyManifest::new()), LoadStage::Plugins);
        assert_eq!(loader.enqueue(mu, DependencyManifest::new()), LoadStage::MustUse);

        let results = loader.flush(LoadStage::Plugins);
        assert_eq!(
            results,
            vec![("guard".to_string(), true), ("shop".to_string(), true)]
        );
        assert!(loader.is_loading_closed());

        let late = descriptor("late", "/srv/www/wp-content/plugins/late/late.php", &runs);
        let err = loader.try_load(late, &DependencyManifest::new()).unwrap_err();
        assert!(matches!(err, LoaderError::LoadingClosed(_)));
    }

    #[test]
    fn test_flush_must_use_keeps_plugins_queued() {
        let host = host();
        let mut loader = loader(&host);
        let runs = Arc::new(AtomicUsize::new(0));
        loader.enqueue(
            descriptor("shop", "/srv/www/wp-content/plugins/shop/shop.php", &runs),
            DependencyManifest::new(),
        );
        loader.enqueue(
            descriptor("guard", "/srv/www/wp-content/mu-plugins/guard/guard.php", &runs),
            DependencyManifest::new(),
        );

        assert_eq!(loader.flush(LoadStage::MustUse), vec![("guard".to_string(), true)]);
        assert!(!loader.is_loading_closed());
        assert!(loader.lookup("shop").is_none());
        assert_eq!(loader.flush(LoadStage::Plugins), vec![("shop".to_string(), true)]);
    }

    // ── Admin phase ─────────────────────────────────────────────────

    #[test]
    fn test_deactivate_invalid_only_standalone() {
        let host = host();
        host.activate_plugin("shop/shop.php");
        let mut loader = loader(&host);
        let runs = Arc::new(AtomicUsize::new(0));
        let failing = DependencyManifest::new().requires_callable("missing_fn");

        loader.load(
            descriptor("shop", "/srv/www/wp-content/plugins/shop/shop.php", &runs),
            &failing,
        );
        loader.load(
            descriptor("guard", "/srv/www/wp-content/mu-plugins/guard/guard.php", &runs),
            &failing,
        );

        assert_eq!(loader.deactivate_invalid(), vec!["shop/shop.php"]);
        assert_eq!(host.deactivated(), vec!["shop/shop.php"]);
        assert!(host.active_plugins().is_empty());
        // A second pass has nothing left to do.
        assert!(loader.deactivate_invalid().is_empty());
    }

    #[test]
    fn test_admin_phase_requires_capability() {
        let host = host();
        host.revoke(caps::ACTIVATE_PLUGINS);
        let mut loader = loader(&host);
        let runs = Arc::new(AtomicUsize::new(0));
        loader.load(
            descriptor("shop", "/srv/www/wp-content/plugins/shop/shop.php", &runs),
            &DependencyManifest::new().requires_callable("missing_fn"),
        );
        assert!(loader.notices().is_empty());
        assert!(loader.deactivate_invalid().is_empty());
        assert!(host.deactivated().is_empty());
    }

    #[test]
    fn test_notices_cover_every_report() {
        let host = host();
        let mut loader = loader(&host);
        let runs = Arc::new(AtomicUsize::new(0));
        loader.load(
            descriptor("shop", "/srv/www/wp-content/plugins/shop/shop.php", &runs),
            &DependencyManifest::new().requires_runtime("9.0"),
        );
        let notices = loader.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].extension_name, "SHOP");
        assert_eq!(
            notices[0].records[0].message,
            "PHP is outdated. You are using version 8.2.0, but version 9.0 is required."
        );
    }

    // ── Translations ────────────────────────────────────────────────

    #[test]
    fn test_own_catalog_falls_back_to_global_dir() {
        let host = host();
        host.remove_catalog("languages/tenantgate-de_DE.mo");
        let _loader = loader(&host);
        assert_eq!(
            host.loaded_catalogs(),
            vec![
                ("tenantgate".to_string(), "languages/tenantgate-de_DE.mo".to_string()),
                (
                    "tenantgate".to_string(),
                    "languages/plugins/tenantgate-de_DE.mo".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_extension_catalog_paths_by_mode() {
        let host = host();
        let mut loader = loader(&host);
        let runs = Arc::new(AtomicUsize::new(0));
        loader.load(
            descriptor("shop", "/srv/www/wp-content/plugins/shop/shop.php", &runs),
            &DependencyManifest::new(),
        );
        loader.load(
            descriptor("guard", "/srv/www/wp-content/mu-plugins/guard/guard.php", &runs),
            &DependencyManifest::new(),
        );
        let paths: Vec<String> = host
            .loaded_catalogs()
            .into_iter()
            .skip(1)
            .map(|(_, path)| path)
            .collect();
        assert_eq!(
            paths,
            vec![
                "/srv/www/wp-content/plugins/shop/languages/shop-de_DE.mo",
                "/srv/www/wp-content/mu-plugins/guard/languages/guard-de_DE.mo",
            ]
        );
    }
}
