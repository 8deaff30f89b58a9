// Shared fixtures for integration tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tenantgate_core::{
    DependencyManifest, Extension, ExtensionDescriptor, ExtensionInfo, HookContext, HookError,
    HookResult, HostPaths, Loader, LoaderConfig, MemoryHost, OfflineRegistry, TenantId,
};

/// One recorded hook call: hook name and the tenant it ran on.
pub type Call = (&'static str, Option<TenantId>);

/// Extension that records every hook call and fails the configured ones.
#[derive(Default)]
pub struct RecordingExtension {
    pub calls: Mutex<Vec<Call>>,
    fail: Vec<Call>,
}

impl RecordingExtension {
    pub fn failing(fail: Vec<Call>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls of `hook`, in order.
    pub fn calls_of(&self, hook: &str) -> Vec<Option<TenantId>> {
        self.calls()
            .into_iter()
            .filter(|(h, _)| *h == hook)
            .map(|(_, tenant)| tenant)
            .collect()
    }

    fn record(&self, hook: &'static str, ctx: &HookContext) -> HookResult {
        self.calls.lock().unwrap().push((hook, ctx.tenant));
        if self.fail.contains(&(hook, ctx.tenant)) {
            return Err(HookError::new(hook, "requested failure"));
        }
        Ok(())
    }
}

impl Extension for RecordingExtension {
    fn run(&self, _info: &ExtensionInfo) {}

    fn install(&self, ctx: &HookContext) -> HookResult {
        self.record("install", ctx)
    }

    fn activate(&self, ctx: &HookContext) -> HookResult {
        self.record("activate", ctx)
    }

    fn deactivate(&self, ctx: &HookContext) -> HookResult {
        self.record("deactivate", ctx)
    }

    fn uninstall(&self, ctx: &HookContext) -> HookResult {
        self.record("uninstall", ctx)
    }

    fn network_install(&self, ctx: &HookContext) -> HookResult {
        self.record("network_install", ctx)
    }

    fn network_activate(&self, ctx: &HookContext) -> HookResult {
        self.record("network_activate", ctx)
    }

    fn network_deactivate(&self, ctx: &HookContext) -> HookResult {
        self.record("network_deactivate", ctx)
    }

    fn network_uninstall(&self, ctx: &HookContext) -> HookResult {
        self.record("network_uninstall", ctx)
    }
}

pub fn wp_paths() -> HostPaths {
    HostPaths {
        plugin_dir: "/srv/www/wp-content/plugins".into(),
        mu_plugin_dir: "/srv/www/wp-content/mu-plugins".into(),
        theme_dir: "/srv/www/wp-content/themes/base".into(),
        child_theme_dir: "/srv/www/wp-content/themes/base".into(),
    }
}

/// Host with versions that satisfy the default floors.
pub fn prepare(host: MemoryHost) -> Arc<MemoryHost> {
    host.set_runtime_version("8.2.0");
    host.set_platform_version("6.4.2");
    host.set_paths(wp_paths());
    Arc::new(host)
}

pub fn loader(host: &Arc<MemoryHost>) -> Loader {
    Loader::new(host.clone(), Arc::new(OfflineRegistry), LoaderConfig::default())
}

/// Descriptor whose factory hands out `extension`.
pub fn descriptor(slug: &str, extension: &Arc<RecordingExtension>) -> ExtensionDescriptor {
    let extension = extension.clone();
    ExtensionDescriptor::new(
        slug,
        slug.to_uppercase(),
        "1.0.0",
        format!("/srv/www/wp-content/plugins/{slug}/{slug}.php"),
    )
    .with_factory(move |_| -> Arc<dyn Extension> { extension.clone() })
}

/// Load `slug` with no requirements and return its recording extension.
pub fn load_recording(
    loader: &mut Loader,
    slug: &str,
    extension: RecordingExtension,
) -> Arc<RecordingExtension> {
    let extension = Arc::new(extension);
    assert!(loader.load(descriptor(slug, &extension), &DependencyManifest::new()));
    extension
}
