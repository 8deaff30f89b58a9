//! Scenario files: a host, the extensions that try to load, and the
//! lifecycle events fired afterwards.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tenantgate_core::{
    DependencyManifest, DeploymentMode, DiagnosticNotice, DiagnosticReport, Extension,
    ExtensionDescriptor, ExtensionInfo, HookContext, HookError, HookResult, HostPaths,
    LifecycleOutcome, LifecycleState, LoadStage, Loader, LoaderConfig, MemoryHost, MemoryRegistry,
    OptionScope, TenantId,
};

use crate::error::SimError;

// ─── Scenario file ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub host: HostSetup,
    #[serde(default)]
    pub registry: Vec<PackageEntry>,
    #[serde(default)]
    pub extensions: Vec<ScenarioExtension>,
    #[serde(default)]
    pub events: Vec<ScenarioEvent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostSetup {
    /// More than one tenant makes the host multi-tenant.
    pub tenants: Vec<u64>,
    pub runtime_version: Option<String>,
    pub platform_version: Option<String>,
    pub callables: Vec<String>,
    pub active_plugins: Vec<String>,
    pub network_active_plugins: Vec<String>,
    pub locale: String,
    pub revoked_capabilities: Vec<String>,
    pub paths: HostPaths,
    pub local_metadata: Vec<PackageEntry>,
}

impl Default for HostSetup {
    fn default() -> Self {
        Self {
            tenants: vec![1],
            runtime_version: None,
            platform_version: None,
            callables: Vec::new(),
            active_plugins: Vec::new(),
            network_active_plugins: Vec::new(),
            locale: "en_US".to_string(),
            revoked_capabilities: Vec::new(),
            paths: HostPaths {
                plugin_dir: "/srv/www/wp-content/plugins".into(),
                mu_plugin_dir: "/srv/www/wp-content/mu-plugins".into(),
                theme_dir: "/srv/www/wp-content/themes/base".into(),
                child_theme_dir: "/srv/www/wp-content/themes/base".into(),
            },
            local_metadata: Vec::new(),
        }
    }
}

/// A package: local header data (keyed by basename) or a registry entry
/// (keyed by slug).
#[derive(Debug, Clone, Deserialize)]
pub struct PackageEntry {
    pub id: String,
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioExtension {
    #[serde(flatten)]
    pub descriptor: ExtensionDescriptor,
    #[serde(default)]
    pub dependencies: DependencyManifest,
    /// Hooks that fail, as `hook` or `hook@tenant`.
    #[serde(default)]
    pub failing_hooks: Vec<FailingHook>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioEvent {
    /// Host hook name, e.g. `activate_shop/shop.php`.
    pub hook: String,
    #[serde(default)]
    pub network_wide: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct FailingHook {
    pub hook: String,
    pub tenant: Option<TenantId>,
}

impl TryFrom<String> for FailingHook {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (hook, tenant) = match value.split_once('@') {
            Some((hook, tenant)) => {
                let id = tenant
                    .parse::<u64>()
                    .map_err(|_| format!("invalid tenant in '{value}'"))?;
                (hook, Some(TenantId(id)))
            }
            None => (value.as_str(), None),
        };
        if hook.trim().is_empty() {
            return Err(format!("missing hook name in '{value}'"));
        }
        Ok(Self {
            hook: hook.to_string(),
            tenant,
        })
    }
}

impl Scenario {
    pub fn parse(toml_str: &str) -> Result<Self, SimError> {
        let scenario: Scenario = toml::from_str(toml_str)?;
        if scenario.host.tenants.is_empty() {
            return Err(SimError::Scenario("host.tenants must not be empty".into()));
        }
        Ok(scenario)
    }

    pub fn from_path(path: &Path) -> Result<Self, SimError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    fn build_host(&self) -> MemoryHost {
        let setup = &self.host;
        let host = match setup.tenants.as_slice() {
            [only] => MemoryHost::single_tenant(*only),
            ids => MemoryHost::network(ids),
        };
        if let Some(version) = &setup.runtime_version {
            host.set_runtime_version(version);
        }
        if let Some(version) = &setup.platform_version {
            host.set_platform_version(version);
        }
        for callable in &setup.callables {
            host.add_callable(callable.as_str());
        }
        for basename in &setup.active_plugins {
            host.activate_plugin(basename);
        }
        for basename in &setup.network_active_plugins {
            host.network_activate_plugin(basename);
        }
        for package in &setup.local_metadata {
            host.set_local_metadata(&package.id, &package.name, &package.version);
        }
        for capability in &setup.revoked_capabilities {
            host.revoke(capability);
        }
        host.set_locale(&setup.locale);
        host.set_paths(setup.paths.clone());
        host
    }

    fn build_registry(&self) -> MemoryRegistry {
        let registry = MemoryRegistry::new();
        for package in &self.registry {
            registry.publish(&package.id, &package.name, &package.version);
        }
        registry
    }

    /// Load every extension, run the admin phase, then fire the events.
    pub fn run(&self, config: LoaderConfig) -> SimulationReport {
        let host = Arc::new(self.build_host());
        let mut loader = Loader::new(host.clone(), Arc::new(self.build_registry()), config);

        for entry in &self.extensions {
            let failing = entry.failing_hooks.clone();
            let descriptor = entry
                .descriptor
                .clone()
                .with_factory(move |_| Arc::new(ScriptedExtension::new(failing.clone())));
            loader.enqueue(descriptor, entry.dependencies.clone());
        }

        let mut loaded = loader.flush(LoadStage::MustUse);
        loaded.extend(loader.flush(LoadStage::Plugins));

        let reports = loader
            .reports()
            .map(|(slug, report)| (slug.to_string(), report.clone()))
            .collect();
        let notices = loader.notices();
        let deactivated = loader.deactivate_invalid();

        let mut outcomes = Vec::new();
        for event in &self.events {
            host.set_current_event(Some(&event.hook));
            match loader.dispatch_current(event.network_wide) {
                Some(outcome) => outcomes.push(outcome),
                None => tracing::warn!(hook = %event.hook, "event had no effect"),
            }
            host.set_current_event(None);
        }

        let states = loaded
            .iter()
            .filter(|(_, running)| *running)
            .map(|(slug, _)| {
                let state = ExtensionStates {
                    tenant: loader.state(slug, OptionScope::Tenant),
                    network: loader.state(slug, OptionScope::Network),
                };
                (slug.clone(), state)
            })
            .collect();

        SimulationReport {
            loaded: loaded.into_iter().collect(),
            reports,
            notices,
            deactivated,
            outcomes,
            states,
            tenant_switches: host.switch_log(),
        }
    }
}

// ─── Scripted extension ─────────────────────────────────────────────────

/// Extension whose hooks succeed unless the scenario says otherwise.
struct ScriptedExtension {
    failing: Vec<FailingHook>,
}

impl ScriptedExtension {
    fn new(failing: Vec<FailingHook>) -> Self {
        Self { failing }
    }

    fn outcome(&self, hook: &'static str, ctx: &HookContext) -> HookResult {
        let fails = self
            .failing
            .iter()
            .any(|f| f.hook == hook && f.tenant.map_or(true, |t| ctx.tenant == Some(t)));
        if fails {
            return Err(HookError::new(hook, "scripted failure"));
        }
        Ok(())
    }
}

impl Extension for ScriptedExtension {
    fn run(&self, info: &ExtensionInfo) {
        let standalone = info.mode == DeploymentMode::Plugin;
        tracing::info!(slug = %info.slug, standalone, "extension running");
    }

    fn install(&self, ctx: &HookContext) -> HookResult {
        self.outcome("install", ctx)
    }

    fn activate(&self, ctx: &HookContext) -> HookResult {
        self.outcome("activate", ctx)
    }

    fn deactivate(&self, ctx: &HookContext) -> HookResult {
        self.outcome("deactivate", ctx)
    }

    fn uninstall(&self, ctx: &HookContext) -> HookResult {
        self.outcome("uninstall", ctx)
    }

    fn network_install(&self, ctx: &HookContext) -> HookResult {
        self.outcome("network_install", ctx)
    }

    fn network_activate(&self, ctx: &HookContext) -> HookResult {
        self.outcome("network_activate", ctx)
    }

    fn network_deactivate(&self, ctx: &HookContext) -> HookResult {
        self.outcome("network_deactivate", ctx)
    }

    fn network_uninstall(&self, ctx: &HookContext) -> HookResult {
        self.outcome("network_uninstall", ctx)
    }
}

// ─── Output ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ExtensionStates {
    pub tenant: LifecycleState,
    pub network: LifecycleState,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Slug → whether the extension is running.
    pub loaded: BTreeMap<String, bool>,
    pub reports: BTreeMap<String, DiagnosticReport>,
    pub notices: Vec<DiagnosticNotice>,
    pub deactivated: Vec<String>,
    pub outcomes: Vec<LifecycleOutcome>,
    pub states: BTreeMap<String, ExtensionStates>,
    pub tenant_switches: Vec<TenantId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETWORK: &str = r#"
[host]
tenants = [1, 2, 3]
runtime_version = "8.2.0"
platform_version = "6.4.2"
callables = ["mb_strlen"]

[[extensions]]
slug = "shop"
name = "Shop"
version = "1.2.0"
main_file = "/srv/www/wp-content/plugins/shop/shop.php"
failing_hooks = ["install@2"]

[extensions.dependencies]
required_callables = ["mb_strlen"]

[[extensions]]
slug = "reports"
name = "Reports"
main_file = "/srv/www/wp-content/plugins/reports/reports.php"

[extensions.dependencies]
min_runtime_version = "9.0"
required_callables = ["missing_fn"]

[[events]]
hook = "activate_shop/shop.php"
network_wide = true
"#;

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn test_failing_hook_parse() {
        let hook = FailingHook::try_from("install@2".to_string()).unwrap();
        assert_eq!(hook.hook, "install");
        assert_eq!(hook.tenant, Some(TenantId(2)));
        assert!(FailingHook::try_from("install@x".to_string()).is_err());
        assert!(FailingHook::try_from("@2".to_string()).is_err());
        assert_eq!(FailingHook::try_from("uninstall".to_string()).unwrap().tenant, None);
    }

    #[test]
    fn test_parse_rejects_empty_tenants() {
        let err = Scenario::parse("[host]\ntenants = []\n").unwrap_err();
        assert!(matches!(err, SimError::Scenario(_)));
    }

    #[test]
    fn test_parse_defaults() {
        let scenario = Scenario::parse("").unwrap();
        assert_eq!(scenario.host.tenants, vec![1]);
        assert!(scenario.extensions.is_empty());
    }

    #[test]
    fn test_single_tenant_host_keeps_configured_id() {
        use tenantgate_core::host::TenantDirectory;

        let host = Scenario::parse("[host]\ntenants = [5]\n").unwrap().build_host();
        assert!(!host.is_multi_tenant());
        assert_eq!(host.current_tenant(), TenantId(5));

        let host = Scenario::parse("[host]\ntenants = [4, 7]\n").unwrap().build_host();
        assert!(host.is_multi_tenant());
        assert_eq!(host.current_tenant(), TenantId(4));
    }

    // ── Running ─────────────────────────────────────────────────────

    #[test]
    fn test_run_network_scenario() {
        let scenario = Scenario::parse(NETWORK).unwrap();
        let report = scenario.run(LoaderConfig::default());

        assert_eq!(report.loaded.get("shop"), Some(&true));
        assert_eq!(report.loaded.get("reports"), Some(&false));

        let failed = &report.reports["reports"];
        assert_eq!(failed.callable_errors, vec!["missing_fn"]);
        assert_eq!(failed.version_errors.len(), 1);
        assert_eq!(report.notices.len(), 1);
        assert_eq!(report.deactivated, vec!["reports/reports.php"]);

        assert_eq!(report.outcomes.len(), 1);
        let outcome = &report.outcomes[0];
        assert!(outcome.network_wide);
        assert!(!outcome.status);
        assert_eq!(outcome.tenants, vec![TenantId(1), TenantId(2), TenantId(3)]);

        // The aggregate failed, so the network record says not installed.
        assert_eq!(report.states["shop"].network, LifecycleState::NotInstalled);
        assert_eq!(report.tenant_switches.last(), Some(&TenantId(1)));
    }
}
