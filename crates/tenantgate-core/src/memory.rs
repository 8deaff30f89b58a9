//! In-memory host used by tests and the scenario simulator.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use crate::descriptor::CallableRef;
use crate::events::{hook_name, LifecycleVerb};
use crate::host::{
    caps, EventDispatcher, Environment, HostPaths, LocalMetadata, LocaleLoader, MetadataReader,
    OptionScope, OptionStore, PackageKind, PackageRegistry, Permissions, RemoteMetadata,
    TenantDirectory, TenantId,
};

#[derive(Debug, Default)]
struct State {
    multi_tenant: bool,
    tenants: Vec<TenantId>,
    current: TenantId,
    switches: Vec<TenantId>,

    tenant_options: HashMap<TenantId, BTreeMap<String, Value>>,
    network_options: BTreeMap<String, Value>,

    runtime_version: Option<String>,
    platform_version: Option<String>,
    paths: HostPaths,
    callables: BTreeSet<String>,
    active: HashMap<TenantId, Vec<String>>,
    network_active: BTreeSet<String>,
    deactivated: Vec<String>,
    local_metadata: BTreeMap<(PackageKind, String), LocalMetadata>,

    subscriptions: BTreeSet<String>,
    current_event: Option<String>,

    locale: String,
    catalogs: Vec<(String, String)>,
    missing_catalogs: BTreeSet<String>,

    capabilities: BTreeSet<String>,
    admin: bool,
}

/// A complete [`Host`](crate::host::Host) kept in memory.
///
/// The actor starts with every capability the loader checks and the
/// request counts as an admin request.
#[derive(Debug)]
pub struct MemoryHost {
    state: Mutex<State>,
}

impl MemoryHost {
    fn with_tenants(multi_tenant: bool, tenants: Vec<TenantId>) -> Self {
        let current = tenants.first().copied().unwrap_or(TenantId(1));
        let state = State {
            multi_tenant,
            tenants,
            current,
            locale: "en_US".to_string(),
            capabilities: [
                caps::ACTIVATE_PLUGINS,
                caps::INSTALL_PLUGINS,
                caps::UPDATE_PLUGINS,
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            admin: true,
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// A single-site host with tenant 1 only.
    pub fn single_site() -> Self {
        Self::single_tenant(1)
    }

    /// A single-site host whose only tenant is `id`.
    pub fn single_tenant(id: u64) -> Self {
        Self::with_tenants(false, vec![TenantId(id)])
    }

    /// A multi-tenant host; the first id is the current tenant.
    pub fn network(ids: &[u64]) -> Self {
        Self::with_tenants(true, ids.iter().copied().map(TenantId).collect())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Environment setup ───────────────────────────────────────────

    pub fn set_runtime_version(&self, version: &str) {
        self.lock().runtime_version = Some(version.to_string());
    }

    pub fn set_platform_version(&self, version: &str) {
        self.lock().platform_version = Some(version.to_string());
    }

    pub fn set_paths(&self, paths: HostPaths) {
        self.lock().paths = paths;
    }

    /// Make a callable resolvable, by its display name (`Owner::member`).
    pub fn add_callable(&self, callable: impl Into<CallableRef>) {
        let name = callable.into().display_name();
        self.lock().callables.insert(name);
    }

    /// Mark `basename` active on the current tenant.
    pub fn activate_plugin(&self, basename: &str) {
        let mut state = self.lock();
        let current = state.current;
        let active = state.active.entry(current).or_default();
        if !active.iter().any(|b| b == basename) {
            active.push(basename.to_string());
        }
    }

    pub fn network_activate_plugin(&self, basename: &str) {
        self.lock().network_active.insert(basename.to_string());
    }

    /// Header data of an installed plugin.
    pub fn set_local_metadata(&self, basename: &str, name: &str, version: &str) {
        self.lock().local_metadata.insert(
            (PackageKind::Plugin, basename.to_string()),
            LocalMetadata {
                name: name.to_string(),
                version: version.to_string(),
            },
        );
    }

    pub fn set_locale(&self, locale: &str) {
        self.lock().locale = locale.to_string();
    }

    /// Make catalog loads from `path` fail.
    pub fn remove_catalog(&self, path: &str) {
        self.lock().missing_catalogs.insert(path.to_string());
    }

    pub fn grant(&self, capability: &str) {
        self.lock().capabilities.insert(capability.to_string());
    }

    pub fn revoke(&self, capability: &str) {
        self.lock().capabilities.remove(capability);
    }

    pub fn set_admin(&self, admin: bool) {
        self.lock().admin = admin;
    }

    /// Name reported by [`EventDispatcher::current_event_name`].
    pub fn set_current_event(&self, name: Option<&str>) {
        self.lock().current_event = name.map(String::from);
    }

    // ── Inspection ──────────────────────────────────────────────────

    /// Every tenant switch in order, including returns.
    pub fn switch_log(&self) -> Vec<TenantId> {
        self.lock().switches.clone()
    }

    /// Hook names the loader subscribed to.
    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.lock().subscriptions.clone()
    }

    /// `(domain, path)` of every catalog load attempt.
    pub fn loaded_catalogs(&self) -> Vec<(String, String)> {
        self.lock().catalogs.clone()
    }

    /// Basenames deactivated through [`Environment::deactivate_plugin`].
    pub fn deactivated(&self) -> Vec<String> {
        self.lock().deactivated.clone()
    }

    /// An option of a specific tenant, without switching to it.
    pub fn tenant_option(&self, tenant: TenantId, key: &str) -> Option<Value> {
        self.lock()
            .tenant_options
            .get(&tenant)
            .and_then(|options| options.get(key))
            .cloned()
    }
}

impl EventDispatcher for MemoryHost {
    fn on_lifecycle(&self, verb: LifecycleVerb, basename: &str) {
        self.lock().subscriptions.insert(hook_name(verb, basename));
    }

    fn current_event_name(&self) -> Option<String> {
        self.lock().current_event.clone()
    }
}

impl OptionStore for MemoryHost {
    fn get_option(&self, key: &str, scope: OptionScope) -> Option<Value> {
        let state = self.lock();
        match scope {
            OptionScope::Network => state.network_options.get(key).cloned(),
            OptionScope::Tenant => state
                .tenant_options
                .get(&state.current)
                .and_then(|options| options.get(key))
                .cloned(),
        }
    }

    fn set_option(&self, key: &str, scope: OptionScope, value: Value) {
        let mut state = self.lock();
        match scope {
            OptionScope::Network => {
                state.network_options.insert(key.to_string(), value);
            }
            OptionScope::Tenant => {
                let current = state.current;
                state
                    .tenant_options
                    .entry(current)
                    .or_default()
                    .insert(key.to_string(), value);
            }
        }
    }

    fn delete_option(&self, key: &str, scope: OptionScope) {
        let mut state = self.lock();
        match scope {
            OptionScope::Network => {
                state.network_options.remove(key);
            }
            OptionScope::Tenant => {
                let current = state.current;
                if let Some(options) = state.tenant_options.get_mut(&current) {
                    options.remove(key);
                }
            }
        }
    }
}

impl TenantDirectory for MemoryHost {
    fn is_multi_tenant(&self) -> bool {
        self.lock().multi_tenant
    }

    fn list_tenants(&self) -> Vec<TenantId> {
        self.lock().tenants.clone()
    }

    fn current_tenant(&self) -> TenantId {
        self.lock().current
    }

    fn enter_tenant(&self, id: TenantId) {
        let mut state = self.lock();
        state.current = id;
        state.switches.push(id);
    }

    fn exit_to(&self, id: TenantId) {
        let mut state = self.lock();
        state.current = id;
        state.switches.push(id);
    }
}

impl MetadataReader for MemoryHost {
    fn read_local_metadata(&self, identifier: &str, kind: PackageKind) -> Option<LocalMetadata> {
        self.lock()
            .local_metadata
            .get(&(kind, identifier.to_string()))
            .cloned()
    }
}

impl LocaleLoader for MemoryHost {
    fn locale(&self) -> String {
        self.lock().locale.clone()
    }

    fn load_catalog(&self, domain: &str, path: &str) -> bool {
        let mut state = self.lock();
        state.catalogs.push((domain.to_string(), path.to_string()));
        !state.missing_catalogs.contains(path)
    }
}

impl Permissions for MemoryHost {
    fn actor_can(&self, capability: &str) -> bool {
        self.lock().capabilities.contains(capability)
    }
}

impl Environment for MemoryHost {
    fn runtime_version(&self) -> Option<String> {
        self.lock().runtime_version.clone()
    }

    fn platform_version(&self) -> Option<String> {
        self.lock().platform_version.clone()
    }

    fn paths(&self) -> HostPaths {
        self.lock().paths.clone()
    }

    fn is_callable(&self, callable: &CallableRef) -> bool {
        self.lock().callables.contains(&callable.display_name())
    }

    fn active_plugins(&self) -> Vec<String> {
        let state = self.lock();
        state.active.get(&state.current).cloned().unwrap_or_default()
    }

    fn network_active_plugins(&self) -> BTreeSet<String> {
        self.lock().network_active.clone()
    }

    fn is_admin(&self) -> bool {
        self.lock().admin
    }

    fn deactivate_plugin(&self, basename: &str) {
        let mut state = self.lock();
        let current = state.current;
        if let Some(active) = state.active.get_mut(&current) {
            active.retain(|b| b != basename);
        }
        state.network_active.remove(basename);
        state.deactivated.push(basename.to_string());
    }
}

/// Package registry answering from a fixed table.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    packages: Mutex<BTreeMap<(PackageKind, String), RemoteMetadata>>,
    lookups: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a plugin under `slug`.
    pub fn publish(&self, slug: &str, name: &str, version: &str) {
        self.packages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                (PackageKind::Plugin, slug.to_string()),
                RemoteMetadata {
                    slug: slug.to_string(),
                    name: name.to_string(),
                    version: version.to_string(),
                },
            );
    }

    /// Number of lookups served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl PackageRegistry for MemoryRegistry {
    fn fetch_remote_metadata(&self, identifier: &str, kind: PackageKind) -> Option<RemoteMetadata> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.packages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(kind, identifier.to_string()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Tenants ─────────────────────────────────────────────────────

    #[test]
    fn test_single_tenant_keeps_its_id() {
        let host = MemoryHost::single_tenant(5);
        assert!(!host.is_multi_tenant());
        assert_eq!(host.current_tenant(), TenantId(5));
        assert_eq!(host.list_tenants(), vec![TenantId(5)]);
        assert_eq!(MemoryHost::single_site().current_tenant(), TenantId(1));
    }

    #[test]
    fn test_network_without_ids_falls_back_to_first_tenant() {
        let host = MemoryHost::network(&[]);
        assert!(host.is_multi_tenant());
        assert_eq!(host.current_tenant(), TenantId(1));
        assert_eq!(TenantId::default(), TenantId(0));
    }

    #[test]
    fn test_tenant_options_follow_current_tenant() {
        let host = MemoryHost::network(&[1, 2]);
        host.set_option("k", OptionScope::Tenant, Value::from(1));
        host.enter_tenant(TenantId(2));
        assert!(host.get_option("k", OptionScope::Tenant).is_none());
        host.set_option("k", OptionScope::Network, Value::from(2));
        host.exit_to(TenantId(1));
        assert_eq!(host.get_option("k", OptionScope::Tenant), Some(Value::from(1)));
        assert_eq!(host.get_option("k", OptionScope::Network), Some(Value::from(2)));
        assert_eq!(host.switch_log(), vec![TenantId(2), TenantId(1)]);
    }

    #[test]
    fn test_deactivate_plugin_clears_both_lists() {
        let host = MemoryHost::network(&[1]);
        host.activate_plugin("a/a.php");
        host.network_activate_plugin("a/a.php");
        host.deactivate_plugin("a/a.php");
        assert!(host.active_plugins().is_empty());
        assert!(host.network_active_plugins().is_empty());
        assert_eq!(host.deactivated(), vec!["a/a.php"]);
    }

    #[test]
    fn test_callables_match_by_display_name() {
        let host = MemoryHost::single_site();
        host.add_callable(CallableRef::static_member("Cart", "total"));
        assert!(host.is_callable(&CallableRef::from("Cart::total".to_string())));
        assert!(!host.is_callable(&CallableRef::function("total")));
    }

    #[test]
    fn test_memory_registry_counts_lookups() {
        let registry = MemoryRegistry::new();
        registry.publish("forms", "Forms", "2.0");
        assert_eq!(
            registry
                .fetch_remote_metadata("forms", PackageKind::Plugin)
                .map(|m| m.version),
            Some("2.0".to_string())
        );
        assert!(registry.fetch_remote_metadata("forms", PackageKind::Theme).is_none());
        assert_eq!(registry.lookups(), 2);
    }
}
