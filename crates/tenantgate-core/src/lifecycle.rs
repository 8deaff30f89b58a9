//! Install / activate / deactivate / uninstall fan-out across tenants.
//!
//! Install state is kept in the host option store under one key per scope:
//! a JSON object mapping slug → bool. The tenant-scoped object says whether
//! the extension's `install` hook succeeded on that tenant; the
//! network-scoped object exists only for network-activated extensions and
//! holds the aggregate of `network_install` and every tenant's install.
//!
//! A `true` tenant record suppresses re-running `install`; a `false` record
//! (the install hook failed) lets the next activation retry it. Any network
//! record, whatever its value, means `network_install` already ran.
//! Deactivation never touches records. Uninstall picks its scope from the
//! presence of a network record and always drops that record afterwards.
//!
//! Hook failures are logged and folded into the outcome; they never abort
//! the walk over the remaining tenants.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::descriptor::DeploymentMode;
use crate::events::{DispatchTable, LifecycleEvent, LifecycleVerb};
use crate::extension::{ExtensionInstance, HookContext, HookResult};
use crate::host::{Host, OptionScope, OptionStore, TenantDirectory, TenantId};
use crate::registry::PluginRegistry;

// ─── Tenant context ─────────────────────────────────────────────────────

/// Stack of tenants switched away from during one fan-out.
///
/// Dropping the guard restores the tenant that was current before the
/// first switch. Deeper switches are discarded, not unwound one by one.
pub struct TenantContext<'a, T: TenantDirectory + ?Sized> {
    tenants: &'a T,
    stack: Vec<TenantId>,
}

impl<'a, T: TenantDirectory + ?Sized> TenantContext<'a, T> {
    pub fn new(tenants: &'a T) -> Self {
        Self {
            tenants,
            stack: Vec::new(),
        }
    }

    /// Switch to `id`, remembering the tenant we came from.
    pub fn enter(&mut self, id: TenantId) {
        self.stack.push(self.tenants.current_tenant());
        self.tenants.enter_tenant(id);
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Collapse the stack to its base entry and return there.
    ///
    /// Returns false when nothing was switched.
    pub fn restore_original_tenant(&mut self) -> bool {
        let Some(&original) = self.stack.first() else {
            return false;
        };
        self.stack.clear();
        self.tenants.exit_to(original);
        true
    }
}

impl<T: TenantDirectory + ?Sized> Drop for TenantContext<'_, T> {
    fn drop(&mut self) {
        self.restore_original_tenant();
    }
}

// ─── Install records ────────────────────────────────────────────────────

fn read_records<S: OptionStore + ?Sized>(
    store: &S,
    key: &str,
    scope: OptionScope,
) -> BTreeMap<String, bool> {
    let Some(value) = store.get_option(key, scope) else {
        return BTreeMap::new();
    };
    match serde_json::from_value(value) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(key = %key, ?scope, "discarding malformed install records: {e}");
            BTreeMap::new()
        }
    }
}

fn write_records<S: OptionStore + ?Sized>(
    store: &S,
    key: &str,
    scope: OptionScope,
    records: &BTreeMap<String, bool>,
) {
    if records.is_empty() {
        store.delete_option(key, scope);
        return;
    }
    match serde_json::to_value(records) {
        Ok(value) => store.set_option(key, scope, value),
        Err(e) => tracing::error!(key = %key, ?scope, "failed to encode install records: {e}"),
    }
}

// ─── Outcome and state ──────────────────────────────────────────────────

/// What one lifecycle operation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleOutcome {
    pub verb: LifecycleVerb,
    pub slug: String,
    pub network_wide: bool,
    /// Tenants entered during the fan-out, in visit order.
    pub tenants: Vec<TenantId>,
    /// False if any hook invoked by the operation failed.
    pub status: bool,
}

impl LifecycleOutcome {
    fn new(verb: LifecycleVerb, slug: &str, network_wide: bool) -> Self {
        Self {
            verb,
            slug: slug.to_string(),
            network_wide,
            tenants: Vec::new(),
            status: true,
        }
    }
}

/// Install/activation state of an extension in one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    /// The loader does not know the slug.
    Uninitialized,
    NotInstalled,
    InstalledInactive,
    InstalledActive,
}

// ─── Coordinator ────────────────────────────────────────────────────────

/// Runs lifecycle operations for registered extensions.
pub struct LifecycleCoordinator<'a, H: Host + ?Sized> {
    host: &'a H,
    registry: &'a PluginRegistry,
    routes: &'a DispatchTable,
    option_key: &'a str,
}

impl<'a, H: Host + ?Sized> LifecycleCoordinator<'a, H> {
    pub fn new(
        host: &'a H,
        registry: &'a PluginRegistry,
        routes: &'a DispatchTable,
        option_key: &'a str,
    ) -> Self {
        Self {
            host,
            registry,
            routes,
            option_key,
        }
    }

    /// Route a host lifecycle event to its operation.
    ///
    /// Returns `None` for events no loaded extension subscribed to.
    pub fn dispatch(&self, event: &LifecycleEvent) -> Option<LifecycleOutcome> {
        let Some(slug) = self.routes.resolve(event) else {
            tracing::debug!(event = %event.hook_name(), "no extension subscribed to event");
            return None;
        };
        match event.verb {
            LifecycleVerb::Activate => self.activate(slug, event.network_wide),
            LifecycleVerb::Deactivate => self.deactivate(slug, event.network_wide),
            LifecycleVerb::Uninstall => self.uninstall(slug),
        }
    }

    fn instance(&self, slug: &str) -> Option<ExtensionInstance> {
        let instance = self.registry.lookup_by_slug(slug);
        if instance.is_none() {
            tracing::warn!(slug = %slug, "lifecycle operation for unknown extension");
        }
        instance
    }

    fn records(&self, scope: OptionScope) -> BTreeMap<String, bool> {
        read_records(self.host, self.option_key, scope)
    }

    fn save_records(&self, scope: OptionScope, records: &BTreeMap<String, bool>) {
        write_records(self.host, self.option_key, scope, records);
    }

    /// Run `install` on the current tenant unless a successful install is
    /// recorded there. Returns the tenant's install state afterwards.
    fn install_on_current_tenant(&self, instance: &ExtensionInstance, ctx: &HookContext) -> bool {
        let slug = instance.slug();
        let mut records = self.records(OptionScope::Tenant);
        if records.get(slug) == Some(&true) {
            return true;
        }
        let ok = report_hook(slug, "install", ctx, instance.extension().install(ctx));
        records.insert(slug.to_string(), ok);
        self.save_records(OptionScope::Tenant, &records);
        ok
    }

    /// Install where needed, then activate.
    pub fn activate(&self, slug: &str, network_wide: bool) -> Option<LifecycleOutcome> {
        let instance = self.instance(slug)?;
        let ext = instance.extension();
        let mut outcome = LifecycleOutcome::new(LifecycleVerb::Activate, slug, network_wide);

        if !network_wide {
            let ctx = HookContext {
                tenant: Some(self.host.current_tenant()),
                network_wide: false,
            };
            let installed = self.install_on_current_tenant(&instance, &ctx);
            let activated = report_hook(slug, "activate", &ctx, ext.activate(&ctx));
            outcome.status = installed && activated;
            tracing::info!(slug = %slug, installed, "extension activated");
            return Some(outcome);
        }

        let network_ctx = HookContext {
            tenant: None,
            network_wide: true,
        };
        let mut network_records = self.records(OptionScope::Network);
        let mut installed = if network_records.contains_key(slug) {
            true
        } else {
            report_hook(
                slug,
                "network_install",
                &network_ctx,
                ext.network_install(&network_ctx),
            )
        };
        let mut status = installed;
        status &= report_hook(
            slug,
            "network_activate",
            &network_ctx,
            ext.network_activate(&network_ctx),
        );

        {
            let mut tenant_ctx = TenantContext::new(self.host);
            for tenant in self.host.list_tenants() {
                tenant_ctx.enter(tenant);
                outcome.tenants.push(tenant);
                tracing::debug!(slug = %slug, tenant = %tenant, "activating on tenant");

                let ctx = HookContext {
                    tenant: Some(tenant),
                    network_wide: true,
                };
                let tenant_installed = self.install_on_current_tenant(&instance, &ctx);
                installed &= tenant_installed;
                status &= tenant_installed;
                status &= report_hook(slug, "activate", &ctx, ext.activate(&ctx));
            }
            tenant_ctx.restore_original_tenant();
        }

        network_records.insert(slug.to_string(), installed);
        self.save_records(OptionScope::Network, &network_records);

        outcome.status = status;
        tracing::info!(
            slug = %slug,
            tenants = outcome.tenants.len(),
            installed,
            "extension network-activated"
        );
        Some(outcome)
    }

    /// Run deactivation hooks. Install records are left alone.
    pub fn deactivate(&self, slug: &str, network_wide: bool) -> Option<LifecycleOutcome> {
        let instance = self.instance(slug)?;
        let ext = instance.extension();
        let mut outcome = LifecycleOutcome::new(LifecycleVerb::Deactivate, slug, network_wide);

        if !network_wide {
            let ctx = HookContext {
                tenant: Some(self.host.current_tenant()),
                network_wide: false,
            };
            outcome.status = report_hook(slug, "deactivate", &ctx, ext.deactivate(&ctx));
            tracing::info!(slug = %slug, "extension deactivated");
            return Some(outcome);
        }

        let network_ctx = HookContext {
            tenant: None,
            network_wide: true,
        };
        let mut status = report_hook(
            slug,
            "network_deactivate",
            &network_ctx,
            ext.network_deactivate(&network_ctx),
        );

        {
            let mut tenant_ctx = TenantContext::new(self.host);
            for tenant in self.host.list_tenants() {
                tenant_ctx.enter(tenant);
                outcome.tenants.push(tenant);
                let ctx = HookContext {
                    tenant: Some(tenant),
                    network_wide: true,
                };
                status &= report_hook(slug, "deactivate", &ctx, ext.deactivate(&ctx));
            }
            tenant_ctx.restore_original_tenant();
        }

        outcome.status = status;
        tracing::info!(
            slug = %slug,
            tenants = outcome.tenants.len(),
            "extension network-deactivated"
        );
        Some(outcome)
    }

    /// Run uninstall hooks in the scope the extension was installed in.
    ///
    /// Tenant records are dropped where the hook succeeded. The network
    /// record is dropped once every tenant was visited.
    pub fn uninstall(&self, slug: &str) -> Option<LifecycleOutcome> {
        let instance = self.instance(slug)?;
        let ext = instance.extension();

        let mut network_records = self.records(OptionScope::Network);
        let network_wide = network_records.contains_key(slug);
        let mut outcome = LifecycleOutcome::new(LifecycleVerb::Uninstall, slug, network_wide);

        if !network_wide {
            let ctx = HookContext {
                tenant: Some(self.host.current_tenant()),
                network_wide: false,
            };
            let ok = report_hook(slug, "uninstall", &ctx, ext.uninstall(&ctx));
            if ok {
                let mut records = self.records(OptionScope::Tenant);
                if records.remove(slug).is_some() {
                    self.save_records(OptionScope::Tenant, &records);
                }
            }
            outcome.status = ok;
            tracing::info!(slug = %slug, status = ok, "extension uninstalled");
            return Some(outcome);
        }

        let network_ctx = HookContext {
            tenant: None,
            network_wide: true,
        };
        let mut status = report_hook(
            slug,
            "network_uninstall",
            &network_ctx,
            ext.network_uninstall(&network_ctx),
        );

        {
            let mut tenant_ctx = TenantContext::new(self.host);
            for tenant in self.host.list_tenants() {
                tenant_ctx.enter(tenant);
                outcome.tenants.push(tenant);

                let mut records = self.records(OptionScope::Tenant);
                if !records.contains_key(slug) {
                    continue;
                }
                let ctx = HookContext {
                    tenant: Some(tenant),
                    network_wide: true,
                };
                let ok = report_hook(slug, "uninstall", &ctx, ext.uninstall(&ctx));
                if ok {
                    records.remove(slug);
                    self.save_records(OptionScope::Tenant, &records);
                }
                status &= ok;
            }
            tenant_ctx.restore_original_tenant();
        }

        network_records.remove(slug);
        self.save_records(OptionScope::Network, &network_records);

        outcome.status = status;
        tracing::info!(
            slug = %slug,
            tenants = outcome.tenants.len(),
            status,
            "extension network-uninstalled"
        );
        Some(outcome)
    }

    /// State of `slug` on the current tenant or across the network.
    pub fn state(&self, slug: &str, scope: OptionScope) -> LifecycleState {
        let Some(info) = self.registry.info(slug) else {
            return LifecycleState::Uninitialized;
        };

        if self.records(scope).get(slug) != Some(&true) {
            return LifecycleState::NotInstalled;
        }

        let network_active = self.host.is_multi_tenant()
            && self.host.network_active_plugins().contains(&info.basename);
        let active = match scope {
            _ if info.mode == DeploymentMode::MustUsePlugin => true,
            OptionScope::Network => network_active,
            OptionScope::Tenant => {
                network_active || self.host.active_plugins().iter().any(|b| *b == info.basename)
            }
        };

        if active {
            LifecycleState::InstalledActive
        } else {
            LifecycleState::InstalledInactive
        }
    }
}

/// Log a failed hook and turn its result into a status flag.
fn report_hook(slug: &str, hook: &'static str, ctx: &HookContext, result: HookResult) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                slug = %slug,
                hook,
                tenant = ?ctx.tenant,
                network_wide = ctx.network_wide,
                "lifecycle hook failed: {e}"
            );
            false
        }
    }
}
