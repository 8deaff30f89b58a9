//! Services consumed from the host application.
//!
//! The loader never talks to the CMS directly. Everything it needs is one
//! of the traits below; [`Host`] is the union the loader is built against.
//! The package registry is injected separately because its production
//! implementation is a remote client.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::descriptor::CallableRef;
use crate::events::LifecycleVerb;

/// Identifier of one tenant ("blog") in a multi-tenant deployment.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TenantId(pub u64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which option table a value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionScope {
    /// Options of the currently entered tenant.
    Tenant,
    /// Network-wide options shared by every tenant.
    Network,
}

/// Kind of package a metadata lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    Plugin,
    Theme,
}

/// Header data of an installed package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMetadata {
    pub name: String,
    pub version: String,
}

/// Package data from the remote registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMetadata {
    pub slug: String,
    pub name: String,
    pub version: String,
}

/// Filesystem roots the host loads extensions from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPaths {
    pub plugin_dir: PathBuf,
    pub mu_plugin_dir: PathBuf,
    /// Directory of the active parent theme.
    pub theme_dir: PathBuf,
    /// Directory of the active child theme; equal to `theme_dir` when none.
    pub child_theme_dir: PathBuf,
}

/// Event subscription on the host's hook system.
pub trait EventDispatcher: Send + Sync {
    /// Ask the host to route `{verb}_{basename}` to the loader's dispatch.
    fn on_lifecycle(&self, verb: LifecycleVerb, basename: &str);

    /// Name of the event currently being fired, if any.
    fn current_event_name(&self) -> Option<String>;
}

/// The host's persistent key-value option store.
pub trait OptionStore: Send + Sync {
    fn get_option(&self, key: &str, scope: OptionScope) -> Option<serde_json::Value>;

    fn set_option(&self, key: &str, scope: OptionScope, value: serde_json::Value);

    fn delete_option(&self, key: &str, scope: OptionScope);
}

/// The host's tenant directory and "current tenant" pointer.
pub trait TenantDirectory: Send + Sync {
    fn is_multi_tenant(&self) -> bool;

    fn list_tenants(&self) -> Vec<TenantId>;

    fn current_tenant(&self) -> TenantId;

    /// Point the host at `id`; tenant-scoped options now resolve there.
    fn enter_tenant(&self, id: TenantId);

    /// Return the host to `id` after a switch.
    fn exit_to(&self, id: TenantId);
}

/// Reads package headers from disk.
pub trait MetadataReader: Send + Sync {
    fn read_local_metadata(&self, identifier: &str, kind: PackageKind) -> Option<LocalMetadata>;
}

/// Remote package registry. One attempt, no retry; any failure is `None`.
pub trait PackageRegistry: Send + Sync {
    fn fetch_remote_metadata(&self, identifier: &str, kind: PackageKind) -> Option<RemoteMetadata>;
}

/// Translation catalog loading.
pub trait LocaleLoader: Send + Sync {
    fn locale(&self) -> String;

    fn load_catalog(&self, domain: &str, path: &str) -> bool;
}

/// Capability checks for the current actor.
pub trait Permissions: Send + Sync {
    fn actor_can(&self, capability: &str) -> bool;
}

/// Runtime facts about the host installation.
pub trait Environment: Send + Sync {
    fn runtime_version(&self) -> Option<String>;

    /// Read from the host's process-wide version global.
    fn platform_version(&self) -> Option<String>;

    fn paths(&self) -> HostPaths;

    fn is_callable(&self, callable: &CallableRef) -> bool;

    /// Basenames active on the current tenant.
    fn active_plugins(&self) -> Vec<String>;

    /// Basenames activated network-wide.
    fn network_active_plugins(&self) -> BTreeSet<String>;

    /// Whether the request is an admin request.
    fn is_admin(&self) -> bool;

    /// Deactivate a plugin by basename.
    fn deactivate_plugin(&self, basename: &str);
}

/// Everything the loader needs from the host except the remote registry.
pub trait Host:
    EventDispatcher
    + OptionStore
    + TenantDirectory
    + MetadataReader
    + LocaleLoader
    + Permissions
    + Environment
{
}

impl<T> Host for T where
    T: EventDispatcher
        + OptionStore
        + TenantDirectory
        + MetadataReader
        + LocaleLoader
        + Permissions
        + Environment
{
}

/// Registry stand-in for hosts without remote access.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRegistry;

impl PackageRegistry for OfflineRegistry {
    fn fetch_remote_metadata(
        &self,
        _identifier: &str,
        _kind: PackageKind,
    ) -> Option<RemoteMetadata> {
        None
    }
}

/// Capability names checked by the loader.
pub mod caps {
    pub const ACTIVATE_PLUGINS: &str = "activate_plugins";
    pub const INSTALL_PLUGINS: &str = "install_plugins";
    pub const UPDATE_PLUGINS: &str = "update_plugins";
}
