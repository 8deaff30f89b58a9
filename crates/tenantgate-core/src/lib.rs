//! Tenantgate
//!
//! Dependency gating and lifecycle coordination for CMS extensions.
//! Extensions declare the runtime, platform, callables and sibling
//! extensions they need; the loader only runs those whose requirements are
//! met and explains the rest through admin notices. Install, activation,
//! deactivation and uninstall hooks are fanned out over one tenant or every
//! tenant of a network, with install state tracked per tenant and the
//! tenant context always restored afterwards.
//!
//! The host application is reached only through the traits in [`host`].

pub mod config;
pub mod dependency;
pub mod descriptor;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod extension;
pub mod host;
pub mod lifecycle;
pub mod loader;
pub mod memory;
pub mod registry;
pub mod registry_client;
pub mod version;

pub use config::LoaderConfig;
pub use dependency::{DependencyChecker, DependencyKind, DiagnosticReport, VersionError};
pub use descriptor::{
    CallableRef, DependencyManifest, DeploymentMode, ExtensionDescriptor, ExtensionFile,
    RequiredExtensions,
};
pub use diagnostics::{DiagnosticNotice, DiagnosticRecord, DiagnosticsPresenter};
pub use error::{HookError, LoaderError};
pub use events::{DispatchTable, LifecycleEvent, LifecycleVerb};
pub use extension::{
    Extension, ExtensionFactory, ExtensionInfo, ExtensionInstance, HookContext, HookResult,
};
pub use host::{
    Host, HostPaths, OfflineRegistry, OptionScope, PackageKind, PackageRegistry, TenantId,
};
pub use lifecycle::{LifecycleCoordinator, LifecycleOutcome, LifecycleState, TenantContext};
pub use loader::{LoadStage, Loader};
pub use memory::{MemoryHost, MemoryRegistry};
pub use registry::PluginRegistry;
pub use registry_client::HttpPackageRegistry;
pub use version::{DottedVersion, GateFailure};
