//! Lifecycle events and the typed dispatch table.
//!
//! The host names lifecycle events `{verb}_{basename}`. The loader does not
//! route by parsing names at call time; each extension's routes are added to
//! a [`DispatchTable`] when it registers, and the host hands back a typed
//! [`LifecycleEvent`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle verbs the host fires per extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleVerb {
    Activate,
    Deactivate,
    Uninstall,
}

/// All verbs, in subscription order.
pub const LIFECYCLE_VERBS: &[LifecycleVerb] = &[
    LifecycleVerb::Activate,
    LifecycleVerb::Deactivate,
    LifecycleVerb::Uninstall,
];

impl LifecycleVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Uninstall => "uninstall",
        }
    }
}

impl fmt::Display for LifecycleVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle event fired by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub verb: LifecycleVerb,
    pub basename: String,
    #[serde(default)]
    pub network_wide: bool,
}

impl LifecycleEvent {
    pub fn new(verb: LifecycleVerb, basename: impl Into<String>, network_wide: bool) -> Self {
        Self {
            verb,
            basename: basename.into(),
            network_wide,
        }
    }

    /// Host hook name for this event, e.g. `activate_shop/shop.php`.
    pub fn hook_name(&self) -> String {
        hook_name(self.verb, &self.basename)
    }

    /// Parse a host hook name such as `deactivate_shop/shop.php`.
    ///
    /// The verb is the text before the first underscore; the rest is the
    /// basename, which may itself contain underscores.
    pub fn from_hook_name(name: &str, network_wide: bool) -> Option<Self> {
        let (verb, basename) = name.split_once('_')?;
        let verb = LIFECYCLE_VERBS
            .iter()
            .copied()
            .find(|v| v.as_str() == verb)?;
        if basename.is_empty() {
            return None;
        }
        Some(Self::new(verb, basename, network_wide))
    }
}

/// Host hook name for `verb` on `basename`.
pub fn hook_name(verb: LifecycleVerb, basename: &str) -> String {
    format!("{}_{basename}", verb.as_str())
}

/// `(verb, basename)` → slug routes, built at registration time.
#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    routes: BTreeMap<(LifecycleVerb, String), String>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every lifecycle verb for `basename` to `slug`.
    pub fn subscribe(&mut self, slug: &str, basename: &str) {
        for verb in LIFECYCLE_VERBS {
            self.routes
                .insert((*verb, basename.to_string()), slug.to_string());
        }
    }

    /// Slug handling `event`, if one subscribed.
    pub fn resolve(&self, event: &LifecycleEvent) -> Option<&str> {
        self.routes
            .get(&(event.verb, event.basename.clone()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_name_roundtrip() {
        let event = LifecycleEvent::new(LifecycleVerb::Deactivate, "shop/shop.php", true);
        assert_eq!(event.hook_name(), "deactivate_shop/shop.php");
        let parsed = LifecycleEvent::from_hook_name(&event.hook_name(), true).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_from_hook_name_keeps_underscores_in_basename() {
        let event = LifecycleEvent::from_hook_name("uninstall_my_plugin/my_plugin.php", false)
            .unwrap();
        assert_eq!(event.verb, LifecycleVerb::Uninstall);
        assert_eq!(event.basename, "my_plugin/my_plugin.php");
    }

    #[test]
    fn test_from_hook_name_rejects_unknown() {
        assert!(LifecycleEvent::from_hook_name("init", false).is_none());
        assert!(LifecycleEvent::from_hook_name("upgrade_shop/shop.php", false).is_none());
        assert!(LifecycleEvent::from_hook_name("activate_", false).is_none());
    }

    #[test]
    fn test_dispatch_table_routes_all_verbs() {
        let mut table = DispatchTable::new();
        table.subscribe("shop", "shop/shop.php");
        assert_eq!(table.len(), LIFECYCLE_VERBS.len());

        for verb in LIFECYCLE_VERBS {
            let event = LifecycleEvent::new(*verb, "shop/shop.php", false);
            assert_eq!(table.resolve(&event), Some("shop"));
        }

        let other = LifecycleEvent::new(LifecycleVerb::Activate, "other/other.php", false);
        assert!(table.resolve(&other).is_none());
    }
}
