//! Extension registry: slug → record, plus a basename → slug reverse index.
//!
//! Every extension with a valid descriptor gets a record, whether or not its
//! dependency checks pass; only passing extensions get an instance attached.
//! The reverse index lets lifecycle events, which only carry the on-disk
//! identifier, find their slug.

use std::collections::BTreeMap;
use std::path::Path;

use crate::descriptor::{DeploymentMode, ExtensionDescriptor};
use crate::error::LoaderError;
use crate::extension::{ExtensionFactory, ExtensionInfo, ExtensionInstance};
use crate::host::HostPaths;

/// One registered extension.
struct ExtensionRecord {
    info: ExtensionInfo,
    factory: ExtensionFactory,
    instance: Option<ExtensionInstance>,
}

/// Registry of every extension that asked to load.
pub struct PluginRegistry {
    paths: HostPaths,
    records: BTreeMap<String, ExtensionRecord>,
    /// Basename → slug.
    basenames: BTreeMap<String, String>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("paths", &self.paths)
            .field("slugs", &self.records.keys().collect::<Vec<_>>())
            .field("basenames", &self.basenames)
            .finish()
    }
}

// ─── Path helpers ───────────────────────────────────────────────────────

/// Forward slashes, no duplicate separators, no trailing separator.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut out = String::with_capacity(unified.len());
    let mut prev_slash = false;
    for ch in unified.chars() {
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(ch);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Path of `file` relative to `root`, if `file` lies inside it.
fn relative_to(file: &str, root: &Path) -> Option<String> {
    let root = normalize_path(&root.to_string_lossy());
    if root.is_empty() {
        return None;
    }
    let rest = file.strip_prefix(&root)?.strip_prefix('/')?;
    (!rest.is_empty()).then(|| rest.to_string())
}

/// Directory part of a normalized path, empty for bare file names.
fn dirname(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn languages_dir(dir: &str) -> String {
    if dir.is_empty() {
        "languages/".to_string()
    } else {
        format!("{dir}/languages/")
    }
}

/// Derive basename, deployment mode and translation directory.
///
/// Rules are tried in a fixed order: child theme, theme, must-use
/// directory, then the plugin directory (or anything else) as default.
pub fn resolve_info(descriptor: &ExtensionDescriptor, paths: &HostPaths) -> ExtensionInfo {
    let main_file = normalize_path(&descriptor.main_file);

    let has_child_theme = paths.child_theme_dir != paths.theme_dir;
    let (derived_mode, basename) = if let Some(rel) =
        has_child_theme.then(|| relative_to(&main_file, &paths.child_theme_dir)).flatten()
    {
        (DeploymentMode::BundledChildTheme, rel)
    } else if let Some(rel) = relative_to(&main_file, &paths.theme_dir) {
        (DeploymentMode::BundledTheme, rel)
    } else if let Some(rel) = relative_to(&main_file, &paths.mu_plugin_dir) {
        (DeploymentMode::MustUsePlugin, rel)
    } else if let Some(rel) = relative_to(&main_file, &paths.plugin_dir) {
        // `<plugin>/<file>` is a plugin; anything deeper ships inside one.
        let mode = if rel.matches('/').count() > 1 {
            DeploymentMode::BundledPlugin
        } else {
            DeploymentMode::Plugin
        };
        (mode, rel)
    } else {
        (DeploymentMode::Plugin, main_file.clone())
    };

    let mode = descriptor.mode.unwrap_or(derived_mode);
    let textdomain_dir = match mode {
        DeploymentMode::Plugin | DeploymentMode::BundledPlugin if basename != main_file => {
            languages_dir(dirname(&basename))
        }
        _ => languages_dir(dirname(&main_file)),
    };

    ExtensionInfo {
        slug: descriptor.slug.clone(),
        name: descriptor.name.clone(),
        version: descriptor.version.clone(),
        main_file,
        basename,
        mode,
        textdomain: descriptor
            .textdomain
            .clone()
            .filter(|d| !d.trim().is_empty()),
        textdomain_dir,
    }
}

// ─── Registry ───────────────────────────────────────────────────────────

impl PluginRegistry {
    pub fn new(paths: HostPaths) -> Self {
        Self {
            paths,
            records: BTreeMap::new(),
            basenames: BTreeMap::new(),
        }
    }

    /// Register a descriptor, returning its resolved info.
    pub fn try_register(
        &mut self,
        descriptor: &ExtensionDescriptor,
    ) -> Result<ExtensionInfo, LoaderError> {
        descriptor.validate()?;
        if self.records.contains_key(&descriptor.slug) {
            return Err(LoaderError::DuplicateSlug(descriptor.slug.clone()));
        }

        let info = resolve_info(descriptor, &self.paths);
        if let Some(owner) = self.basenames.get(&info.basename) {
            return Err(LoaderError::InvalidDescriptor(format!(
                "basename '{}' already belongs to '{owner}'",
                info.basename
            )));
        }

        let factory = descriptor
            .factory
            .clone()
            .ok_or_else(|| LoaderError::InvalidDescriptor("missing factory".into()))?;

        self.basenames
            .insert(info.basename.clone(), info.slug.clone());
        self.records.insert(
            info.slug.clone(),
            ExtensionRecord {
                info: info.clone(),
                factory,
                instance: None,
            },
        );

        tracing::debug!(
            slug = %info.slug,
            basename = %info.basename,
            mode = %info.mode,
            "extension registered"
        );
        Ok(info)
    }

    /// Register a descriptor. False if a required field is empty or the
    /// slug is taken; the first registration of a slug always wins.
    pub fn register(&mut self, descriptor: &ExtensionDescriptor) -> bool {
        self.try_register(descriptor).is_ok()
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.records.contains_key(slug)
    }

    /// Build the instance of a registered extension and attach it.
    pub fn instantiate(&mut self, slug: &str) -> Option<ExtensionInstance> {
        let record = self.records.get_mut(slug)?;
        if let Some(existing) = &record.instance {
            return Some(existing.clone());
        }
        let extension = (record.factory)(&record.info);
        let instance = ExtensionInstance::new(record.info.clone(), extension);
        record.instance = Some(instance.clone());
        Some(instance)
    }

    /// Live instance of a slug; `None` until the extension passed its checks.
    pub fn lookup_by_slug(&self, slug: &str) -> Option<ExtensionInstance> {
        self.records.get(slug)?.instance.clone()
    }

    pub fn lookup_slug_by_basename(&self, basename: &str) -> Option<&str> {
        self.basenames.get(basename).map(String::as_str)
    }

    pub fn info(&self, slug: &str) -> Option<&ExtensionInfo> {
        self.records.get(slug).map(|r| &r.info)
    }

    /// Registered extensions that never got an instance and still own
    /// their basename.
    pub fn unresolved(&self) -> Vec<&ExtensionInfo> {
        self.records
            .values()
            .filter(|r| r.instance.is_none() && self.basenames.contains_key(&r.info.basename))
            .map(|r| &r.info)
            .collect()
    }

    /// Drop a slug's basename route; the slug itself stays reserved.
    pub fn forget_basename(&mut self, slug: &str) {
        if let Some(record) = self.records.get(slug) {
            self.basenames.remove(&record.info.basename);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn paths(&self) -> &HostPaths {
        &self.paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::Extension;
    use std::sync::Arc;

    struct Noop;

    impl Extension for Noop {
        fn run(&self, _info: &ExtensionInfo) {}
    }

    fn paths() -> HostPaths {
        HostPaths {
            plugin_dir: "/srv/www/wp-content/plugins".into(),
            mu_plugin_dir: "/srv/www/wp-content/mu-plugins".into(),
            theme_dir: "/srv/www/wp-content/themes/base".into(),
            child_theme_dir: "/srv/www/wp-content/themes/base-child".into(),
        }
    }

    fn descriptor(slug: &str, main_file: &str) -> ExtensionDescriptor {
        ExtensionDescriptor::new(slug, slug.to_uppercase(), "1.0.0", main_file)
            .with_factory(|_| Arc::new(Noop))
    }

    // ── Path helpers ────────────────────────────────────────────────

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("C:\\www\\\\plugins\\"), "C:/www/plugins");
        assert_eq!(normalize_path("/srv//www/"), "/srv/www");
        assert_eq!(normalize_path("/"), "/");
    }

    // ── Mode derivation ─────────────────────────────────────────────

    #[test]
    fn test_resolve_plugin() {
        let info = resolve_info(
            &descriptor("shop", "/srv/www/wp-content/plugins/shop/shop.php"),
            &paths(),
        );
        assert_eq!(info.mode, DeploymentMode::Plugin);
        assert_eq!(info.basename, "shop/shop.php");
        assert_eq!(info.textdomain_dir, "shop/languages/");
    }

    #[test]
    fn test_resolve_bundled_plugin() {
        let info = resolve_info(
            &descriptor("lib", "/srv/www/wp-content/plugins/shop/vendor/lib/lib.php"),
            &paths(),
        );
        assert_eq!(info.mode, DeploymentMode::BundledPlugin);
        assert_eq!(info.basename, "shop/vendor/lib/lib.php");
        assert_eq!(info.textdomain_dir, "shop/vendor/lib/languages/");
    }

    #[test]
    fn test_resolve_child_theme_before_theme() {
        let info = resolve_info(
            &descriptor("kit", "/srv/www/wp-content/themes/base-child/kit/kit.php"),
            &paths(),
        );
        assert_eq!(info.mode, DeploymentMode::BundledChildTheme);
        assert_eq!(
            info.textdomain_dir,
            "/srv/www/wp-content/themes/base-child/kit/languages/"
        );
    }

    #[test]
    fn test_resolve_theme_when_no_child_theme() {
        let mut p = paths();
        p.child_theme_dir = p.theme_dir.clone();
        let info = resolve_info(
            &descriptor("kit", "/srv/www/wp-content/themes/base/inc/kit.php"),
            &p,
        );
        assert_eq!(info.mode, DeploymentMode::BundledTheme);
        assert_eq!(info.basename, "inc/kit.php");
    }

    #[test]
    fn test_resolve_must_use() {
        let info = resolve_info(
            &descriptor("guard", "/srv/www/wp-content/mu-plugins/guard/guard.php"),
            &paths(),
        );
        assert_eq!(info.mode, DeploymentMode::MustUsePlugin);
        assert_eq!(info.basename, "guard/guard.php");
        assert_eq!(
            info.textdomain_dir,
            "/srv/www/wp-content/mu-plugins/guard/languages/"
        );
    }

    #[test]
    fn test_resolve_sibling_prefix_is_not_inside() {
        // `plugins-extra` must not match the `plugins` root.
        let info = resolve_info(
            &descriptor("x", "/srv/www/wp-content/plugins-extra/x/x.php"),
            &paths(),
        );
        assert_eq!(info.mode, DeploymentMode::Plugin);
        assert_eq!(info.basename, "/srv/www/wp-content/plugins-extra/x/x.php");
    }

    #[test]
    fn test_resolve_explicit_mode_wins() {
        let desc = descriptor("shop", "/srv/www/wp-content/plugins/shop/shop.php")
            .with_mode(DeploymentMode::BundledPlugin);
        assert_eq!(resolve_info(&desc, &paths()).mode, DeploymentMode::BundledPlugin);
    }

    // ── Registration ────────────────────────────────────────────────

    #[test]
    fn test_register_and_reverse_lookup() {
        let mut registry = PluginRegistry::new(paths());
        assert!(registry.register(&descriptor(
            "shop",
            "/srv/www/wp-content/plugins/shop/shop.php"
        )));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup_slug_by_basename("shop/shop.php"), Some("shop"));
        // Registered but not instantiated yet.
        assert!(registry.lookup_by_slug("shop").is_none());
        assert_eq!(registry.unresolved().len(), 1);
    }

    #[test]
    fn test_register_duplicate_slug_keeps_first() {
        let mut registry = PluginRegistry::new(paths());
        assert!(registry.register(&descriptor(
            "shop",
            "/srv/www/wp-content/plugins/shop/shop.php"
        )));
        assert!(!registry.register(&descriptor(
            "shop",
            "/srv/www/wp-content/plugins/other/other.php"
        )));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.info("shop").unwrap().main_file,
            "/srv/www/wp-content/plugins/shop/shop.php"
        );
        assert!(registry.lookup_slug_by_basename("other/other.php").is_none());
    }

    #[test]
    fn test_register_rejects_missing_fields() {
        let mut registry = PluginRegistry::new(paths());
        let mut desc = descriptor("shop", "/srv/www/wp-content/plugins/shop/shop.php");
        desc.name.clear();
        assert!(!registry.register(&desc));

        let no_factory = ExtensionDescriptor::new(
            "bare",
            "Bare",
            "1.0",
            "/srv/www/wp-content/plugins/bare/bare.php",
        );
        let err = registry.try_register(&no_factory).unwrap_err();
        assert!(matches!(err, LoaderError::InvalidDescriptor(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_rejects_shared_basename() {
        let mut registry = PluginRegistry::new(paths());
        assert!(registry.register(&descriptor("a", "/srv/www/wp-content/plugins/shop/shop.php")));
        let err = registry
            .try_register(&descriptor("b", "/srv/www/wp-content/plugins/shop/shop.php"))
            .unwrap_err();
        assert!(err.to_string().contains("already belongs to 'a'"));
    }

    #[test]
    fn test_instantiate_attaches_once() {
        let mut registry = PluginRegistry::new(paths());
        registry.register(&descriptor("shop", "/srv/www/wp-content/plugins/shop/shop.php"));
        let first = registry.instantiate("shop").unwrap();
        let second = registry.instantiate("shop").unwrap();
        assert!(Arc::ptr_eq(first.extension(), second.extension()));
        assert!(registry.lookup_by_slug("shop").is_some());
        assert!(registry.unresolved().is_empty());
        assert!(registry.instantiate("missing").is_none());
    }

    #[test]
    fn test_forget_basename() {
        let mut registry = PluginRegistry::new(paths());
        registry.register(&descriptor("shop", "/srv/www/wp-content/plugins/shop/shop.php"));
        registry.forget_basename("shop");
        assert!(registry.lookup_slug_by_basename("shop/shop.php").is_none());
        assert!(registry.unresolved().is_empty());
        assert!(registry.contains("shop"));
    }
}
