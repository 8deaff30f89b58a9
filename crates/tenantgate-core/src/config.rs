//! Loader configuration.

use crate::version;

/// Lowest runtime version any extension may declare.
pub const ABSOLUTE_MIN_RUNTIME_VERSION: &str = "5.3.0";

/// Lowest platform version any extension may declare.
pub const ABSOLUTE_MIN_PLATFORM_VERSION: &str = "3.5.0";

/// Option key holding the slug → installed map in both scopes.
pub const DEFAULT_OPTION_KEY: &str = "tenantgate_installed_extensions";

/// Loader configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Option key for install records (default: `tenantgate_installed_extensions`).
    pub option_key: String,
    /// Runtime floor applied to every manifest, never below the absolute floor.
    pub min_runtime_version: String,
    /// Platform floor applied to every manifest, never below the absolute floor.
    pub min_platform_version: String,
    /// Display label for the runtime dependency (default: `PHP`).
    pub runtime_label: String,
    /// Display label for the platform dependency (default: `WordPress`).
    pub platform_label: String,
    /// File suffix of extension entry files (default: `.php`).
    pub entry_suffix: String,
    /// Base admin URL remediation links are built against.
    pub admin_url: String,
    /// Directory served at `content_url`; extension URLs are resolved under it.
    pub content_dir: String,
    pub content_url: String,
    /// Base URL of the package registry API (plugin and theme info endpoints).
    pub registry_url: String,
    /// Package registry request timeout in seconds (default: 5).
    pub registry_timeout_secs: u64,
    /// Translation domain of the loader's own messages.
    pub text_domain: String,
    /// Directory holding the loader's own translation catalogs.
    pub language_dir: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            option_key: DEFAULT_OPTION_KEY.to_string(),
            min_runtime_version: ABSOLUTE_MIN_RUNTIME_VERSION.to_string(),
            min_platform_version: ABSOLUTE_MIN_PLATFORM_VERSION.to_string(),
            runtime_label: "PHP".to_string(),
            platform_label: "WordPress".to_string(),
            entry_suffix: ".php".to_string(),
            admin_url: "http://localhost/wp-admin/".to_string(),
            content_dir: "/srv/www/wp-content".to_string(),
            content_url: "http://localhost/wp-content/".to_string(),
            registry_url: "https://api.wordpress.org/".to_string(),
            registry_timeout_secs: 5,
            text_domain: "tenantgate".to_string(),
            language_dir: "languages/".to_string(),
        }
    }
}

impl LoaderConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str, fallback: String| -> String {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(fallback)
        };

        let config = Self {
            option_key: var("TENANTGATE_OPTION_KEY", defaults.option_key),
            min_runtime_version: var(
                "TENANTGATE_MIN_RUNTIME_VERSION",
                defaults.min_runtime_version,
            ),
            min_platform_version: var(
                "TENANTGATE_MIN_PLATFORM_VERSION",
                defaults.min_platform_version,
            ),
            runtime_label: var("TENANTGATE_RUNTIME_LABEL", defaults.runtime_label),
            platform_label: var("TENANTGATE_PLATFORM_LABEL", defaults.platform_label),
            entry_suffix: var("TENANTGATE_ENTRY_SUFFIX", defaults.entry_suffix),
            admin_url: var("TENANTGATE_ADMIN_URL", defaults.admin_url),
            content_dir: var("TENANTGATE_CONTENT_DIR", defaults.content_dir),
            content_url: var("TENANTGATE_CONTENT_URL", defaults.content_url),
            registry_url: var("TENANTGATE_REGISTRY_URL", defaults.registry_url),
            registry_timeout_secs: std::env::var("TENANTGATE_REGISTRY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.registry_timeout_secs),
            text_domain: var("TENANTGATE_TEXT_DOMAIN", defaults.text_domain),
            language_dir: var("TENANTGATE_LANGUAGE_DIR", defaults.language_dir),
        };
        config.clamped()
    }

    /// Raise configured floors to the absolute floors where they are weaker.
    pub fn clamped(mut self) -> Self {
        self.min_runtime_version =
            version::max_version(&self.min_runtime_version, ABSOLUTE_MIN_RUNTIME_VERSION)
                .to_string();
        self.min_platform_version =
            version::max_version(&self.min_platform_version, ABSOLUTE_MIN_PLATFORM_VERSION)
                .to_string();
        self
    }
}
