//! Extension descriptors and dependency manifests.
//!
//! Both can be built in code or read from an `extension.toml` file:
//!
//! ```toml
//! [extension]
//! slug = "events-calendar"
//! name = "Events Calendar"
//! version = "2.1.0"
//! main_file = "/srv/www/wp-content/plugins/events-calendar/events-calendar.php"
//! textdomain = "events-calendar"
//!
//! [dependencies]
//! min_runtime_version = "7.4"
//! min_platform_version = "5.8"
//! required_callables = ["mb_strlen", "IntlDateFormatter::create"]
//!
//! [dependencies.required_extensions]
//! "advanced-fields" = "5.9"
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::LoaderError;
use crate::extension::{Extension, ExtensionFactory, ExtensionInfo};
use crate::version::DottedVersion;

/// Version assumed when a descriptor file omits one.
pub const DEFAULT_EXTENSION_VERSION: &str = "1.0.0";

/// How an extension is deployed inside the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentMode {
    /// Regular plugin living directly in the plugins directory.
    Plugin,
    /// Shipped inside another plugin's directory tree.
    BundledPlugin,
    BundledTheme,
    BundledChildTheme,
    /// Auto-loaded by the host, always active.
    MustUsePlugin,
}

impl DeploymentMode {
    /// Whether the host can deactivate the extension on its own.
    pub fn is_standalone(self) -> bool {
        matches!(self, Self::Plugin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plugin => "plugin",
            Self::BundledPlugin => "bundled-plugin",
            Self::BundledTheme => "bundled-theme",
            Self::BundledChildTheme => "bundled-child-theme",
            Self::MustUsePlugin => "must-use-plugin",
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Callables ──────────────────────────────────────────────────────────

/// Reference to a callable the host must be able to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CallableRef {
    /// Free function, e.g. `mb_strlen`.
    Function(String),
    /// Static member of a named type, e.g. `DateTime::createFromFormat`.
    Static { owner: String, member: String },
    /// Method on an object; `owner` holds the object's type name.
    Bound { owner: String, member: String },
}

impl CallableRef {
    pub fn function(name: impl Into<String>) -> Self {
        Self::Function(name.into())
    }

    pub fn static_member(owner: impl Into<String>, member: impl Into<String>) -> Self {
        Self::Static {
            owner: owner.into(),
            member: member.into(),
        }
    }

    /// Reference a method on `instance`, resolving the instance to its type name.
    pub fn method_of<T: ?Sized>(_instance: &T, member: impl Into<String>) -> Self {
        let full = std::any::type_name::<T>();
        let owner = full
            .split('<')
            .next()
            .and_then(|path| path.rsplit("::").next())
            .unwrap_or(full);
        Self::Bound {
            owner: owner.to_string(),
            member: member.into(),
        }
    }

    /// Form used in diagnostics: `name` or `Owner::member`.
    pub fn display_name(&self) -> String {
        match self {
            Self::Function(name) => name.clone(),
            Self::Static { owner, member } | Self::Bound { owner, member } => {
                format!("{owner}::{member}")
            }
        }
    }
}

impl From<String> for CallableRef {
    fn from(value: String) -> Self {
        match value.split_once("::") {
            Some((owner, member)) if !owner.is_empty() && !member.is_empty() => {
                Self::static_member(owner, member)
            }
            _ => Self::Function(value),
        }
    }
}

impl From<&str> for CallableRef {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<CallableRef> for String {
    fn from(value: CallableRef) -> Self {
        value.display_name()
    }
}

impl fmt::Display for CallableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

// ─── Manifest ───────────────────────────────────────────────────────────

/// Prerequisites an extension declares before it may run.
///
/// Empty version fields mean "no requirement beyond the system floor";
/// the floors are injected when the manifest is evaluated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyManifest {
    #[serde(default)]
    pub min_runtime_version: String,
    #[serde(default)]
    pub min_platform_version: String,
    #[serde(default)]
    pub required_callables: Vec<CallableRef>,
    /// Sibling extension id → minimum version (empty = any version).
    #[serde(default)]
    pub required_extensions: RequiredExtensions,
}

impl DependencyManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requires_runtime(mut self, version: impl Into<String>) -> Self {
        self.min_runtime_version = version.into();
        self
    }

    pub fn requires_platform(mut self, version: impl Into<String>) -> Self {
        self.min_platform_version = version.into();
        self
    }

    pub fn requires_callable(mut self, callable: impl Into<CallableRef>) -> Self {
        self.required_callables.push(callable.into());
        self
    }

    pub fn requires_extension(mut self, id: impl Into<String>, version: impl Into<String>) -> Self {
        self.required_extensions.insert(id, version);
        self
    }
}

/// Sibling requirements in declaration order.
///
/// Reads from and writes to a TOML/JSON table. Re-declaring an id replaces
/// its version and keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredExtensions(Vec<(String, String)>);

impl RequiredExtensions {
    pub fn insert(&mut self, id: impl Into<String>, version: impl Into<String>) {
        let id = id.into();
        let version = version.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = version,
            None => self.0.push((id, version)),
        }
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, version)| version.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(id, version)| (id.as_str(), version.as_str()))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.0.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for RequiredExtensions {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, version) in &self.0 {
            map.serialize_entry(id, version)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RequiredExtensions {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> serde::de::Visitor<'de> for TableVisitor {
            type Value = RequiredExtensions;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a table of extension id to minimum version")
            }

            fn visit_map<A: serde::de::MapAccess<'de>>(
                self,
                mut access: A,
            ) -> Result<Self::Value, A::Error> {
                let mut required = RequiredExtensions::default();
                while let Some((id, version)) = access.next_entry::<String, String>()? {
                    required.insert(id, version);
                }
                Ok(required)
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

// ─── Descriptor ─────────────────────────────────────────────────────────

/// Static declaration of an extension's identity.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ExtensionDescriptor {
    pub slug: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Absolute path of the extension's entry file.
    pub main_file: String,
    #[serde(default)]
    pub textdomain: Option<String>,
    /// Explicit deployment mode; derived from `main_file` when absent.
    #[serde(default)]
    pub mode: Option<DeploymentMode>,
    #[serde(skip)]
    pub factory: Option<ExtensionFactory>,
}

fn default_version() -> String {
    DEFAULT_EXTENSION_VERSION.to_string()
}

impl fmt::Debug for ExtensionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDescriptor")
            .field("slug", &self.slug)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("main_file", &self.main_file)
            .field("textdomain", &self.textdomain)
            .field("mode", &self.mode)
            .field("factory", &self.factory.is_some())
            .finish()
    }
}

impl ExtensionDescriptor {
    pub fn new(
        slug: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        main_file: impl Into<String>,
    ) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            version: version.into(),
            main_file: main_file.into(),
            ..Default::default()
        }
    }

    pub fn with_textdomain(mut self, domain: impl Into<String>) -> Self {
        self.textdomain = Some(domain.into());
        self
    }

    pub fn with_mode(mut self, mode: DeploymentMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ExtensionInfo) -> std::sync::Arc<dyn Extension> + Send + Sync + 'static,
    {
        self.factory = Some(std::sync::Arc::new(factory));
        self
    }

    /// Check the identity fields, excluding the factory.
    pub fn validate_fields(&self) -> Result<(), LoaderError> {
        for (field, value) in [
            ("slug", &self.slug),
            ("name", &self.name),
            ("version", &self.version),
            ("main_file", &self.main_file),
        ] {
            if value.trim().is_empty() {
                return Err(LoaderError::InvalidDescriptor(format!(
                    "{field} must not be empty"
                )));
            }
        }
        if self.slug.chars().any(char::is_whitespace) {
            return Err(LoaderError::InvalidDescriptor(format!(
                "slug must not contain whitespace: '{}'",
                self.slug
            )));
        }
        Ok(())
    }

    /// Check every field required for registration.
    pub fn validate(&self) -> Result<(), LoaderError> {
        self.validate_fields()?;
        if self.factory.is_none() {
            return Err(LoaderError::InvalidDescriptor(format!(
                "no factory given for '{}'",
                self.slug
            )));
        }
        Ok(())
    }
}

// ─── extension.toml ─────────────────────────────────────────────────────

/// Contents of an `extension.toml` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionFile {
    pub extension: ExtensionDescriptor,
    #[serde(default)]
    pub dependencies: DependencyManifest,
}

fn validate_version_field(value: &str, field_name: &str) -> Result<(), LoaderError> {
    if value.trim().is_empty() {
        return Ok(());
    }
    value.parse::<DottedVersion>().map_err(|_| {
        LoaderError::InvalidDescriptor(format!("{field_name} is not a version: '{value}'"))
    })?;
    Ok(())
}

impl ExtensionFile {
    /// Parse an extension file from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, LoaderError> {
        let file: ExtensionFile = toml::from_str(toml_str)?;
        Ok(file)
    }

    /// Validate every declarative field.
    pub fn validate(&self) -> Result<(), LoaderError> {
        self.extension.validate_fields()?;

        let deps = &self.dependencies;
        validate_version_field(&deps.min_runtime_version, "dependencies.min_runtime_version")?;
        validate_version_field(&deps.min_platform_version, "dependencies.min_platform_version")?;

        for callable in &deps.required_callables {
            if callable.display_name().trim().is_empty() {
                return Err(LoaderError::InvalidDescriptor(
                    "required_callables entry must not be empty".into(),
                ));
            }
        }

        for (id, version) in deps.required_extensions.iter() {
            if id.trim().is_empty() {
                return Err(LoaderError::InvalidDescriptor(
                    "required_extensions key must not be empty".into(),
                ));
            }
            validate_version_field(version, &format!("required_extensions.{id}"))?;
        }

        Ok(())
    }

    /// Parse and validate an extension file from a TOML string.
    pub fn parse_and_validate(toml_str: &str) -> Result<Self, LoaderError> {
        let file = Self::parse(toml_str)?;
        file.validate()?;
        Ok(file)
    }

    /// Read, parse and validate an extension file from disk.
    pub fn from_path(path: &Path) -> Result<Self, LoaderError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_and_validate(&content)
    }

    /// Attach the runtime factory and split into loader inputs.
    pub fn into_parts(
        self,
        factory: ExtensionFactory,
    ) -> (ExtensionDescriptor, DependencyManifest) {
        let mut descriptor = self.extension;
        descriptor.factory = Some(factory);
        (descriptor, self.dependencies)
    }
}
