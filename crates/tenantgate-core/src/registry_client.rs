//! Remote package registry client for a WordPress.org-style info API.
//!
//! One blocking request per lookup with the configured timeout. Every
//! failure (transport, status, body) is logged and reported as `None`.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::config::LoaderConfig;
use crate::host::{PackageKind, PackageRegistry, RemoteMetadata};

/// Upper bound on an info response body.
const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024;

/// Info API response. Unknown packages come back as `{"error": "..."}`.
#[derive(Debug, Deserialize)]
struct InfoResponse {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpPackageRegistry {
    base_url: Url,
    client: reqwest::blocking::Client,
}

impl std::fmt::Debug for HttpPackageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPackageRegistry")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpPackageRegistry {
    pub fn new(base_url: Url, timeout: Duration) -> Self {
        let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "registry client setup failed, using defaults without timeout: {e}"
                );
                reqwest::blocking::Client::new()
            }
        };
        Self { base_url, client }
    }

    /// Build a client from `registry_url` and `registry_timeout_secs`.
    pub fn from_config(config: &LoaderConfig) -> Result<Self, url::ParseError> {
        let base_url = Url::parse(&config.registry_url)?;
        Ok(Self::new(
            base_url,
            Duration::from_secs(config.registry_timeout_secs),
        ))
    }

    /// Info endpoint URL for one package.
    pub fn info_url(&self, identifier: &str, kind: PackageKind) -> Option<Url> {
        let (path, action) = match kind {
            PackageKind::Plugin => ("plugins/info/1.2/", "plugin_information"),
            PackageKind::Theme => ("themes/info/1.2/", "theme_information"),
        };
        let mut url = self.base_url.join(path).ok()?;
        url.query_pairs_mut()
            .append_pair("action", action)
            .append_pair("request[slug]", identifier)
            .append_pair("request[fields][sections]", "0");
        Some(url)
    }
}

/// Parse an info response body; `None` for error bodies or missing versions.
fn parse_info(identifier: &str, body: &str) -> Option<RemoteMetadata> {
    let info: InfoResponse = match serde_json::from_str(body) {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(package = %identifier, "unreadable registry response: {e}");
            return None;
        }
    };
    if let Some(error) = info.error {
        tracing::debug!(package = %identifier, "registry reported: {error}");
        return None;
    }
    let version = info.version.filter(|v| !v.trim().is_empty())?;
    Some(RemoteMetadata {
        slug: info.slug.unwrap_or_else(|| identifier.to_string()),
        name: info.name.unwrap_or_default(),
        version,
    })
}

impl PackageRegistry for HttpPackageRegistry {
    fn fetch_remote_metadata(&self, identifier: &str, kind: PackageKind) -> Option<RemoteMetadata> {
        let url = self.info_url(identifier, kind)?;

        let response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(package = %identifier, "registry request failed: {e}");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(
                package = %identifier,
                status = response.status().as_u16(),
                "registry returned an error status"
            );
            return None;
        }

        let body = match response.bytes() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(package = %identifier, "failed to read registry response: {e}");
                return None;
            }
        };
        if body.len() > MAX_RESPONSE_BYTES {
            tracing::warn!(
                package = %identifier,
                bytes = body.len(),
                "registry response too large"
            );
            return None;
        }

        parse_info(identifier, &String::from_utf8_lossy(&body))
    }
}
