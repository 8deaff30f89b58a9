//! Dotted-version ordering and the minimum-version gate.
//!
//! Host versions are not semver: the runtime reports things like
//! `7.4.3-4ubuntu2.19`, the platform uses two segments (`6.4`) and
//! extensions ship four (`2.0.1.3`). Comparison is segment-wise and
//! numeric, missing trailing segments count as zero, and a recognised
//! pre-release tag (`dev`, `alpha`, `beta`, `RC`) sorts before the release.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Pre-release stage, ordered from least to most mature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreRelease {
    Dev(u64),
    Alpha(u64),
    Beta(u64),
    Rc(u64),
}

impl PreRelease {
    /// Recognise a pre-release tag such as `beta2`, `RC1` or `alpha.3`.
    ///
    /// Anything else after the numeric part (distro build suffixes like
    /// `4ubuntu2`) is not a pre-release and yields `None`.
    fn parse(tag: &str) -> Option<Self> {
        let lower = tag.to_ascii_lowercase();
        let (stage, rest): (fn(u64) -> Self, &str) = if let Some(r) = lower.strip_prefix("dev") {
            (Self::Dev, r)
        } else if let Some(r) = lower.strip_prefix("alpha") {
            (Self::Alpha, r)
        } else if let Some(r) = lower.strip_prefix("beta") {
            (Self::Beta, r)
        } else if let Some(r) = lower.strip_prefix("rc") {
            (Self::Rc, r)
        } else if let Some(r) = lower.strip_prefix('a') {
            (Self::Alpha, r)
        } else if let Some(r) = lower.strip_prefix('b') {
            (Self::Beta, r)
        } else {
            return None;
        };

        let digits: String = rest
            .trim_start_matches(['.', '-', '_'])
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        Some(stage(digits.parse().unwrap_or(0)))
    }
}

/// A parsed dotted version.
#[derive(Debug, Clone)]
pub struct DottedVersion {
    segments: Vec<u64>,
    pre: Option<PreRelease>,
    raw: String,
}

/// Returned when a string has no leading numeric segment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a dotted version: '{0}'")]
pub struct VersionParseError(pub String);

impl FromStr for DottedVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let body = raw.strip_prefix(['v', 'V']).unwrap_or(raw);

        // Build metadata never participates in ordering.
        let body = body.split('+').next().unwrap_or_default();

        let mut segments = Vec::new();
        let mut tail = "";
        for (idx, part) in body.split('.').enumerate() {
            let digits_len = part.chars().take_while(|c| c.is_ascii_digit()).count();
            if digits_len == 0 {
                tail = rest_after(body, idx);
                break;
            }
            let value = part[..digits_len]
                .parse::<u64>()
                .map_err(|_| VersionParseError(raw.to_string()))?;
            segments.push(value);
            if digits_len < part.len() {
                // `3RC1`, `3-beta`, `3-4ubuntu2`: the remainder is a tag.
                let offset = body.len() - rest_after(body, idx).len() + digits_len;
                tail = &body[offset..];
                break;
            }
        }

        if segments.is_empty() {
            return Err(VersionParseError(raw.to_string()));
        }

        let pre = PreRelease::parse(tail.trim_start_matches(['-', '_', '.']));
        Ok(Self {
            segments,
            pre,
            raw: raw.to_string(),
        })
    }
}

/// Slice of `body` starting at the `idx`-th dot-separated part.
fn rest_after(body: &str, idx: usize) -> &str {
    let mut offset = 0;
    for part in body.split('.').take(idx) {
        offset += part.len() + 1;
    }
    &body[offset.min(body.len())..]
}

impl DottedVersion {
    /// The version string as it was given, trimmed.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    pub fn pre_release(&self) -> Option<PreRelease> {
        self.pre
    }
}

impl Ord for DottedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            let a = self.segments.get(i).copied().unwrap_or(0);
            let b = other.segments.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        match (self.pre, other.pre) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(&b),
        }
    }
}

impl PartialOrd for DottedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DottedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DottedVersion {}

impl fmt::Display for DottedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// ─── Gate ───────────────────────────────────────────────────────────────

/// A failed minimum-version check.
///
/// `installed` is what was found, or `None` when the dependency is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateFailure {
    pub installed: Option<String>,
}

/// Check an installed version against a declared minimum.
///
/// An empty requirement always passes. An absent installed version fails
/// with `installed: None`; absence is an ordinary result, not an error.
pub fn check(installed: Option<&str>, required: &str) -> Result<(), GateFailure> {
    let required = required.trim();
    if required.is_empty() {
        return Ok(());
    }

    let Ok(minimum) = required.parse::<DottedVersion>() else {
        tracing::warn!(required = %required, "ignoring unparseable version requirement");
        return Ok(());
    };

    let Some(found) = installed.map(str::trim).filter(|v| !v.is_empty()) else {
        return Err(GateFailure { installed: None });
    };

    match found.parse::<DottedVersion>() {
        Ok(version) if version >= minimum => Ok(()),
        _ => Err(GateFailure {
            installed: Some(found.to_string()),
        }),
    }
}

/// Return whichever of two version strings is higher; empty strings lose.
pub fn max_version<'a>(a: &'a str, b: &'a str) -> &'a str {
    match (a.parse::<DottedVersion>(), b.parse::<DottedVersion>()) {
        (Ok(va), Ok(vb)) => {
            if va >= vb {
                a
            } else {
                b
            }
        }
        (Ok(_), Err(_)) => a,
        (Err(_), _) => b,
    }
}
