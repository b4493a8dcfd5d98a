//! Output format table and config source registry
//! Both are fixed process-wide tables; the registry is injectable so tests
//! can point it at a local server.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use thiserror::Error;

/// What to do with a fetched config document before responding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatPolicy {
    /// Rewrite `api` fields to route through the relay
    pub proxy_rewrite: bool,
    /// Base58-encode the serialized document
    pub base58: bool,
}

/// Format codes accepted in the `format` query parameter.
/// Numeric codes and mnemonic names are aliases for the same policy.
static FORMAT_CONFIG: Lazy<HashMap<&'static str, FormatPolicy>> = Lazy::new(|| {
    let raw = FormatPolicy { proxy_rewrite: false, base58: false };
    let proxy = FormatPolicy { proxy_rewrite: true, base58: false };
    let base58 = FormatPolicy { proxy_rewrite: false, base58: true };
    let proxy_base58 = FormatPolicy { proxy_rewrite: true, base58: true };

    HashMap::from([
        ("0", raw),
        ("raw", raw),
        ("1", proxy),
        ("proxy", proxy),
        ("2", base58),
        ("base58", base58),
        ("3", proxy_base58),
        ("proxy-base58", proxy_base58),
    ])
});

const DEFAULT_SOURCE: &str = "full";

const SOURCE_URLS: &[(&str, &str)] = &[
    (
        "jin18",
        "https://raw.githubusercontent.com/hafrey1/LunaTV-config/refs/heads/main/jin18.json",
    ),
    (
        "jingjian",
        "https://raw.githubusercontent.com/hafrey1/LunaTV-config/refs/heads/main/jingjian.json",
    ),
    (
        "full",
        "https://raw.githubusercontent.com/hafrey1/LunaTV-config/refs/heads/main/LunaTV-config.json",
    ),
];

/// Named remote JSON config sources.
///
/// Lookups are total: an unknown or missing name resolves to the `full`
/// source.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: HashMap<String, String>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self {
            sources: SOURCE_URLS
                .iter()
                .map(|(name, url)| (name.to_string(), url.to_string()))
                .collect(),
        }
    }
}

impl SourceRegistry {
    /// Build a registry from explicit name/URL pairs. Must include the
    /// `full` fallback entry.
    pub fn new(sources: impl IntoIterator<Item = (String, String)>) -> Self {
        let sources: HashMap<String, String> = sources.into_iter().collect();
        debug_assert!(sources.contains_key(DEFAULT_SOURCE));
        Self { sources }
    }

    /// Resolve a source name to its URL, falling back to `full` when the
    /// name is unknown or absent.
    pub fn url_for(&self, name: Option<&str>) -> &str {
        name.and_then(|n| self.sources.get(n))
            .or_else(|| self.sources.get(DEFAULT_SOURCE))
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// Unknown format code
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid format code: {0:?}")]
pub struct InvalidFormat(pub String);

/// A resolved format request: what to do and where to fetch from
#[derive(Debug, Clone, Copy)]
pub struct Resolved<'a> {
    pub policy: FormatPolicy,
    pub source_url: &'a str,
}

/// Look up the format code and source name.
///
/// The format lookup is strict (unknown code is an error); the source
/// lookup falls back to `full`.
pub fn resolve<'a>(
    registry: &'a SourceRegistry,
    format_code: &str,
    source_code: Option<&str>,
) -> Result<Resolved<'a>, InvalidFormat> {
    let policy = FORMAT_CONFIG
        .get(format_code)
        .copied()
        .ok_or_else(|| InvalidFormat(format_code.to_string()))?;

    Ok(Resolved {
        policy,
        source_url: registry.url_for(source_code),
    })
}
