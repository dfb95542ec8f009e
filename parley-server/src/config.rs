//! Server configuration, loaded from environment variables at startup.

use std::collections::HashMap;

/// Runtime configuration for parley-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// against a local Ollama without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"127.0.0.1:5001"`).
    pub bind_address: String,

    /// sqlx SQLite URL (default: `"sqlite://parley.db"`). The file is
    /// created when missing.
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Directory for daily-rolling log files. Logs go to stdout when unset.
    pub log_dir: Option<String>,

    /// Base URL of the Ollama runtime.
    pub ollama_url: String,

    /// Model used when a request does not name one.
    pub default_model: String,

    /// The single origin allowed to call the API from a browser.
    pub cors_origin: String,

    /// Bearer token → external identity. Auth is enabled iff non-empty.
    pub api_tokens: HashMap<String, String>,

    /// Characters accumulated between two intermediate flushes of an
    /// assistant message.
    pub flush_threshold: usize,

    /// Serve the OpenAPI document at `/api-docs/openapi.json`.
    pub enable_openapi: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build [`Config`] from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());
        Self {
            bind_address: get("PARLEY_BIND", "127.0.0.1:5001"),
            database_url: get("PARLEY_DATABASE_URL", "sqlite://parley.db"),
            log_level: get("PARLEY_LOG", "info"),
            log_json: lookup("PARLEY_LOG_JSON").is_some_and(|v| parse_flag(&v)),
            log_dir: lookup("PARLEY_LOG_DIR").filter(|v| !v.trim().is_empty()),
            ollama_url: get("PARLEY_OLLAMA_URL", "http://localhost:11434"),
            default_model: get("PARLEY_DEFAULT_MODEL", "gemma3:1b"),
            cors_origin: get("PARLEY_CORS_ORIGIN", "http://localhost:3000"),
            api_tokens: lookup("PARLEY_API_TOKENS")
                .map(|v| parse_tokens(&v))
                .unwrap_or_default(),
            flush_threshold: lookup("PARLEY_FLUSH_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(100),
            enable_openapi: lookup("PARLEY_ENABLE_OPENAPI").is_none_or(|v| parse_flag(&v)),
        }
    }

    /// Whether requests must carry a bearer token.
    pub fn auth_enabled(&self) -> bool {
        !self.api_tokens.is_empty()
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn parse_flag(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

/// Parse `identity=token,identity=token` into a token → identity map.
/// Malformed entries are skipped.
fn parse_tokens(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|entry| {
            let (identity, token) = entry.split_once('=')?;
            let (identity, token) = (identity.trim(), token.trim());
            (!identity.is_empty() && !token.is_empty())
                .then(|| (token.to_owned(), identity.to_owned()))
        })
        .collect()
}
