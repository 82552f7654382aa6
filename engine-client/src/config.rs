//! Engine endpoint configuration from environment variables.

use url::Url;

use crate::errors::EngineError;

/// Configuration for the external context engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Base URL, e.g. `http://127.0.0.1:8123`.
    pub api_url: String,
    /// Bearer token. Optional for loopback engines.
    pub api_token: Option<String>,
    /// When set, only loopback/local endpoints are permitted.
    pub offline_only: bool,
    /// Per-call timeout for search and indexing calls.
    pub request_timeout_secs: u64,
    /// Timeout for `search_and_ask` LLM calls.
    pub llm_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8123".into(),
            api_token: None,
            offline_only: false,
            request_timeout_secs: 60,
            llm_timeout_secs: 120,
        }
    }
}

impl EngineConfig {
    /// Build from environment variables.
    ///
    /// Recognized vars:
    /// - AUGMENT_API_URL (default: `http://127.0.0.1:8123`)
    /// - AUGMENT_API_TOKEN (optional)
    /// - CONTEXT_ENGINE_OFFLINE_ONLY = true/false (default: false)
    pub fn from_env() -> Self {
        use std::env;
        let defaults = Self::default();
        Self {
            api_url: env::var("AUGMENT_API_URL").unwrap_or(defaults.api_url),
            api_token: env::var("AUGMENT_API_TOKEN").ok().filter(|t| !t.is_empty()),
            offline_only: env::var("CONTEXT_ENGINE_OFFLINE_ONLY")
                .map(|s| s.eq_ignore_ascii_case("true") || s == "1")
                .unwrap_or(false),
            request_timeout_secs: defaults.request_timeout_secs,
            llm_timeout_secs: defaults.llm_timeout_secs,
        }
    }

    /// Enforce the offline policy against the configured endpoint.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.api_url.trim().is_empty() {
            return Err(EngineError::Config("empty AUGMENT_API_URL".into()));
        }
        if self.offline_only && !is_local_url(&self.api_url) {
            return Err(EngineError::OfflineRemoteEndpoint(self.api_url.clone()));
        }
        Ok(())
    }
}

/// Loopback and link-local hosts count as local.
pub fn is_local_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    match url.host_str() {
        Some(host) => {
            host == "localhost"
                || host == "::1"
                || host == "[::1]"
                || host == "0.0.0.0"
                || host.starts_with("127.")
        }
        None => url.scheme() == "unix",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_urls_recognized() {
        assert!(is_local_url("http://127.0.0.1:8123"));
        assert!(is_local_url("http://localhost:9999/v1"));
        assert!(!is_local_url("https://api.example.com"));
        assert!(!is_local_url("not a url"));
    }

    #[test]
    fn offline_policy_rejects_remote() {
        let cfg = EngineConfig {
            api_url: "https://api.example.com".into(),
            offline_only: true,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(EngineError::OfflineRemoteEndpoint(_))
        ));
    }

    #[test]
    fn offline_policy_allows_loopback() {
        let cfg = EngineConfig {
            offline_only: true,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }
}
