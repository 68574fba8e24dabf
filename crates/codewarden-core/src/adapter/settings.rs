use anyhow::{Context, Result};
use std::collections::HashMap;

/// Environment-driven configuration for cloud model adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSettings {
    pub provider: String,
    pub api_key: String,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: u32,
}

impl AdapterSettings {
    const PROVIDER_ENV: &'static str = "CODEWARDEN_PROVIDER";
    const API_KEY_ENV: &'static str = "CODEWARDEN_API_KEY";
    const ENDPOINT_ENV: &'static str = "CODEWARDEN_ENDPOINT";
    const MODEL_ENV: &'static str = "CODEWARDEN_MODEL";
    const TIMEOUT_ENV: &'static str = "CODEWARDEN_TIMEOUT_SECS";
    const RETRIES_ENV: &'static str = "CODEWARDEN_MAX_RETRIES";

    /// Load settings from environment variables.
    ///
    /// * `CODEWARDEN_PROVIDER` — Provider identifier (default: `heuristic`).
    /// * `CODEWARDEN_API_KEY`  — API key/token (required for cloud providers).
    /// * `CODEWARDEN_ENDPOINT` — Optional custom endpoint/base URL.
    pub fn from_env() -> Result<Self> {
        Self::from_map(std::env::vars().collect())
    }

    fn from_map(vars: HashMap<String, String>) -> Result<Self> {
        let provider = vars
            .get(Self::PROVIDER_ENV)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "heuristic".to_string())
            .trim()
            .to_string();
        let api_key = match provider.to_lowercase().as_str() {
            "heuristic" => vars.get(Self::API_KEY_ENV).cloned().unwrap_or_default(),
            _ => vars
                .get(Self::API_KEY_ENV)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .with_context(|| {
                    format!(
                        "environment variable {} must be set for provider `{}`",
                        Self::API_KEY_ENV,
                        provider
                    )
                })?,
        };
        let endpoint = vars
            .get(Self::ENDPOINT_ENV)
            .cloned()
            .filter(|v| !v.trim().is_empty());
        let model = vars
            .get(Self::MODEL_ENV)
            .cloned()
            .filter(|v| !v.trim().is_empty());
        let timeout_secs = vars
            .get(Self::TIMEOUT_ENV)
            .and_then(|v| v.trim().parse::<u64>().ok());
        let max_retries = vars
            .get(Self::RETRIES_ENV)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(2);

        Ok(Self {
            provider,
            api_key,
            endpoint,
            model,
            timeout_secs,
            max_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_to_heuristic_provider_without_key() {
        let settings = AdapterSettings::from_map(HashMap::new()).expect("should load settings");
        assert_eq!(settings.provider, "heuristic");
        assert!(settings.api_key.is_empty());
        assert!(settings.endpoint.is_none());
        assert!(settings.model.is_none());
        assert_eq!(settings.max_retries, 2);
    }

    #[test]
    fn cloud_provider_requires_api_key() {
        let err = AdapterSettings::from_map(vars(&[("CODEWARDEN_PROVIDER", "anthropic")]))
            .expect_err("missing API key should error");
        assert!(err.to_string().contains("CODEWARDEN_API_KEY"));
    }

    #[test]
    fn parses_timeout_and_retries() {
        let settings = AdapterSettings::from_map(vars(&[
            ("CODEWARDEN_PROVIDER", "openai"),
            ("CODEWARDEN_API_KEY", "secret"),
            ("CODEWARDEN_TIMEOUT_SECS", "45"),
            ("CODEWARDEN_MAX_RETRIES", "5"),
            ("CODEWARDEN_MODEL", "gpt-4o-mini"),
        ]))
        .expect("should parse timeout/retries");
        assert_eq!(settings.timeout_secs, Some(45));
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn blank_values_are_treated_as_unset() {
        let settings = AdapterSettings::from_map(vars(&[
            ("CODEWARDEN_PROVIDER", "heuristic"),
            ("CODEWARDEN_ENDPOINT", "   "),
            ("CODEWARDEN_MAX_RETRIES", "not-a-number"),
        ]))
        .expect("blank values should fall back to defaults");
        assert!(settings.endpoint.is_none());
        assert_eq!(settings.max_retries, 2);
    }
}
