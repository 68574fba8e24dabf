use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::adapter::anthropic::AnthropicAdapter;
use crate::adapter::heuristic::HeuristicAdapter;
use crate::adapter::openai::OpenAiAdapter;
use crate::adapter::{AdapterSettings, ModelAdapter, Provider, ProviderCategory};

/// Declarative model roster, typically loaded from a YAML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

/// One configured model adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the API key; required for cloud providers.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// Errors while assembling or querying the model roster.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown provider `{provider}` (expected one of: anthropic, openai, heuristic)")]
    UnknownProvider { provider: String },
    #[error("environment variable `{var}` with the API key for `{provider}` is not set")]
    MissingApiKey { provider: String, var: String },
    #[error("cloud provider `{provider}` requires `api_key_env` in its registry entry")]
    MissingApiKeyEnv { provider: String },
    #[error("failed to build adapter for `{provider}`: {reason}")]
    AdapterBuild { provider: String, reason: String },
    #[error("no registered model with id `{model_id}`")]
    UnknownModel { model_id: String },
}

/// Display row for one registered adapter.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: Provider,
    pub category: ProviderCategory,
}

/// Registry of ready-to-run model adapters, keyed by adapter id.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    adapters: BTreeMap<String, Arc<dyn ModelAdapter>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration. Cloud entries resolve their API
    /// key through the environment variable named in the entry.
    pub fn from_config(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for entry in &config.models {
            let provider = Provider::from_label(&entry.provider).ok_or_else(|| {
                RegistryError::UnknownProvider {
                    provider: entry.provider.clone(),
                }
            })?;
            let adapter: Arc<dyn ModelAdapter> = match provider {
                Provider::Heuristic => Arc::new(HeuristicAdapter::new()),
                Provider::Anthropic | Provider::OpenAi => {
                    let settings = cloud_settings(provider, entry)?;
                    build_cloud_adapter(provider, &settings)?
                }
            };
            registry.register(adapter);
        }
        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn ModelAdapter>) {
        debug!(id = adapter.id(), "registering model adapter");
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn get(&self, model_id: &str) -> Option<Arc<dyn ModelAdapter>> {
        self.adapters.get(model_id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// All registered adapters in id order.
    pub fn adapters(&self) -> Vec<Arc<dyn ModelAdapter>> {
        self.adapters.values().cloned().collect()
    }

    pub fn list(&self) -> Vec<ModelInfo> {
        self.adapters
            .values()
            .map(|adapter| ModelInfo {
                id: adapter.id().to_string(),
                provider: adapter.provider(),
                category: adapter.provider().category(),
            })
            .collect()
    }

    pub fn list_by_provider(&self, provider: Provider) -> Vec<ModelInfo> {
        self.list()
            .into_iter()
            .filter(|info| info.provider == provider)
            .collect()
    }

    /// Resolve a set of model ids, failing on the first unknown id.
    pub fn select(&self, model_ids: &[String]) -> Result<Vec<Arc<dyn ModelAdapter>>, RegistryError> {
        model_ids
            .iter()
            .map(|model_id| {
                self.get(model_id).ok_or_else(|| RegistryError::UnknownModel {
                    model_id: model_id.clone(),
                })
            })
            .collect()
    }
}

fn cloud_settings(
    provider: Provider,
    entry: &ModelEntry,
) -> Result<AdapterSettings, RegistryError> {
    let var = entry
        .api_key_env
        .as_deref()
        .ok_or_else(|| RegistryError::MissingApiKeyEnv {
            provider: entry.provider.clone(),
        })?;
    let api_key = std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| RegistryError::MissingApiKey {
            provider: entry.provider.clone(),
            var: var.to_string(),
        })?;
    Ok(AdapterSettings {
        provider: provider.as_str().to_string(),
        api_key,
        endpoint: entry.endpoint.clone(),
        model: entry.model.clone(),
        timeout_secs: entry.timeout_secs,
        max_retries: entry.max_retries.unwrap_or(2),
    })
}

fn build_cloud_adapter(
    provider: Provider,
    settings: &AdapterSettings,
) -> Result<Arc<dyn ModelAdapter>, RegistryError> {
    let wrap = |err: anyhow::Error| RegistryError::AdapterBuild {
        provider: provider.as_str().to_string(),
        reason: format!("{err:#}"),
    };
    match provider {
        Provider::Anthropic => Ok(Arc::new(AnthropicAdapter::new(settings).map_err(wrap)?)),
        Provider::OpenAi => Ok(Arc::new(OpenAiAdapter::new(settings).map_err(wrap)?)),
        Provider::Heuristic => Err(RegistryError::UnknownProvider {
            provider: "heuristic is not a cloud provider".to_string(),
        }),
    }
}
