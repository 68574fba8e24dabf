use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use super::parse::parse_findings;
use super::prompt::{build_user_prompt, SYSTEM_PROMPT};
use super::{
    AdapterHealth, AdapterSettings, AnalysisRequest, ModelAdapter, Provider, ReportedFinding,
};

#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    http: Client,
    url: String,
    api_key: String,
    model: String,
    id: String,
    max_retries: u32,
}

impl AnthropicAdapter {
    pub fn new(settings: &AdapterSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            bail!("Anthropic API key must be provided via CODEWARDEN_API_KEY");
        }
        let base = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());
        let url = format!("{}/v1/messages", base.trim_end_matches('/'));
        let http = Client::builder()
            .user_agent("codewarden/0.3")
            .timeout(Duration::from_secs(settings.timeout_secs.unwrap_or(60)))
            .build()
            .context("failed to build Anthropic HTTP client")?;
        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| "claude-3-5-haiku-latest".to_string());
        Ok(Self {
            http,
            url,
            api_key: settings.api_key.clone(),
            id: format!("anthropic:{model}"),
            model,
            max_retries: settings.max_retries,
        })
    }

    async fn send(&self, payload: &MessagesRequest) -> Result<String> {
        let mut attempt = 0u32;
        let mut backoff = Duration::from_millis(200);
        loop {
            let response = self
                .http
                .post(&self.url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(payload)
                .send()
                .await;

            let response = match response {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(err).context("failed to call Anthropic messages API");
                    }
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(5));
                    attempt += 1;
                    continue;
                }
            };

            if !response.status().is_success() {
                if attempt >= self.max_retries {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    bail!("Anthropic API error ({}): {}", status, body);
                }
                sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(5));
                attempt += 1;
                continue;
            }

            let message: MessagesResponse = response
                .json()
                .await
                .context("failed to parse Anthropic response")?;
            return message
                .content
                .into_iter()
                .find_map(|part| part.text)
                .ok_or_else(|| anyhow!("Anthropic response missing message content"));
        }
    }
}

#[async_trait]
impl ModelAdapter for AnthropicAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<ReportedFinding>> {
        let payload = MessagesRequest {
            model: self.model.clone(),
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![Message {
                role: "user".into(),
                content: build_user_prompt(request),
            }],
            max_tokens: 2048,
        };
        let content = self.send(&payload).await?;
        Ok(parse_findings(&content, request, &self.id))
    }

    async fn health(&self) -> Result<AdapterHealth> {
        let payload = MessagesRequest {
            model: self.model.clone(),
            system: "Reply with the single word: ok".into(),
            messages: vec![Message {
                role: "user".into(),
                content: "health check".into(),
            }],
            max_tokens: 8,
        };
        match self.send(&payload).await {
            Ok(_) => Ok(AdapterHealth {
                healthy: true,
                message: format!("model {} reachable", self.model),
            }),
            Err(err) => Ok(AdapterHealth {
                healthy: false,
                message: format!("{err:#}"),
            }),
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    system: String,
    messages: Vec<Message>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    _type: String,
    #[serde(default)]
    text: Option<String>,
}
