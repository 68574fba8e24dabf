use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::parse::parse_findings;
use super::prompt::{build_user_prompt, SYSTEM_PROMPT};
use super::{
    AdapterHealth, AdapterSettings, AnalysisRequest, ModelAdapter, Provider, ReportedFinding,
};

#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    http: Client,
    url: String,
    api_key: String,
    model: String,
    id: String,
}

impl OpenAiAdapter {
    pub fn new(settings: &AdapterSettings) -> Result<Self> {
        if settings.api_key.trim().is_empty() {
            bail!("OpenAI API key must be provided via CODEWARDEN_API_KEY");
        }
        let base = settings
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));
        let http = Client::builder()
            .user_agent("codewarden/0.3")
            .timeout(Duration::from_secs(settings.timeout_secs.unwrap_or(60)))
            .build()
            .context("failed to build OpenAI HTTP client")?;
        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        Ok(Self {
            http,
            url,
            api_key: settings.api_key.clone(),
            id: format!("openai:{model}"),
            model,
        })
    }

    async fn send(&self, payload: &ChatCompletionRequest) -> Result<String> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .context("failed to call OpenAI chat completions API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("OpenAI API error ({}): {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("failed to parse OpenAI response")?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("OpenAI response missing message content"))
    }
}

#[async_trait]
impl ModelAdapter for OpenAiAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<ReportedFinding>> {
        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_user_prompt(request),
                },
            ],
            temperature: 0.0,
        };
        let content = self.send(&payload).await?;
        Ok(parse_findings(&content, request, &self.id))
    }

    async fn health(&self) -> Result<AdapterHealth> {
        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: "Reply with the single word: ok".into(),
            }],
            temperature: 0.0,
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
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn base_settings(url: String) -> AdapterSettings {
        AdapterSettings {
            provider: "openai".into(),
            api_key: "test-key".into(),
            endpoint: Some(url),
            model: None,
            timeout_secs: Some(5),
            max_retries: 0,
        }
    }

    fn chunk_request() -> AnalysisRequest {
        AnalysisRequest {
            file_path: "src/run.sh".into(),
            language: "Shell".into(),
            code: "eval \"$USER_INPUT\"".into(),
            line_start: 3,
            line_end: 3,
            cwe_hints: vec!["CWE-78".into()],
        }
    }

    #[test]
    fn builder_defaults_model_when_missing() {
        let adapter = OpenAiAdapter::new(&base_settings("http://localhost".into())).unwrap();
        assert_eq!(adapter.id(), "openai:gpt-4o-mini");
    }

    #[test]
    fn builder_requires_api_key() {
        let mut settings = base_settings("http://localhost".into());
        settings.api_key = String::new();
        assert!(OpenAiAdapter::new(&settings).is_err());
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn analyze_parses_fenced_findings() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"choices":[{"message":{"content":"```json\n{\"findings\":[{\"name\":\"Command Injection\",\"cwe\":\"CWE-78\",\"severity\":\"critical\",\"confidence\":0.8,\"start_line\":3,\"end_line\":3}]}\n```"}}]}"#);
        });

        let adapter = OpenAiAdapter::new(&base_settings(server.base_url())).unwrap();
        let findings = adapter.analyze(&chunk_request()).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].name, "Command Injection");
        mock.assert();
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn api_error_surfaces_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(429).body("rate limited");
        });

        let adapter = OpenAiAdapter::new(&base_settings(server.base_url())).unwrap();
        let err = adapter.analyze(&chunk_request()).await.unwrap_err();
        assert!(err.to_string().contains("OpenAI API error"));
    }
}
