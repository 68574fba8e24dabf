mod settings;

pub mod anthropic;
pub mod heuristic;
pub mod openai;
pub mod parse;
pub mod prompt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::Severity;

pub use settings::AdapterSettings;

/// Analysis backends the engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAi,
    Heuristic,
}

/// Coarse grouping used for display and scheduling decisions. Kept as an
/// explicit table so a new provider must declare its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCategory {
    CloudLlm,
    LocalAnalyzer,
}

impl Provider {
    pub fn category(self) -> ProviderCategory {
        match self {
            Self::Anthropic | Self::OpenAi => ProviderCategory::CloudLlm,
            Self::Heuristic => ProviderCategory::LocalAnalyzer,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Heuristic => "heuristic",
        }
    }

    /// Parse a provider label case-insensitively.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAi),
            "heuristic" => Some(Self::Heuristic),
            _ => None,
        }
    }
}

/// One chunk of source handed to a model for analysis.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub file_path: String,
    pub language: String,
    pub code: String,
    /// 1-indexed line of the chunk's first code line within the file.
    pub line_start: u32,
    pub line_end: u32,
    /// Weakness classes worth probing for this language.
    pub cwe_hints: Vec<String>,
}

/// Raw finding as reported by a model, before fingerprint tagging.
///
/// Line numbers are absolute within the scanned file; the file path comes
/// from the request, never from the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedFinding {
    pub name: String,
    pub message: String,
    pub cwe: String,
    pub severity: Severity,
    pub confidence: f64,
    pub start_line: u32,
    pub end_line: u32,
}

/// Outcome of an adapter health probe.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterHealth {
    pub healthy: bool,
    pub message: String,
}

/// Analysis engine producing findings for a scan.
#[async_trait]
pub trait ModelAdapter: Send + Sync + std::fmt::Debug {
    /// Stable adapter identifier, conventionally `provider:model`.
    fn id(&self) -> &str;

    fn provider(&self) -> Provider;

    /// Analyze one source chunk and return the findings it triggered.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<ReportedFinding>>;

    /// Cheap reachability/configuration probe.
    async fn health(&self) -> Result<AdapterHealth>;
}
