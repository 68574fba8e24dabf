use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod consensus;
pub mod fingerprint;
pub mod store;

/// Findings grouped by the model that reported them, ordered by model id.
pub type ModelFindingSet = BTreeMap<String, Vec<Finding>>;

/// Closed severity scale with a fixed total order (`Low < Medium < High < Critical`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Wire label used in JSON output and CLI rendering.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parse a severity label case-insensitively.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// A single vulnerability instance reported by one model, immutable once tagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub name: String,
    pub message: String,
    /// Weakness classifier id, e.g. `CWE-89`.
    pub cwe: String,
    pub severity: Severity,
    /// Model-assigned confidence within `0.0..=1.0`.
    pub confidence: f64,
    pub file: String,
    /// 1-indexed inclusive line range with `start_line <= end_line`.
    pub start_line: u32,
    pub end_line: u32,
    pub fingerprint: String,
}

impl Finding {
    /// Validate line-range and confidence invariants.
    pub fn validate(&self) -> Result<(), FindingValidationError> {
        if self.start_line == 0 || self.start_line > self.end_line {
            return Err(FindingValidationError::InvalidLineRange {
                file: self.file.clone(),
                start_line: self.start_line,
                end_line: self.end_line,
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(FindingValidationError::InvalidConfidence {
                file: self.file.clone(),
                confidence: self.confidence,
            });
        }
        Ok(())
    }
}

/// Validation errors for findings entering the store.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FindingValidationError {
    #[error("finding in `{file}` has invalid line range {start_line}..{end_line} (1-indexed, start <= end)")]
    InvalidLineRange {
        file: String,
        start_line: u32,
        end_line: u32,
    },
    #[error("finding in `{file}` confidence must be within 0.0..=1.0 (got {confidence})")]
    InvalidConfidence { file: String, confidence: f64 },
}

/// Cross-model representation of one underlying issue.
///
/// Carries the representative finding fields flattened at the top level so the
/// wire shape matches a plain finding, plus the set of models that agreed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusFinding {
    #[serde(flatten)]
    pub finding: Finding,
    pub supporting_models: BTreeSet<String>,
}

/// Lifecycle of a scan record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Complete,
    Aborted,
}

/// Per-severity counts plus model completion metadata for quick display.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total_findings: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub models_completed: Vec<String>,
    pub models_failed: Vec<String>,
}

impl ScanSummary {
    pub fn compute(
        consensus: &[ConsensusFinding],
        completed: impl IntoIterator<Item = String>,
        failed: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut summary = Self {
            total_findings: consensus.len(),
            models_completed: completed.into_iter().collect(),
            models_failed: failed.into_iter().collect(),
            ..Self::default()
        };
        for item in consensus {
            match item.finding.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
            }
        }
        summary
    }
}

/// Top-level record for one scan; the serialized form is the stable wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: String,
    pub status: ScanStatus,
    pub summary: ScanSummary,
    pub consensus_findings: Vec<ConsensusFinding>,
    pub per_model_findings: ModelFindingSet,
    /// Models that did not complete, with the recorded reason.
    pub model_failures: BTreeMap<String, String>,
}

impl ScanResult {
    /// Partial-result error for callers that treat incomplete model coverage as fatal.
    pub fn partial_error(&self) -> Option<ScanError> {
        if self.model_failures.is_empty() {
            return None;
        }
        Some(ScanError::PartialResult {
            scan_id: self.scan_id.clone(),
            failed_models: self.model_failures.keys().cloned().collect(),
        })
    }
}

/// Errors surfaced by scan lifecycle operations.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanError {
    #[error("scan `{scan_id}` not found")]
    NotFound { scan_id: String },
    #[error("scan `{scan_id}` is closed and no longer accepts model results")]
    ScanClosed { scan_id: String },
    #[error("scan `{scan_id}` completed without results from: {failed_models:?}")]
    PartialResult {
        scan_id: String,
        failed_models: Vec<String>,
    },
}
