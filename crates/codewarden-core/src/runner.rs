use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::adapter::prompt::{cwe_hints_for_language, language_for_path};
use crate::adapter::{AnalysisRequest, ModelAdapter, ReportedFinding};
use crate::engine::fingerprint::{fingerprint, COARSE_CONFIDENCE_FACTOR};
use crate::engine::store::ScanStore;
use crate::engine::{Finding, ScanError, ScanResult};

/// Source files for one scan, keyed by display path.
pub type SourceSet = BTreeMap<String, String>;

/// Tunables for scan execution.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Lines per analysis chunk handed to a model.
    pub chunk_lines: usize,
    /// Treat a scan with failed models as an error instead of a partial result.
    pub strict: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            chunk_lines: 400,
            strict: false,
        }
    }
}

/// Drives model adapters over a source set and collects their findings into
/// the store.
///
/// Each adapter runs as its own task; model inference dominates scan latency,
/// so model-level parallelism is the scalability lever. One model's failure
/// never prevents consensus over the others' results.
pub struct ScanRunner {
    store: Arc<ScanStore>,
    config: RunnerConfig,
}

impl ScanRunner {
    pub fn new(store: Arc<ScanStore>) -> Self {
        Self::with_config(store, RunnerConfig::default())
    }

    pub fn with_config(store: Arc<ScanStore>, config: RunnerConfig) -> Self {
        Self { store, config }
    }

    /// Run one scan to completion and return the frozen result.
    ///
    /// The scan is registered up front so `get_result` observes it (empty)
    /// while model passes are still in flight. Abort is cooperative: tasks
    /// check the scan between chunks and stop once it closes.
    #[instrument(skip(self, sources, adapters), fields(files = sources.len(), models = adapters.len()))]
    pub async fn run(
        &self,
        scan_id: &str,
        sources: SourceSet,
        adapters: Vec<Arc<dyn ModelAdapter>>,
    ) -> Result<ScanResult, ScanError> {
        self.store.start_scan(scan_id);
        let sources = Arc::new(sources);

        let mut tasks = JoinSet::new();
        for adapter in adapters {
            let store = Arc::clone(&self.store);
            let sources = Arc::clone(&sources);
            let scan_id = scan_id.to_string();
            let chunk_lines = self.config.chunk_lines;
            tasks.spawn(async move {
                run_model_pass(store, sources, scan_id, adapter, chunk_lines).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(%err, "model task did not run to completion");
            }
        }

        self.store.finalize(scan_id)?;
        let result = self.store.get_result(scan_id)?;
        if self.config.strict {
            if let Some(err) = result.partial_error() {
                return Err(err);
            }
        }
        Ok(result)
    }
}

/// One model's pass over every chunk of every source file.
///
/// A chunk-level adapter error fails the whole pass: the partial findings are
/// dropped and the failure recorded, so a retry replaces the pass wholesale
/// instead of mixing two attempts.
async fn run_model_pass(
    store: Arc<ScanStore>,
    sources: Arc<SourceSet>,
    scan_id: String,
    adapter: Arc<dyn ModelAdapter>,
    chunk_lines: usize,
) {
    let model_id = adapter.id().to_string();
    let mut findings = Vec::new();
    let mut failure: Option<String> = None;

    'files: for (path, content) in sources.iter() {
        let language = language_for_path(path).unwrap_or("Unknown");
        let cwe_hints = cwe_hints_for_language(language);
        for (chunk, line_start, line_end) in chunk_file(content, chunk_lines) {
            if !store.is_open(&scan_id) {
                debug!(%model_id, %scan_id, "scan closed mid-pass; stopping");
                return;
            }
            let request = AnalysisRequest {
                file_path: path.clone(),
                language: language.to_string(),
                code: chunk,
                line_start,
                line_end,
                cwe_hints: cwe_hints.clone(),
            };
            match adapter.analyze(&request).await {
                Ok(reported) => {
                    findings.extend(tag_findings(path, content, reported));
                }
                Err(err) => {
                    failure = Some(format!(
                        "analysis failed at {path}:{line_start}: {err:#}"
                    ));
                    break 'files;
                }
            }
        }
    }

    let outcome = match failure {
        Some(reason) => store.record_model_failure(&scan_id, &model_id, &reason),
        None => store.complete_model(&scan_id, &model_id, findings),
    };
    match outcome {
        Ok(()) => debug!(%model_id, %scan_id, "model pass recorded"),
        Err(ScanError::ScanClosed { .. }) => {
            debug!(%model_id, %scan_id, "scan closed before pass landed; discarding")
        }
        Err(err) => warn!(%model_id, %scan_id, %err, "failed to record model pass"),
    }
}

/// Tag raw model output with fingerprints derived from the actual source.
///
/// Line numbers beyond the file fall back to the coarse fingerprint and a
/// dampened confidence; in-range findings hash the flagged region so the
/// identity survives line drift between scans.
fn tag_findings(path: &str, content: &str, reported: Vec<ReportedFinding>) -> Vec<Finding> {
    let total_lines = content.lines().count() as u32;
    reported
        .into_iter()
        .map(|item| {
            let start_line = item.start_line.max(1);
            let end_line = item.end_line.max(start_line).min(total_lines.max(start_line));
            let region = extract_region(content, start_line, end_line);
            let print = fingerprint(path, &item.cwe, region.as_deref(), (start_line, end_line));
            let confidence = if print.coarse {
                item.confidence * COARSE_CONFIDENCE_FACTOR
            } else {
                item.confidence
            };
            Finding {
                name: item.name,
                message: item.message,
                cwe: item.cwe,
                severity: item.severity,
                confidence,
                file: path.to_string(),
                start_line,
                end_line,
                fingerprint: print.value,
            }
        })
        .collect()
}

fn extract_region(content: &str, start_line: u32, end_line: u32) -> Option<String> {
    let start = start_line.saturating_sub(1) as usize;
    let count = (end_line - start_line + 1) as usize;
    let lines: Vec<&str> = content.lines().skip(start).take(count).collect();
    if lines.is_empty() {
        return None;
    }
    Some(lines.join("\n"))
}

/// Split a file into `chunk_lines`-sized pieces with 1-indexed line ranges.
fn chunk_file(content: &str, chunk_lines: usize) -> Vec<(String, u32, u32)> {
    let lines: Vec<&str> = content.lines().collect();
    let chunk_lines = chunk_lines.max(1);
    let mut chunks = Vec::new();
    let mut offset = 0usize;
    while offset < lines.len() {
        let end = (offset + chunk_lines).min(lines.len());
        chunks.push((
            lines[offset..end].join("\n"),
            offset as u32 + 1,
            end as u32,
        ));
        offset = end;
    }
    chunks
}
