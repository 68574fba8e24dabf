use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, instrument, warn};

use super::consensus::build_consensus;
use super::{
    ConsensusFinding, Finding, ModelFindingSet, ScanError, ScanResult, ScanStatus, ScanSummary,
};

#[derive(Debug)]
struct ScanState {
    status: ScanStatus,
    findings: ModelFindingSet,
    failures: BTreeMap<String, String>,
    consensus: Vec<ConsensusFinding>,
    write_generation: u64,
    consensus_generation: u64,
}

impl ScanState {
    fn new() -> Self {
        Self {
            status: ScanStatus::Running,
            findings: ModelFindingSet::new(),
            failures: BTreeMap::new(),
            consensus: Vec::new(),
            write_generation: 0,
            consensus_generation: 0,
        }
    }
}

/// In-memory scan registry owning per-model findings and the consensus view.
///
/// Writes to a scan serialize on the store lock; the consensus rebuild runs
/// on a cloned snapshot outside the lock and is installed only when no newer
/// rebuild has landed, so concurrent `complete_model` calls for distinct
/// models never lose updates or publish stale merges.
#[derive(Debug, Default)]
pub struct ScanStore {
    scans: RwLock<HashMap<String, ScanState>>,
}

impl ScanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an empty scan record. Starting an id that already exists
    /// leaves the existing record untouched.
    pub fn start_scan(&self, scan_id: &str) {
        let mut scans = self.scans.write().unwrap_or_else(PoisonError::into_inner);
        if scans.contains_key(scan_id) {
            warn!(scan_id, "scan already started; keeping existing record");
            return;
        }
        scans.insert(scan_id.to_string(), ScanState::new());
        debug!(scan_id, "scan started");
    }

    /// Record one model's completed pass and rebuild the consensus view.
    ///
    /// A repeat call for the same `(scan_id, model_id)` replaces the previous
    /// findings, never appends, so a failed model pass can be retried
    /// idempotently. Findings violating their own invariants are dropped with
    /// a warning rather than failing the whole pass.
    #[instrument(skip(self, findings), fields(count = findings.len()))]
    pub fn complete_model(
        &self,
        scan_id: &str,
        model_id: &str,
        findings: Vec<Finding>,
    ) -> Result<(), ScanError> {
        let (snapshot, generation) = {
            let mut scans = self.scans.write().unwrap_or_else(PoisonError::into_inner);
            let state = scans.get_mut(scan_id).ok_or_else(|| ScanError::NotFound {
                scan_id: scan_id.to_string(),
            })?;
            if state.status != ScanStatus::Running {
                return Err(ScanError::ScanClosed {
                    scan_id: scan_id.to_string(),
                });
            }

            let mut accepted = Vec::with_capacity(findings.len());
            for finding in findings {
                match finding.validate() {
                    Ok(()) => accepted.push(finding),
                    Err(err) => warn!(model_id, %err, "dropping invalid finding"),
                }
            }

            state.failures.remove(model_id);
            state.findings.insert(model_id.to_string(), accepted);
            state.write_generation += 1;
            (state.findings.clone(), state.write_generation)
        };

        let consensus = build_consensus(&snapshot);

        let mut scans = self.scans.write().unwrap_or_else(PoisonError::into_inner);
        let state = scans.get_mut(scan_id).ok_or_else(|| ScanError::NotFound {
            scan_id: scan_id.to_string(),
        })?;
        if state.consensus_generation < generation {
            state.consensus_generation = generation;
            state.consensus = consensus;
        } else {
            debug!(scan_id, generation, "discarding stale consensus rebuild");
        }
        Ok(())
    }

    /// Record that a model's pass did not complete. The failure is isolated:
    /// findings already recorded for other models stay part of the consensus.
    pub fn record_model_failure(
        &self,
        scan_id: &str,
        model_id: &str,
        reason: &str,
    ) -> Result<(), ScanError> {
        let mut scans = self.scans.write().unwrap_or_else(PoisonError::into_inner);
        let state = scans.get_mut(scan_id).ok_or_else(|| ScanError::NotFound {
            scan_id: scan_id.to_string(),
        })?;
        if state.status != ScanStatus::Running {
            return Err(ScanError::ScanClosed {
                scan_id: scan_id.to_string(),
            });
        }
        warn!(scan_id, model_id, reason, "model pass failed");
        state.failures.insert(model_id.to_string(), reason.to_string());
        Ok(())
    }

    /// Freeze the scan. Later `complete_model` calls fail with
    /// [`ScanError::ScanClosed`]. Finalizing an already closed scan is a
    /// no-op and never resurrects an aborted one.
    pub fn finalize(&self, scan_id: &str) -> Result<(), ScanError> {
        let mut scans = self.scans.write().unwrap_or_else(PoisonError::into_inner);
        let state = scans.get_mut(scan_id).ok_or_else(|| ScanError::NotFound {
            scan_id: scan_id.to_string(),
        })?;
        if state.status == ScanStatus::Running {
            state.status = ScanStatus::Complete;
            debug!(scan_id, "scan finalized");
        }
        Ok(())
    }

    /// Abort a running scan. Already recorded per-model findings remain part
    /// of the result; in-flight model tasks observe the closed scan and stop.
    pub fn abort(&self, scan_id: &str) -> Result<(), ScanError> {
        let mut scans = self.scans.write().unwrap_or_else(PoisonError::into_inner);
        let state = scans.get_mut(scan_id).ok_or_else(|| ScanError::NotFound {
            scan_id: scan_id.to_string(),
        })?;
        if state.status == ScanStatus::Running {
            state.status = ScanStatus::Aborted;
            warn!(scan_id, "scan aborted");
        }
        Ok(())
    }

    /// Whether the scan exists and still accepts model results.
    pub fn is_open(&self, scan_id: &str) -> bool {
        let scans = self.scans.read().unwrap_or_else(PoisonError::into_inner);
        scans
            .get(scan_id)
            .map(|state| state.status == ScanStatus::Running)
            .unwrap_or(false)
    }

    /// Snapshot the combined view for one scan.
    pub fn get_result(&self, scan_id: &str) -> Result<ScanResult, ScanError> {
        let scans = self.scans.read().unwrap_or_else(PoisonError::into_inner);
        let state = scans.get(scan_id).ok_or_else(|| ScanError::NotFound {
            scan_id: scan_id.to_string(),
        })?;
        Ok(ScanResult {
            scan_id: scan_id.to_string(),
            status: state.status,
            summary: ScanSummary::compute(
                &state.consensus,
                state.findings.keys().cloned(),
                state.failures.keys().cloned(),
            ),
            consensus_findings: state.consensus.clone(),
            per_model_findings: state.findings.clone(),
            model_failures: state.failures.clone(),
        })
    }
}
