use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument};

use super::{ConsensusFinding, Finding, ModelFindingSet};

/// Reduce the per-model finding lists of one scan into a deduplicated,
/// confidence-weighted consensus list.
///
/// Findings from different models with the same fingerprint merge into a
/// single [`ConsensusFinding`]; a fingerprint seen by only one model still
/// produces an entry, its lower trust surfaced through the combined
/// confidence rather than by exclusion.
#[instrument(skip(per_model), fields(models = per_model.len()))]
pub fn build_consensus(per_model: &ModelFindingSet) -> Vec<ConsensusFinding> {
    let mut groups: BTreeMap<&str, Vec<(&str, &Finding)>> = BTreeMap::new();
    for (model_id, findings) in per_model {
        for finding in findings {
            groups
                .entry(finding.fingerprint.as_str())
                .or_default()
                .push((model_id.as_str(), finding));
        }
    }

    let mut consensus: Vec<ConsensusFinding> = groups
        .into_values()
        .map(|members| merge_group(&members))
        .collect();

    consensus.sort_by(|a, b| {
        b.finding
            .severity
            .cmp(&a.finding.severity)
            .then_with(|| {
                b.finding
                    .confidence
                    .partial_cmp(&a.finding.confidence)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.finding.file.cmp(&b.finding.file))
            .then_with(|| a.finding.start_line.cmp(&b.finding.start_line))
            .then_with(|| a.finding.fingerprint.cmp(&b.finding.fingerprint))
    });

    debug!(groups = consensus.len(), "consensus rebuilt");
    consensus
}

/// Merge one fingerprint group. Severity takes the maximum observed (most
/// severe wins); representative fields come from the highest-confidence
/// member, ties resolved toward the lexicographically smallest model id.
fn merge_group(members: &[(&str, &Finding)]) -> ConsensusFinding {
    let mut supporting_models = BTreeSet::new();
    let mut severity = members[0].1.severity;
    let mut representative = members[0].1;
    let mut miss_product = 1.0f64;

    for &(model_id, finding) in members {
        supporting_models.insert(model_id.to_string());
        severity = severity.max(finding.severity);
        // members arrive in ascending model-id order, so strict `>` keeps the
        // smallest model id on confidence ties
        if finding.confidence > representative.confidence {
            representative = finding;
        }
        miss_product *= 1.0 - finding.confidence.clamp(0.0, 1.0);
    }

    let mut finding = representative.clone();
    finding.severity = severity;
    finding.confidence = (1.0 - miss_product).clamp(0.0, 1.0);

    ConsensusFinding {
        finding,
        supporting_models,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Severity;
    use proptest::prelude::*;

    fn finding(
        fingerprint: &str,
        severity: Severity,
        confidence: f64,
        file: &str,
        start_line: u32,
    ) -> Finding {
        Finding {
            name: format!("issue-{fingerprint}"),
            message: format!("detail for {fingerprint}"),
            cwe: "CWE-89".into(),
            severity,
            confidence,
            file: file.into(),
            start_line,
            end_line: start_line + 2,
            fingerprint: fingerprint.into(),
        }
    }

    fn set_of(entries: Vec<(&str, Vec<Finding>)>) -> ModelFindingSet {
        entries
            .into_iter()
            .map(|(model, findings)| (model.to_string(), findings))
            .collect()
    }

    #[test]
    fn merges_matching_fingerprints_with_independent_evidence() {
        let per_model = set_of(vec![
            (
                "model-a",
                vec![finding("f1", Severity::High, 0.6, "src/db.py", 10)],
            ),
            (
                "model-b",
                vec![finding("f1", Severity::Critical, 0.7, "src/db.py", 10)],
            ),
        ]);

        let consensus = build_consensus(&per_model);
        assert_eq!(consensus.len(), 1);
        let merged = &consensus[0];
        assert_eq!(merged.finding.severity, Severity::Critical);
        assert!((merged.finding.confidence - 0.88).abs() < 1e-9);
        assert_eq!(
            merged.supporting_models,
            ["model-a".to_string(), "model-b".to_string()]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn single_model_fingerprint_still_produces_consensus() {
        let per_model = set_of(vec![(
            "model-a",
            vec![finding("solo", Severity::Medium, 0.5, "app.py", 3)],
        )]);
        let consensus = build_consensus(&per_model);
        assert_eq!(consensus.len(), 1);
        assert_eq!(consensus[0].supporting_models.len(), 1);
        assert!((consensus[0].finding.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn representative_fields_come_from_highest_confidence_member() {
        let mut weaker = finding("f1", Severity::Low, 0.4, "src/db.py", 10);
        weaker.message = "vague".into();
        let mut stronger = finding("f1", Severity::Low, 0.9, "src/db.py", 10);
        stronger.message = "precise".into();

        let per_model = set_of(vec![("model-a", vec![weaker]), ("model-b", vec![stronger])]);
        let consensus = build_consensus(&per_model);
        assert_eq!(consensus[0].finding.message, "precise");
    }

    #[test]
    fn confidence_ties_resolve_toward_smallest_model_id() {
        let mut from_a = finding("f1", Severity::High, 0.5, "src/db.py", 10);
        from_a.message = "from a".into();
        let mut from_b = finding("f1", Severity::High, 0.5, "src/db.py", 10);
        from_b.message = "from b".into();

        let per_model = set_of(vec![("model-b", vec![from_b]), ("model-a", vec![from_a])]);
        let consensus = build_consensus(&per_model);
        assert_eq!(consensus[0].finding.message, "from a");
    }

    #[test]
    fn orders_by_severity_then_confidence_then_location() {
        let per_model = set_of(vec![(
            "model-a",
            vec![
                finding("low", Severity::Low, 0.9, "a.py", 1),
                finding("crit", Severity::Critical, 0.3, "z.py", 99),
                finding("high-late", Severity::High, 0.6, "b.py", 40),
                finding("high-early", Severity::High, 0.6, "b.py", 5),
                finding("high-strong", Severity::High, 0.8, "c.py", 70),
            ],
        )]);
        let fingerprints: Vec<_> = build_consensus(&per_model)
            .into_iter()
            .map(|c| c.finding.fingerprint)
            .collect();
        assert_eq!(
            fingerprints,
            vec!["crit", "high-strong", "high-early", "high-late", "low"]
        );
    }

    #[test]
    fn rebuild_is_deterministic() {
        let per_model = set_of(vec![
            (
                "model-b",
                vec![
                    finding("f1", Severity::High, 0.6, "src/db.py", 10),
                    finding("f2", Severity::Low, 0.2, "app.py", 7),
                ],
            ),
            (
                "model-a",
                vec![finding("f1", Severity::Critical, 0.7, "src/db.py", 10)],
            ),
        ]);
        let first = serde_json::to_string(&build_consensus(&per_model)).unwrap();
        let second = serde_json::to_string(&build_consensus(&per_model)).unwrap();
        assert_eq!(first, second);
    }

    fn arbitrary_members() -> impl Strategy<Value = Vec<(usize, usize, Severity, f64)>> {
        proptest::collection::vec(
            (
                0usize..3,
                0usize..4,
                prop_oneof![
                    Just(Severity::Low),
                    Just(Severity::Medium),
                    Just(Severity::High),
                    Just(Severity::Critical),
                ],
                0.0f64..=1.0,
            ),
            1..24,
        )
    }

    proptest! {
        #[test]
        fn consensus_dominates_member_severity_and_confidence(members in arbitrary_members()) {
            const MODELS: [&str; 3] = ["model-a", "model-b", "model-c"];
            const PRINTS: [&str; 4] = ["f1", "f2", "f3", "f4"];

            let mut per_model = ModelFindingSet::new();
            for (model_idx, print_idx, severity, confidence) in &members {
                per_model
                    .entry(MODELS[*model_idx].to_string())
                    .or_default()
                    .push(finding(PRINTS[*print_idx], *severity, *confidence, "x.py", 1));
            }

            let consensus = build_consensus(&per_model);
            let distinct: BTreeSet<_> = members.iter().map(|(_, p, _, _)| *p).collect();
            prop_assert_eq!(consensus.len(), distinct.len());

            for item in &consensus {
                prop_assert!((0.0..=1.0).contains(&item.finding.confidence));
                for (model_idx, print_idx, severity, confidence) in &members {
                    if PRINTS[*print_idx] == item.finding.fingerprint {
                        prop_assert!(item.finding.severity >= *severity);
                        prop_assert!(item.finding.confidence >= *confidence - 1e-9);
                        prop_assert!(item
                            .supporting_models
                            .contains(MODELS[*model_idx]));
                    }
                }
            }
        }
    }
}
