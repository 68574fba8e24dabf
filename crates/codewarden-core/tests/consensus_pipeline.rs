use std::sync::Arc;

use codewarden_core::adapter::heuristic::HeuristicAdapter;
use codewarden_core::{
    render_result, ModelAdapter, OutputFormat, ScanRunner, ScanStatus, ScanStore, SourceSet,
};

fn vulnerable_sources() -> SourceSet {
    let mut sources = SourceSet::new();
    sources.insert(
        "src/db.py".to_string(),
        concat!(
            "import os\n",
            "PASSWORD = \"super-secret-value\"\n",
            "def lookup(user_id):\n",
            "    query = \"SELECT * FROM users WHERE id = \" + user_id\n",
            "    return run(query)\n",
        )
        .to_string(),
    );
    sources.insert(
        "src/tools.py".to_string(),
        "def launch(cmd):\n    os.system(cmd)\n    return eval(cmd)\n".to_string(),
    );
    sources
}

fn heuristic() -> Vec<Arc<dyn ModelAdapter>> {
    vec![Arc::new(HeuristicAdapter::new())]
}

#[tokio::test(flavor = "current_thread")]
async fn full_pipeline_produces_ordered_consensus() {
    let store = Arc::new(ScanStore::new());
    let runner = ScanRunner::new(Arc::clone(&store));
    let result = runner
        .run("scan-pipeline", vulnerable_sources(), heuristic())
        .await
        .expect("scan should complete");

    assert_eq!(result.status, ScanStatus::Complete);
    assert!(!result.consensus_findings.is_empty());
    assert_eq!(
        result.summary.total_findings,
        result.consensus_findings.len()
    );

    // ordering: severity descending, confidence descending within severity
    let pairs: Vec<_> = result
        .consensus_findings
        .iter()
        .map(|c| (c.finding.severity, c.finding.confidence))
        .collect();
    for window in pairs.windows(2) {
        let (prev_sev, prev_conf) = window[0];
        let (next_sev, next_conf) = window[1];
        assert!(prev_sev >= next_sev);
        if prev_sev == next_sev {
            assert!(prev_conf >= next_conf);
        }
    }

    // every consensus entry is backed by the model that reported it
    for item in &result.consensus_findings {
        assert!(item.supporting_models.contains("heuristic:builtin"));
    }
}

#[tokio::test(flavor = "current_thread")]
async fn identical_inputs_yield_identical_consensus() {
    let store = Arc::new(ScanStore::new());
    let runner = ScanRunner::new(Arc::clone(&store));

    let first = runner
        .run("scan-a", vulnerable_sources(), heuristic())
        .await
        .unwrap();
    let second = runner
        .run("scan-b", vulnerable_sources(), heuristic())
        .await
        .unwrap();

    let first_json = serde_json::to_string(&first.consensus_findings).unwrap();
    let second_json = serde_json::to_string(&second.consensus_findings).unwrap();
    assert_eq!(first_json, second_json);
}

#[tokio::test(flavor = "current_thread")]
async fn json_rendering_matches_wire_contract() {
    let store = Arc::new(ScanStore::new());
    let runner = ScanRunner::new(Arc::clone(&store));
    let result = runner
        .run("scan-wire", vulnerable_sources(), heuristic())
        .await
        .unwrap();

    let rendered = render_result(&result, OutputFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
    assert_eq!(value["scan_id"], "scan-wire");
    assert_eq!(value["status"], "complete");
    let first = &value["consensus_findings"][0];
    assert!(first["fingerprint"].as_str().unwrap().len() == 16);
    assert!(first["confidence"].as_f64().unwrap() <= 1.0);
    assert!(value["per_model_findings"]["heuristic:builtin"].is_array());
}
