use serde::Deserialize;
use tracing::warn;

use super::{AnalysisRequest, ReportedFinding};
use crate::engine::Severity;

/// Parse a model's findings payload leniently.
///
/// Models fence their JSON, emit trailing commas, or truncate strings often
/// enough that strict parsing would discard usable passes. The ladder is:
/// strict JSON, then string-sanitized JSON, then JSON5. A payload that still
/// fails yields an empty finding list with a warning — a malformed response
/// must not fail the model's whole pass.
pub fn parse_findings(raw: &str, request: &AnalysisRequest, model_id: &str) -> Vec<ReportedFinding> {
    let payload = extract_json_payload(raw);
    let value = match parse_value(&payload) {
        Some(value) => value,
        None => {
            warn!(
                model_id,
                file = %request.file_path,
                "model response could not be parsed even with relaxed JSON; treating as no findings"
            );
            return Vec::new();
        }
    };

    let items = match value.get("findings").and_then(|f| f.as_array()) {
        Some(items) => items.clone(),
        None => match value.as_array() {
            Some(items) => items.clone(),
            None => {
                warn!(
                    model_id,
                    file = %request.file_path,
                    "model response JSON has no findings array; treating as no findings"
                );
                return Vec::new();
            }
        },
    };

    let mut findings = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<RawFinding>(item) {
            Ok(raw_finding) => findings.push(raw_finding.into_reported(request)),
            Err(err) => warn!(model_id, %err, "skipping malformed finding entry"),
        }
    }
    findings
}

fn parse_value(payload: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(payload) {
        return Some(value);
    }
    let sanitized = sanitize_json_strings(payload);
    if sanitized != payload {
        if let Ok(value) = serde_json::from_str(&sanitized) {
            return Some(value);
        }
    }
    json5::from_str(&sanitized).ok()
}

#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(default = "default_name")]
    name: String,
    #[serde(default)]
    message: String,
    #[serde(default = "default_cwe")]
    cwe: String,
    #[serde(default = "default_severity")]
    severity: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    start_line: u32,
    #[serde(default)]
    end_line: u32,
}

fn default_name() -> String {
    "Security Issue".into()
}

fn default_cwe() -> String {
    "CWE-20".into()
}

fn default_severity() -> String {
    "medium".into()
}

fn default_confidence() -> f64 {
    0.5
}

impl RawFinding {
    /// Normalize a raw entry: unknown severities fall back to medium,
    /// confidence is clamped, absent line numbers default to the chunk range
    /// and inverted ranges are swapped.
    fn into_reported(self, request: &AnalysisRequest) -> ReportedFinding {
        let severity = Severity::from_label(&self.severity).unwrap_or(Severity::Medium);
        let mut start_line = self.start_line.max(1);
        let mut end_line = if self.end_line == 0 {
            start_line
        } else {
            self.end_line
        };
        if self.start_line == 0 && self.end_line == 0 {
            start_line = request.line_start;
            end_line = request.line_end;
        }
        if start_line > end_line {
            std::mem::swap(&mut start_line, &mut end_line);
        }
        ReportedFinding {
            name: self.name,
            message: self.message,
            cwe: self.cwe,
            severity,
            confidence: self.confidence.clamp(0.0, 1.0),
            start_line,
            end_line,
        }
    }
}

fn extract_json_payload(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(stripped) = strip_code_fence(trimmed) {
        return stripped;
    }
    trimmed.to_string()
}

fn strip_code_fence(input: &str) -> Option<String> {
    let mut trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return None;
    }
    trimmed = trimmed.trim_start_matches("```");
    trimmed = trimmed.trim_start_matches(|c: char| c.is_ascii_whitespace());
    if let Some(rest) = trimmed.strip_prefix("json") {
        trimmed = rest.trim_start_matches(|c: char| c.is_ascii_whitespace());
    }
    trimmed = trimmed.trim_start_matches('\n');
    let end = trimmed.rfind("```").unwrap_or(trimmed.len());
    let fenced = &trimmed[..end];
    Some(fenced.trim().to_string())
}

/// Close unterminated strings and unbalanced brackets so a truncated model
/// response still has a chance of parsing. Unclosed scopes are tracked as a
/// stack and closed in reverse nesting order.
fn sanitize_json_strings(payload: &str) -> String {
    let mut result = String::with_capacity(payload.len());
    let mut in_string = false;
    let mut escape = false;
    let mut open_scopes: Vec<char> = Vec::new();

    for ch in payload.chars() {
        if in_string {
            if escape {
                result.push(ch);
                escape = false;
            } else {
                match ch {
                    '\\' => {
                        result.push(ch);
                        escape = true;
                    }
                    '"' => {
                        result.push(ch);
                        in_string = false;
                    }
                    '\n' => {
                        result.push('\\');
                        result.push('n');
                    }
                    _ => result.push(ch),
                }
            }
        } else {
            result.push(ch);
            match ch {
                '"' => in_string = true,
                '{' => open_scopes.push('}'),
                '[' => open_scopes.push(']'),
                '}' | ']' => {
                    open_scopes.pop();
                }
                _ => {}
            }
        }
    }

    if in_string {
        result.push('"');
    }
    while let Some(closer) = open_scopes.pop() {
        result.push(closer);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn request() -> AnalysisRequest {
        AnalysisRequest {
            file_path: "src/db.py".into(),
            language: "Python".into(),
            code: "cursor.execute(query)".into(),
            line_start: 40,
            line_end: 60,
            cwe_hints: vec!["CWE-89".into()],
        }
    }

    #[test]
    fn parses_strict_findings_document() {
        let payload = r#"{"findings":[{"name":"SQL Injection","message":"string concat","cwe":"CWE-89","severity":"high","confidence":0.9,"start_line":42,"end_line":43}]}"#;
        let findings = parse_findings(payload, &request(), "model-a");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].name, "SQL Injection");
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].start_line, 42);
    }

    #[test]
    fn strips_markdown_fences() {
        let payload = "```json\n{\"findings\":[{\"name\":\"XSS\",\"severity\":\"low\"}]}\n```";
        let findings = parse_findings(payload, &request(), "model-a");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Low);
    }

    #[test]
    fn accepts_a_bare_findings_array() {
        let payload = r#"[{"name":"Hardcoded Secret","severity":"high","start_line":5}]"#;
        let findings = parse_findings(payload, &request(), "model-a");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].end_line, 5);
    }

    #[test]
    fn recovers_json5_style_output() {
        let payload = "{findings: [{name: 'Eval Use', severity: 'critical', start_line: 3, end_line: 4,},],}";
        let findings = parse_findings(payload, &request(), "model-a");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn recovers_truncated_response() {
        let payload = r#"{"findings":[{"name":"SQL Injection","severity":"high","message":"cut off"#;
        let findings = parse_findings(payload, &request(), "model-a");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn garbage_yields_no_findings() {
        assert!(parse_findings("the code looks fine to me!", &request(), "model-a").is_empty());
        assert!(parse_findings("", &request(), "model-a").is_empty());
        assert!(parse_findings("{\"verdict\": \"clean\"}", &request(), "model-a").is_empty());
    }

    #[test]
    fn unknown_severity_defaults_to_medium() {
        let payload = r#"{"findings":[{"name":"Odd","severity":"catastrophic","start_line":1}]}"#;
        let findings = parse_findings(payload, &request(), "model-a");
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[test]
    fn missing_lines_default_to_chunk_range() {
        let payload = r#"{"findings":[{"name":"Vague"}]}"#;
        let findings = parse_findings(payload, &request(), "model-a");
        assert_eq!(findings[0].start_line, 40);
        assert_eq!(findings[0].end_line, 60);
        assert!((findings[0].confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn inverted_ranges_are_swapped_and_confidence_clamped() {
        let payload =
            r#"{"findings":[{"name":"Swap","start_line":9,"end_line":3,"confidence":3.5}]}"#;
        let findings = parse_findings(payload, &request(), "model-a");
        assert_eq!(findings[0].start_line, 3);
        assert_eq!(findings[0].end_line, 9);
        assert!((findings[0].confidence - 1.0).abs() < f64::EPSILON);
    }

    fn json_body_strategy() -> impl Strategy<Value = String> {
        proptest::string::string_regex("\\{\"findings\": \\[\\]\\}|\\[\\]").unwrap()
    }

    proptest! {
        #[test]
        fn fenced_payloads_parse_like_unfenced(body in json_body_strategy()) {
            let fenced = format!("```json\n{body}\n```");
            let direct = parse_findings(&body, &request(), "model-a");
            let stripped = parse_findings(&fenced, &request(), "model-a");
            prop_assert_eq!(direct, stripped);
        }
    }
}
