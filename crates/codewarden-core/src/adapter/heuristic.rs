use std::collections::BTreeSet;

use aho_corasick::AhoCorasick;
use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use tracing::trace;

use super::{
    AdapterHealth, AnalysisRequest, ModelAdapter, Provider, ReportedFinding,
};
use crate::engine::Severity;

#[derive(Debug, Clone)]
struct HeuristicRule {
    name: &'static str,
    message: &'static str,
    cwe: &'static str,
    severity: Severity,
    confidence: f64,
}

/// Dangerous-call keywords swept with a single automaton pass.
const KEYWORD_RULES: &[(&str, HeuristicRule)] = &[
    (
        "eval(",
        HeuristicRule {
            name: "Dynamic Code Evaluation",
            message: "eval() executes arbitrary expressions; attacker-influenced input becomes code",
            cwe: "CWE-95",
            severity: Severity::High,
            confidence: 0.6,
        },
    ),
    (
        "exec(",
        HeuristicRule {
            name: "Dynamic Code Execution",
            message: "exec() runs generated code; validate or remove the dynamic path",
            cwe: "CWE-95",
            severity: Severity::Medium,
            confidence: 0.5,
        },
    ),
    (
        "os.system(",
        HeuristicRule {
            name: "Shell Command Execution",
            message: "os.system() passes its argument to the shell unescaped",
            cwe: "CWE-78",
            severity: Severity::High,
            confidence: 0.6,
        },
    ),
    (
        "pickle.loads(",
        HeuristicRule {
            name: "Unsafe Deserialization",
            message: "unpickling untrusted bytes executes arbitrary code during load",
            cwe: "CWE-502",
            severity: Severity::High,
            confidence: 0.65,
        },
    ),
    (
        "innerHTML",
        HeuristicRule {
            name: "DOM Injection Sink",
            message: "assigning to innerHTML renders unescaped markup",
            cwe: "CWE-79",
            severity: Severity::Medium,
            confidence: 0.45,
        },
    ),
    (
        "http://",
        HeuristicRule {
            name: "Cleartext Endpoint",
            message: "plain-HTTP URL transmits data without transport encryption",
            cwe: "CWE-319",
            severity: Severity::Low,
            confidence: 0.35,
        },
    ),
];

/// Regex rules for shapes a keyword sweep cannot express.
const REGEX_RULES: &[(&str, HeuristicRule)] = &[
    (
        r#"(?i)\b(password|passwd|secret|api_key|apikey|token)\s*=\s*["'][^"']{4,}["']"#,
        HeuristicRule {
            name: "Hardcoded Credential",
            message: "credential literal committed to source; move it to configuration",
            cwe: "CWE-798",
            severity: Severity::High,
            confidence: 0.55,
        },
    ),
    (
        r#"(?i)["'](?:select|insert into|update|delete from)\b[^"']*["']\s*\+"#,
        HeuristicRule {
            name: "SQL String Concatenation",
            message: "query assembled by string concatenation; use parameterized statements",
            cwe: "CWE-89",
            severity: Severity::High,
            confidence: 0.5,
        },
    ),
    (
        r"shell\s*=\s*True",
        HeuristicRule {
            name: "Subprocess With Shell",
            message: "shell=True routes the command line through the shell",
            cwe: "CWE-78",
            severity: Severity::High,
            confidence: 0.6,
        },
    ),
];

#[derive(Debug)]
struct CompiledRules {
    keywords: AhoCorasick,
    regexes: Vec<Regex>,
}

/// Network-free analyzer sweeping source chunks for dangerous call patterns.
///
/// Serves as the always-available local model next to the cloud adapters and
/// as the test adapter for everything downstream of the adapter seam. Rules
/// compile on first use and are cached for the adapter's lifetime.
#[derive(Debug)]
pub struct HeuristicAdapter {
    id: String,
    compiled: OnceCell<CompiledRules>,
}

impl Default for HeuristicAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicAdapter {
    pub fn new() -> Self {
        Self {
            id: "heuristic:builtin".to_string(),
            compiled: OnceCell::new(),
        }
    }

    fn rules(&self) -> Result<&CompiledRules> {
        self.compiled.get_or_try_init(|| {
            let patterns: Vec<_> = KEYWORD_RULES.iter().map(|(pattern, _)| *pattern).collect();
            let keywords = AhoCorasick::new(patterns)
                .context("failed to build heuristic keyword automaton")?;
            let mut regexes = Vec::with_capacity(REGEX_RULES.len());
            for (pattern, rule) in REGEX_RULES {
                let regex = Regex::new(pattern).with_context(|| {
                    format!("invalid heuristic pattern for rule {}", rule.name)
                })?;
                regexes.push(regex);
            }
            Ok::<_, anyhow::Error>(CompiledRules { keywords, regexes })
        })
    }
}

#[async_trait]
impl ModelAdapter for HeuristicAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn provider(&self) -> Provider {
        Provider::Heuristic
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<ReportedFinding>> {
        let rules = self.rules()?;
        let code = request.code.as_str();
        let mut findings = Vec::new();
        // one finding per (rule, line); repeated hits on a line add nothing
        let mut seen: BTreeSet<(usize, u32)> = BTreeSet::new();

        for mat in rules.keywords.find_iter(code) {
            let rule_idx = mat.pattern().as_usize();
            let line = request.line_start + line_offset(code, mat.start());
            if seen.insert((rule_idx, line)) {
                findings.push(reported(&KEYWORD_RULES[rule_idx].1, line, line));
            }
        }

        for (rule_idx, regex) in rules.regexes.iter().enumerate() {
            trace!(rule = REGEX_RULES[rule_idx].1.name, "sweeping regex rule");
            for mat in regex.find_iter(code) {
                let start = request.line_start + line_offset(code, mat.start());
                let end = request.line_start + line_offset(code, mat.end().saturating_sub(1));
                if seen.insert((KEYWORD_RULES.len() + rule_idx, start)) {
                    findings.push(reported(&REGEX_RULES[rule_idx].1, start, end));
                }
            }
        }

        findings.sort_by(|a, b| {
            a.start_line
                .cmp(&b.start_line)
                .then_with(|| a.cwe.cmp(&b.cwe))
        });
        Ok(findings)
    }

    async fn health(&self) -> Result<AdapterHealth> {
        match self.rules() {
            Ok(_) => Ok(AdapterHealth {
                healthy: true,
                message: format!(
                    "{} keyword and {} regex rules loaded",
                    KEYWORD_RULES.len(),
                    REGEX_RULES.len()
                ),
            }),
            Err(err) => Ok(AdapterHealth {
                healthy: false,
                message: format!("{err:#}"),
            }),
        }
    }
}

fn reported(rule: &HeuristicRule, start_line: u32, end_line: u32) -> ReportedFinding {
    ReportedFinding {
        name: rule.name.to_string(),
        message: rule.message.to_string(),
        cwe: rule.cwe.to_string(),
        severity: rule.severity,
        confidence: rule.confidence,
        start_line,
        end_line,
    }
}

fn line_offset(code: &str, byte_idx: usize) -> u32 {
    code.as_bytes()[..byte_idx]
        .iter()
        .filter(|&&b| b == b'\n')
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(code: &str, line_start: u32) -> AnalysisRequest {
        AnalysisRequest {
            file_path: "src/app.py".into(),
            language: "Python".into(),
            code: code.into(),
            line_start,
            line_end: line_start + code.lines().count().max(1) as u32 - 1,
            cwe_hints: vec![],
        }
    }

    #[tokio::test]
    async fn flags_dangerous_calls_with_absolute_lines() {
        let adapter = HeuristicAdapter::new();
        let code = "import os\n\nresult = eval(user_input)\nos.system(command)\n";
        let findings = adapter.analyze(&request(code, 100)).await.unwrap();

        let cwes: Vec<_> = findings.iter().map(|f| f.cwe.as_str()).collect();
        assert!(cwes.contains(&"CWE-95"));
        assert!(cwes.contains(&"CWE-78"));
        let eval_finding = findings.iter().find(|f| f.cwe == "CWE-95").unwrap();
        assert_eq!(eval_finding.start_line, 102);
    }

    #[tokio::test]
    async fn flags_hardcoded_credentials_and_sql_concat() {
        let adapter = HeuristicAdapter::new();
        let code = "API_KEY = \"sk-1234567890\"\nquery = \"SELECT * FROM users WHERE id = \" + user_id\n";
        let findings = adapter.analyze(&request(code, 1)).await.unwrap();

        assert!(findings.iter().any(|f| f.cwe == "CWE-798"));
        assert!(findings.iter().any(|f| f.cwe == "CWE-89"));
    }

    #[tokio::test]
    async fn clean_code_produces_no_findings() {
        let adapter = HeuristicAdapter::new();
        let code = "def add(a, b):\n    return a + b\n";
        let findings = adapter.analyze(&request(code, 1)).await.unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn repeated_hits_on_one_line_collapse() {
        let adapter = HeuristicAdapter::new();
        let code = "x = eval(a) + eval(b)\n";
        let findings = adapter.analyze(&request(code, 1)).await.unwrap();
        assert_eq!(findings.iter().filter(|f| f.cwe == "CWE-95").count(), 1);
    }

    #[tokio::test]
    async fn health_reports_rule_counts() {
        let adapter = HeuristicAdapter::new();
        let health = adapter.health().await.unwrap();
        assert!(health.healthy);
        assert!(health.message.contains("keyword"));
    }
}
