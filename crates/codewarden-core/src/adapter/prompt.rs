use std::path::Path;

use super::AnalysisRequest;

/// System prompt shared by the cloud adapters. The response schema mirrors
/// the engine's finding shape so parsing stays mechanical.
pub const SYSTEM_PROMPT: &str = "You are an application security auditor. Analyze the provided source code for vulnerabilities and respond with strict JSON only: {\"findings\": [{\"name\": \"...\", \"message\": \"...\", \"cwe\": \"CWE-000\", \"severity\": \"critical|high|medium|low\", \"confidence\": 0.0, \"start_line\": 1, \"end_line\": 1}]}. Line numbers are absolute within the scanned file. Report an empty findings array when the code is clean. No prose, no markdown fences.";

/// Render the user message for one analysis request.
pub fn build_user_prompt(request: &AnalysisRequest) -> String {
    let hints = if request.cwe_hints.is_empty() {
        "any relevant weakness class".to_string()
    } else {
        request.cwe_hints.join(", ")
    };
    format!(
        "File: {file}\nLanguage: {language}\nWeakness classes to probe: {hints}\nThe first line shown below is line {start} of the file (lines {start}-{end}).\n\n{code}",
        file = request.file_path,
        language = request.language,
        hints = hints,
        start = request.line_start,
        end = request.line_end,
        code = request.code,
    )
}

/// Detect the programming language from a file extension. Returns `None` for
/// files the scanner should skip.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let extension = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    let language = match extension.as_str() {
        "py" => "Python",
        "js" | "jsx" => "JavaScript",
        "ts" | "tsx" => "TypeScript",
        "java" => "Java",
        "c" | "h" => "C",
        "cpp" | "cc" | "hpp" => "C++",
        "cs" => "C#",
        "php" => "PHP",
        "rb" => "Ruby",
        "go" => "Go",
        "rs" => "Rust",
        "sql" => "SQL",
        "sh" | "bash" => "Shell",
        "ps1" => "PowerShell",
        _ => return None,
    };
    Some(language)
}

/// Weakness classes worth probing per language. The generic list applies
/// when no language-specific selection exists.
pub fn cwe_hints_for_language(language: &str) -> Vec<String> {
    let hints: &[&str] = match language {
        "Python" => &["CWE-78", "CWE-89", "CWE-95", "CWE-502", "CWE-798"],
        "JavaScript" | "TypeScript" => &["CWE-79", "CWE-89", "CWE-94", "CWE-798", "CWE-1321"],
        "Java" | "C#" => &["CWE-89", "CWE-502", "CWE-611", "CWE-798"],
        "C" | "C++" => &["CWE-120", "CWE-134", "CWE-416", "CWE-476", "CWE-787"],
        "PHP" => &["CWE-78", "CWE-79", "CWE-89", "CWE-98"],
        "SQL" => &["CWE-89"],
        "Shell" | "PowerShell" => &["CWE-78", "CWE-798"],
        _ => &["CWE-20", "CWE-78", "CWE-79", "CWE-89", "CWE-798"],
    };
    hints.iter().map(|h| (*h).to_string()).collect()
}
