use sha2::{Digest, Sha256};

/// Hex length of the rendered fingerprint (truncated SHA-256).
const FINGERPRINT_CHARS: usize = 16;
/// Line-range bucket used by the coarse fallback.
const LINE_BUCKET: u32 = 10;

/// Confidence multiplier applied to findings tagged with a coarse fingerprint,
/// so the consensus merge treats them as weaker evidence.
pub const COARSE_CONFIDENCE_FACTOR: f64 = 0.8;

/// Stable identity for a finding, resilient to line drift and reformatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub value: String,
    /// True when the flagged region could not be read and the fallback over
    /// the rounded line range was used instead.
    pub coarse: bool,
}

/// Derive a fingerprint from the file path, weakness classifier id and the
/// flagged code region.
///
/// The region content is normalized (per-line trim, blank lines dropped,
/// whitespace runs collapsed) before hashing, so two scans that flag the same
/// code at different offsets or with different indentation agree on identity.
/// When `region` is `None` the coarse fallback hashes the line range rounded
/// to a [`LINE_BUCKET`]-line bucket.
pub fn fingerprint(
    file: &str,
    rule_id: &str,
    region: Option<&str>,
    line_range: (u32, u32),
) -> Fingerprint {
    let rule = normalize_rule_id(rule_id);
    match region {
        Some(text) => Fingerprint {
            value: digest(&[file, &rule, &normalize_region(text)]),
            coarse: false,
        },
        None => {
            let bucket = (
                round_to_bucket(line_range.0),
                round_to_bucket(line_range.1),
            );
            // "coarse" marker keeps the fallback domain disjoint from region hashes
            Fingerprint {
                value: digest(&[
                    file,
                    &rule,
                    "coarse",
                    &format!("lines:{}-{}", bucket.0, bucket.1),
                ]),
                coarse: true,
            }
        }
    }
}

fn digest(parts: &[&str]) -> String {
    use std::fmt::Write;

    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        // unit separator keeps `("ab", "c")` distinct from `("a", "bc")`
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(FINGERPRINT_CHARS);
    for byte in digest.iter().take(FINGERPRINT_CHARS / 2) {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Lowercase the classifier id and strip leading zeros from CWE numbers so
/// `CWE-079` and `cwe-79` name the same weakness.
fn normalize_rule_id(rule_id: &str) -> String {
    let lowered = rule_id.trim().to_ascii_lowercase();
    if let Some(number) = lowered.strip_prefix("cwe-") {
        if let Ok(parsed) = number.parse::<u32>() {
            return format!("cwe-{parsed}");
        }
    }
    lowered
}

fn normalize_region(region: &str) -> String {
    let mut normalized = String::with_capacity(region.len());
    for line in region.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !normalized.is_empty() {
            normalized.push('\n');
        }
        let mut last_was_space = false;
        for ch in trimmed.chars() {
            if ch.is_whitespace() {
                if !last_was_space {
                    normalized.push(' ');
                }
                last_was_space = true;
            } else {
                normalized.push(ch);
                last_was_space = false;
            }
        }
    }
    normalized
}

fn round_to_bucket(line: u32) -> u32 {
    (line / LINE_BUCKET) * LINE_BUCKET
}
