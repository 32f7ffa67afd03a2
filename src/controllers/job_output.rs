use crate::constants::{OUTPUTS_END_MARKER, OUTPUTS_START_MARKER};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Keys must look like identifiers; anything else in a marked region is
/// treated as stray agent chatter rather than a result.
static KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid regex literal"));

/// Result keys with meaning to the operator itself; everything else is
/// carried through to status untouched.
pub const RESULT_BRANCH: &str = "branch";
pub const RESULT_PR: &str = "pr";
pub const RESULT_COMMIT: &str = "commit";
pub const RESULT_BASE_BRANCH: &str = "base-branch";
pub const RESULT_INPUT_TOKENS: &str = "input-tokens";
pub const RESULT_OUTPUT_TOKENS: &str = "output-tokens";
pub const RESULT_COST_USD: &str = "cost-usd";

/// Extract the `key: value` dictionary an agent prints between the
/// output markers.
///
/// Lines outside a marked region are ignored, as is anything without a
/// `": "` separator. Keys and values are whitespace-trimmed; on
/// duplicate keys the last occurrence wins. An unterminated region is
/// parsed to the end of the logs, logs being a best-effort channel.
pub fn parse_outputs(logs: &str) -> BTreeMap<String, String> {
    let mut outputs = BTreeMap::new();
    let mut in_region = false;

    for line in logs.lines() {
        let trimmed = line.trim();
        if trimmed == OUTPUTS_START_MARKER {
            in_region = true;
            continue;
        }
        if trimmed == OUTPUTS_END_MARKER {
            in_region = false;
            continue;
        }
        if !in_region {
            continue;
        }
        if let Some((key, value)) = trimmed.split_once(": ") {
            let key = key.trim();
            if KEY_PATTERN.is_match(key) {
                outputs.insert(key.to_string(), value.trim().to_string());
            }
        }
    }

    outputs
}

/// Read a result value as f64, for the cost/token metrics.
pub fn numeric_result(outputs: &BTreeMap<String, String>, key: &str) -> Option<f64> {
    outputs.get(key).and_then(|v| v.parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_keys_between_markers() {
        // given
        let logs = "\
starting agent...
---KELOS_OUTPUTS_START---
branch: kelos/fix-42
pr: https://github.com/ex/r/pull/7
cost-usd: 0.42
---KELOS_OUTPUTS_END---
bye
";

        // when
        let outputs = parse_outputs(logs);

        // then
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs["branch"], "kelos/fix-42");
        assert_eq!(outputs["pr"], "https://github.com/ex/r/pull/7");
        assert_eq!(numeric_result(&outputs, "cost-usd"), Some(0.42));
    }

    #[test]
    fn ignores_noise_and_lines_without_separator() {
        let logs = "\
---KELOS_OUTPUTS_START---
no separator here
also:not-a-separator
commit: abc123
---KELOS_OUTPUTS_END---
branch: outside-the-region
";
        let outputs = parse_outputs(logs);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["commit"], "abc123");
    }

    #[test]
    fn non_identifier_keys_are_stray_chatter() {
        let logs = "\
---KELOS_OUTPUTS_START---
see the PR at: https://github.com/ex/r/pull/7
base-branch: main
---KELOS_OUTPUTS_END---
";
        let outputs = parse_outputs(logs);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["base-branch"], "main");
    }

    #[test]
    fn last_duplicate_wins_and_whitespace_is_trimmed() {
        let logs = "\
---KELOS_OUTPUTS_START---
  branch :  first
branch: second
---KELOS_OUTPUTS_END---
---KELOS_OUTPUTS_START---
branch: third
---KELOS_OUTPUTS_END---
";
        let outputs = parse_outputs(logs);
        assert_eq!(outputs["branch"], "third");
    }

    #[test]
    fn unterminated_region_parses_to_eof() {
        let logs = "---KELOS_OUTPUTS_START---\ninput-tokens: 1200";
        let outputs = parse_outputs(logs);
        assert_eq!(outputs["input-tokens"], "1200");
        assert_eq!(numeric_result(&outputs, "input-tokens"), Some(1200.0));
    }

    #[test]
    fn empty_logs_yield_empty_outputs() {
        assert!(parse_outputs("").is_empty());
        assert!(parse_outputs("plain logs\nno markers").is_empty());
    }
}
