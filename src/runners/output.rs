//! Captured-output truncation.
//!
//! Remote systems return logs and result payloads of unbounded size; attempt
//! rows must stay bounded. Anything over the cap is cut at a UTF-8 boundary
//! and prefixed with [`TRUNCATION_MARKER`].

use serde_json::Value;

use crate::constants::TRUNCATION_MARKER;

/// Bound `value` to `cap` bytes. Values under the cap pass through
/// unchanged; larger ones come back as a marked, truncated string.
pub fn truncate_output(value: Value, cap: usize) -> Value {
    match value {
        Value::String(text) => {
            if text.len() <= cap {
                Value::String(text)
            } else {
                Value::String(truncate_text(&text, cap))
            }
        }
        other => {
            let rendered = other.to_string();
            if rendered.len() <= cap {
                other
            } else {
                Value::String(truncate_text(&rendered, cap))
            }
        }
    }
}

fn truncate_text(text: &str, cap: usize) -> String {
    let keep = cap.saturating_sub(TRUNCATION_MARKER.len());
    let mut end = keep.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{TRUNCATION_MARKER}{}", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn small_values_pass_through_unchanged() {
        let value = json!({"rows": 3, "log": "ok"});
        assert_eq!(truncate_output(value.clone(), 1024), value);

        let text = json!("short output");
        assert_eq!(truncate_output(text.clone(), 1024), text);
    }

    #[test]
    fn oversized_strings_are_capped_with_marker() {
        let cap = 64;
        let long = "x".repeat(500);
        let truncated = truncate_output(json!(long), cap);

        let text = truncated.as_str().unwrap();
        assert!(text.starts_with(TRUNCATION_MARKER));
        assert!(text.len() <= cap);
        assert_eq!(text.len(), cap);
    }

    #[test]
    fn oversized_structures_are_rendered_then_capped() {
        let cap = 48;
        let big = json!({"log": "y".repeat(200)});
        let truncated = truncate_output(big, cap);

        let text = truncated.as_str().unwrap();
        assert!(text.starts_with(TRUNCATION_MARKER));
        assert!(text.len() <= cap);
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        // Three-byte characters; the cut lands mid-character unless adjusted.
        let long = "€".repeat(100);
        let truncated = truncate_output(json!(long), 40);
        let text = truncated.as_str().unwrap();
        assert!(text.starts_with(TRUNCATION_MARKER));
        assert!(text.len() <= 40);
        assert!(text.chars().all(|c| c == '€' || c.is_ascii()));
    }
}
