//! Tolerant parsing of model output
//!
//! Models wrap JSON in code fences, prepend prose, or trail explanations.
//! These helpers salvage the JSON payload instead of failing the request
//! over formatting.

use serde::de::DeserializeOwned;

/// Strip a Markdown code fence if the text is wrapped in one.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string ("json", "cypher") on the opening fence line.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.rsplit_once("```").map(|(b, _)| b).unwrap_or(body).trim()
}

/// Locate the first balanced JSON object or array in free-form text.
fn first_json_block(text: &str) -> Option<&str> {
    let open = text.find(['{', '['])?;
    let opener = text.as_bytes()[open] as char;
    let closer = if opener == '{' { '}' } else { ']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[open..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            c if c == opener => depth += 1,
            c if c == closer => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open..open + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Deserialize model output: direct parse first, then fence-stripped,
/// then the first balanced JSON block found anywhere in the text.
pub(crate) fn from_model_output<T: DeserializeOwned>(text: &str) -> Option<T> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Some(value);
    }

    let stripped = strip_code_fence(text);
    if let Ok(value) = serde_json::from_str(stripped) {
        return Some(value);
    }

    first_json_block(stripped)
        .or_else(|| first_json_block(text))
        .and_then(|block| serde_json::from_str(block).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fence("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_direct_json() {
        let parsed: Vec<u32> = from_model_output("[1, 2, 3]").unwrap();
        assert_eq!(parsed, vec![1, 2, 3]);
    }

    #[test]
    fn test_parse_fenced_json() {
        #[derive(serde::Deserialize)]
        struct Out {
            query: String,
        }
        let out: Out = from_model_output("```json\n{\"query\": \"MATCH (n) RETURN n\"}\n```")
            .unwrap();
        assert_eq!(out.query, "MATCH (n) RETURN n");
    }

    #[test]
    fn test_parse_json_with_surrounding_prose() {
        let text = "Sure, here are the scores:\n[0.9, 0.1, 0.5]\nLet me know!";
        let parsed: Vec<f32> = from_model_output(text).unwrap();
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn test_parse_handles_nested_and_strings() {
        let text = "{\"a\": {\"b\": \"}\"}, \"c\": [1]} trailing";
        let parsed: serde_json::Value = from_model_output(text).unwrap();
        assert_eq!(parsed["c"][0], 1);
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert!(from_model_output::<Vec<f32>>("no json here").is_none());
    }
}
