// src/response_parser.rs

use crate::error::ParseError;
use serde_json::{Map, Value};

const FENCE: &str = "```";

/// Strip a leading fenced block, if present.
///
/// The reply must open with a fence (optionally tagged with a language on
/// its line) that is closed later on; whatever follows the closing fence is
/// dropped. Anything else is returned trimmed but otherwise untouched.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed
        .strip_prefix(FENCE)
        .and_then(|rest| rest.find(FENCE).map(|end| &rest[..end]))
    else {
        return trimmed;
    };

    let body = match inner.split_once('\n') {
        Some((tag, rest)) if is_info_string(tag) => rest,
        _ => inner,
    };
    body.trim()
}

fn is_info_string(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
}

/// Outermost `{ ... }` span, for replies that wrap the object in prose.
///
/// A `[` ahead of the first `{` means the object sits inside a list, which
/// is never unwrapped.
fn outermost_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    if s[..start].contains('[') {
        return None;
    }
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}

/// Decode model output into a JSON object.
pub fn parse_model_output(raw: &str) -> Result<Map<String, Value>, ParseError> {
    let body = strip_code_fence(raw);

    let value = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(_) if body.starts_with('[') => return Err(ParseError::UnexpectedShape("an array")),
        Err(err) => outermost_object(body)
            .and_then(|candidate| serde_json::from_str::<Value>(candidate).ok())
            .ok_or(ParseError::Unparsable(err))?,
    };

    match value {
        Value::Object(map) => Ok(map),
        other => Err(ParseError::UnexpectedShape(json_kind(&other))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"Invoice_Number":"A1","Total_Amount":12.5,"Category":"Food"}"#;

    #[test]
    fn test_fenced_matches_unfenced() {
        let fenced = format!("```json\n{BODY}\n```");
        assert_eq!(
            parse_model_output(&fenced).unwrap(),
            parse_model_output(BODY).unwrap()
        );
    }

    #[test]
    fn test_fence_without_tag() {
        let fenced = format!("```\n{BODY}\n```\n");
        assert_eq!(strip_code_fence(&fenced), BODY);
    }

    #[test]
    fn test_inline_fence() {
        let fenced = format!("```{BODY}```");
        assert_eq!(strip_code_fence(&fenced), BODY);
    }

    #[test]
    fn test_unfenced_text_is_only_trimmed() {
        // Naive character stripping would eat the closing quote-brace here.
        let raw = "  {\"Vendor_Name\":\"json`\"}\n";
        assert_eq!(strip_code_fence(raw), "{\"Vendor_Name\":\"json`\"}");
        let map = parse_model_output(raw).unwrap();
        assert_eq!(map["Vendor_Name"], "json`");
    }

    #[test]
    fn test_unbalanced_fence_left_alone() {
        let raw = format!("```json\n{BODY}");
        assert_eq!(strip_code_fence(&raw), raw.trim());
    }

    #[test]
    fn test_prose_around_object_is_recovered() {
        let raw = format!("Here is the invoice:\n{BODY}\nLet me know if you need more.");
        let map = parse_model_output(&raw).unwrap();
        assert_eq!(map["Invoice_Number"], "A1");
    }

    #[test]
    fn test_fenced_block_followed_by_prose() {
        let raw = format!("```json\n{BODY}\n```\nHope this helps!");
        assert_eq!(strip_code_fence(&raw), BODY);
        assert_eq!(parse_model_output(&raw).unwrap()["Category"], "Food");
    }

    #[test]
    fn test_array_is_never_unwrapped_by_prose_recovery() {
        let fenced = "```json\n[{\"Invoice_Number\":\"A1\"}]\n```\nHope this helps!";
        assert!(matches!(
            parse_model_output(fenced).unwrap_err(),
            ParseError::UnexpectedShape("an array")
        ));

        let bare = "[{\"Invoice_Number\":\"A1\"}] Hope this helps!";
        assert!(matches!(
            parse_model_output(bare).unwrap_err(),
            ParseError::UnexpectedShape("an array")
        ));

        let prose = "Here you go: [{\"Invoice_Number\":\"A1\"}] done";
        assert!(matches!(
            parse_model_output(prose).unwrap_err(),
            ParseError::Unparsable(_)
        ));
    }

    #[test]
    fn test_malformed_json() {
        let err = parse_model_output("```json\n{\"Invoice_Number\": \n```").unwrap_err();
        assert!(matches!(err, ParseError::Unparsable(_)));
    }

    #[test]
    fn test_array_is_unexpected_shape() {
        let err = parse_model_output("```json\n[{\"Invoice_Number\":\"A1\"}]\n```").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedShape("an array")));
    }

    #[test]
    fn test_scalar_is_unexpected_shape() {
        let err = parse_model_output("42").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedShape("a number")));
    }
}
