use serde::de::DeserializeOwned;

use crate::error::PipelineError;
use crate::models::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Object,
    Array,
}

impl JsonShape {
    fn open(self) -> u8 {
        match self {
            JsonShape::Object => b'{',
            JsonShape::Array => b'[',
        }
    }

    fn name(self) -> &'static str {
        match self {
            JsonShape::Object => "object",
            JsonShape::Array => "array",
        }
    }
}

/// Returns the span from the first opening delimiter of `shape` through its
/// matching close. Brackets inside JSON strings are skipped. Returns `None`
/// when there is no opener or the block never balances.
pub fn extract_json_block(content: &str, shape: JsonShape) -> Option<&str> {
    let bytes = content.as_bytes();
    let start = bytes.iter().position(|&b| b == shape.open())?;

    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => {
                if stack.pop() != Some(b) {
                    return None;
                }
                if stack.is_empty() {
                    // Delimiters are ASCII, so both ends sit on char boundaries.
                    return Some(&content[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Extracts and deserializes the declared shape. The failure reason never
/// quotes the response text.
pub fn parse_block<T: DeserializeOwned>(
    stage: Stage,
    content: &str,
    shape: JsonShape,
) -> Result<T, PipelineError> {
    let block = extract_json_block(content, shape).ok_or_else(|| {
        PipelineError::MalformedResponse {
            stage,
            reason: format!("no balanced JSON {} found", shape.name()),
        }
    })?;

    serde_json::from_str::<T>(block).map_err(|e| PipelineError::MalformedResponse {
        stage,
        reason: format!(
            "JSON {} does not match the expected shape ({:?} error at line {} column {})",
            shape.name(),
            e.classify(),
            e.line(),
            e.column()
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_extract_object_embedded_in_prose() {
        let input = "Here you go: {\"a\": 1} and that's it.";
        assert_eq!(
            extract_json_block(input, JsonShape::Object),
            Some("{\"a\": 1}")
        );
    }

    #[test]
    fn test_extract_stops_at_first_balanced_block() {
        let input = "{\"a\": {\"b\": 2}} trailing {\"c\": 3}";
        assert_eq!(
            extract_json_block(input, JsonShape::Object),
            Some("{\"a\": {\"b\": 2}}")
        );
    }

    #[test]
    fn test_extract_array_from_markdown_fence() {
        let input = "```json\n[{\"id\": 1}, {\"id\": 2}]\n```";
        assert_eq!(
            extract_json_block(input, JsonShape::Array),
            Some("[{\"id\": 1}, {\"id\": 2}]")
        );
    }

    #[test]
    fn test_extract_ignores_delimiters_inside_strings() {
        let input = r#"{"text": "a } tricky ] \" { string", "n": [1, 2]}"#;
        assert_eq!(extract_json_block(input, JsonShape::Object), Some(input));
    }

    #[test]
    fn test_extract_multibyte_content() {
        let input = "結果：{\"title\": \"穏やかな一日\"}です";
        assert_eq!(
            extract_json_block(input, JsonShape::Object),
            Some("{\"title\": \"穏やかな一日\"}")
        );
    }

    #[test]
    fn test_extract_unbalanced_returns_none() {
        assert_eq!(extract_json_block("{\"a\": 1", JsonShape::Object), None);
        assert_eq!(extract_json_block("[1, 2}", JsonShape::Array), None);
        assert_eq!(extract_json_block("no json here", JsonShape::Array), None);
    }

    #[derive(Debug, Deserialize)]
    struct Sample {
        n: u32,
    }

    #[test]
    fn test_parse_block_success() {
        let parsed: Sample = parse_block(Stage::Audit, "noise {\"n\": 7} noise", JsonShape::Object)
            .unwrap();
        assert_eq!(parsed.n, 7);
    }

    #[test]
    fn test_parse_block_missing_json_is_malformed() {
        let err = parse_block::<Sample>(Stage::Draft, "sorry, I can't", JsonShape::Object)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MalformedResponse {
                stage: Stage::Draft,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_block_reason_does_not_echo_content() {
        let err = parse_block::<Sample>(
            Stage::Sanitize,
            "{\"n\": \"Tanaka Hanako, 090-1234\"}",
            JsonShape::Object,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("malformed"));
        assert!(!message.contains("Tanaka"));
    }
}
