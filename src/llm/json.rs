//! Lenient JSON extraction from model replies.

use serde::de::DeserializeOwned;

/// Outcome of decoding a model reply into a typed shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedReply<T> {
    Parsed(T),
    /// Non-empty text that did not decode; carries the raw reply.
    Malformed(String),
    Empty,
}

impl<T> ParsedReply<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            ParsedReply::Parsed(v) => Some(v),
            _ => None,
        }
    }
}

/// Find the JSON payload in a reply: tolerates code fences and chatter around it.
/// Returns the first balanced `{...}` span. A top-level `[...]` is taken only when it
/// opens before any `{` and encloses it (or no object follows), so citation markers
/// like `[1]` in leading prose are skipped.
pub fn extract_first_json(text: &str) -> Option<&str> {
    let t = text.trim();
    let t = t
        .strip_prefix("```json")
        .or_else(|| t.strip_prefix("```"))
        .unwrap_or(t);
    let t = t.strip_suffix("```").unwrap_or(t).trim();

    let obj = t.find('{');
    if let Some(a) = t.find('[').filter(|a| obj.map_or(true, |o| *a < o)) {
        if let Some(end) = balanced_end(t, a) {
            if obj.map_or(true, |o| o < end) {
                return Some(&t[a..=end]);
            }
        }
    }
    let start = obj?;
    balanced_end(t, start).map(|end| &t[start..=end])
}

/// Byte index of the closer matching the bracket at `start`. Brackets inside
/// string literals are ignored.
fn balanced_end(t: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;
    for (i, c) in t[start..].char_indices() {
        if in_str {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_str = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_str = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + i);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn parse_reply<T: DeserializeOwned>(raw: &str) -> ParsedReply<T> {
    if raw.trim().is_empty() {
        return ParsedReply::Empty;
    }
    match extract_first_json(raw).and_then(|j| serde_json::from_str::<T>(j).ok()) {
        Some(v) => ParsedReply::Parsed(v),
        None => ParsedReply::Malformed(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Dup {
        duplicate: bool,
    }

    #[test]
    fn fenced_and_chatty_replies_are_extracted() {
        let cases = [
            "```json\n{\"duplicate\": true}\n```",
            "好的，结果如下：{\"duplicate\": true} 希望有帮助",
            "{\"duplicate\": true}",
        ];
        for c in cases {
            assert_eq!(parse_reply::<Dup>(c), ParsedReply::Parsed(Dup { duplicate: true }), "{c}");
        }
    }

    #[test]
    fn prose_is_malformed_and_blank_is_empty() {
        assert!(matches!(
            parse_reply::<Dup>("无法判断"),
            ParsedReply::Malformed(s) if s == "无法判断"
        ));
        assert_eq!(parse_reply::<Dup>("  \n"), ParsedReply::Empty);
    }

    #[test]
    fn top_level_arrays_are_supported() {
        assert_eq!(extract_first_json("x [1, 2] y"), Some("[1, 2]"));
        assert_eq!(extract_first_json("结果：[{\"a\":1},{\"b\":2}] 完"), Some("[{\"a\":1},{\"b\":2}]"));
        assert_eq!(extract_first_json("no json here"), None);
    }

    #[test]
    fn first_balanced_object_is_extracted() {
        let cases = [
            // citation brackets in prose before the object
            (
                "根据材料[1]和[3]整理如下：{\"focus_topic\":\"防汛补助\",\"header\":{\"lede_citations\":[1,3]}}",
                "{\"focus_topic\":\"防汛补助\",\"header\":{\"lede_citations\":[1,3]}}",
            ),
            // braces in a trailing note
            (
                "{\"summary\":\"下达资金500万元\"}\n（注：字段{summary}已填写）",
                "{\"summary\":\"下达资金500万元\"}",
            ),
            // braces and quotes inside string values
            (
                "{\"note\":\"含}括号与\\\"引号\\\"\"} 其余",
                "{\"note\":\"含}括号与\\\"引号\\\"\"}",
            ),
            ("先 {\"a\":1} 再 {\"b\":2}", "{\"a\":1}"),
        ];
        for (raw, want) in cases {
            assert_eq!(extract_first_json(raw), Some(want), "{raw}");
        }
        assert_eq!(extract_first_json("{\"a\": [1, 2"), None);
    }

    #[test]
    fn draft_after_citation_prose_parses() {
        let raw = "根据材料[1]和[3]整理如下：{\"focus_topic\":\"防汛补助\",\"header\":{\"lede_citations\":[1,3]}}";
        let v = parse_reply::<serde_json::Value>(raw).ok().expect("parsed");
        assert_eq!(v["focus_topic"], "防汛补助");
        assert_eq!(v["header"]["lede_citations"], serde_json::json!([1, 3]));
    }
}
