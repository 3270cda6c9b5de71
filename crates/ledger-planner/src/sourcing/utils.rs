// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use plan_contracts::{ProposerError, ProposerResult};
use serde_json::Value;
use tracing::{debug, warn};

/// Pulls a JSON value out of model output: whole text, then fenced blocks, then the first
/// balanced object or array.
pub fn extract_json_from_text(text: &str) -> ProposerResult<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        debug!("Parsed entire completion as JSON");
        return Ok(value);
    }

    for (language, content) in extract_code_blocks(text) {
        if language.as_deref() == Some("json") || language.is_none() {
            if let Ok(value) = serde_json::from_str::<Value>(&content) {
                debug!("Extracted JSON from fenced code block");
                return Ok(value);
            }
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        for candidate in balanced_spans(text, open, close) {
            match serde_json::from_str(candidate) {
                Ok(value) => return Ok(value),
                Err(e) => warn!(error = %e, "JSON-like substring failed to parse"),
            }
        }
    }

    Err(ProposerError::Malformed(
        "no JSON structure found in completion".to_string(),
    ))
}

/// Top-level balanced `open`..`close` spans in order of appearance.
///
/// Delimiters inside string literals are ignored once a span is open.
fn balanced_spans(text: &str, open: char, close: char) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch == '"' && depth > 0 {
            in_string = true;
        } else if ch == open {
            if depth == 0 {
                start = i;
            }
            depth += 1;
        } else if ch == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                spans.push(&text[start..=i]);
            }
        }
    }
    spans
}

pub fn extract_code_blocks(text: &str) -> Vec<(Option<String>, String)> {
    let mut blocks = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let Some(fence) = line.trim().strip_prefix("```") else {
            continue;
        };
        let language = Some(fence.trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string);

        let mut content = String::new();
        for code_line in lines.by_ref() {
            if code_line.trim().starts_with("```") {
                break;
            }
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(code_line);
        }
        blocks.push((language, content));
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whole_text() {
        assert_eq!(
            extract_json_from_text(r#" {"steps": []} "#).unwrap(),
            json!({"steps": []})
        );
    }

    #[test]
    fn fenced_block() {
        let text = "Here is the plan:\n```json\n{\"description\": \"x\"}\n```\nDone.";
        assert_eq!(
            extract_json_from_text(text).unwrap(),
            json!({"description": "x"})
        );
    }

    #[test]
    fn embedded_object() {
        let text = r#"Sure! {"a": {"b": 1}} hope that helps"#;
        assert_eq!(extract_json_from_text(text).unwrap(), json!({"a": {"b": 1}}));
    }

    #[test]
    fn braces_inside_strings_do_not_end_the_object() {
        let text = r#"Plan: {"description": "close } early", "note": "say \"{\" twice"} ok"#;
        assert_eq!(
            extract_json_from_text(text).unwrap(),
            json!({"description": "close } early", "note": "say \"{\" twice"})
        );
    }

    #[test]
    fn stray_braces_before_the_object_are_skipped() {
        let text = r#"Fill in {placeholder} later. {"steps": [], "description": "d"}"#;
        assert_eq!(
            extract_json_from_text(text).unwrap(),
            json!({"steps": [], "description": "d"})
        );
    }

    #[test]
    fn plain_text_is_malformed() {
        assert!(matches!(
            extract_json_from_text("I cannot help with that."),
            Err(ProposerError::Malformed(_))
        ));
    }
}
