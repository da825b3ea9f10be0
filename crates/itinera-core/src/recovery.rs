//! Best-effort recovery of structured itineraries from raw model output.
//!
//! Model responses arrive as free-form text that usually, but not always,
//! contains a JSON itinerary: sometimes fenced, sometimes bare, sometimes
//! truncated mid-object or corrupted by stray backtick continuations. The
//! ladder here tries progressively weaker strategies and always produces a
//! defined value; [`parse_model_text`] cannot fail.
//!
//! Ladder, first success wins:
//! 1. fenced ```json block, cleaned, parsed;
//! 2. first `{` .. last `}` span, cleaned, parsed;
//! 3. the whole cleaned text, parsed;
//! 4. partial recovery: locate `title` and the `days` array, then salvage
//!    individual day objects by brace-depth balancing (a truncated day is
//!    skipped, prior complete days survive);
//! 5. the original text, wrapped for display-only fallback.

use chrono::Utc;
use serde_json::{Value, json};
use tracing::debug;

/// Result of the recovery ladder.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveredPlan {
    /// A parsed JSON object, at best `{title, days: [...]}`.
    Structured(Value),
    /// Nothing recoverable; the caller must fall back to display-only.
    Unstructured { text: String },
}

impl RecoveredPlan {
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Structured(value) => value.get("title")?.as_str(),
            Self::Unstructured { .. } => None,
        }
    }

    /// The `days` field, array- or object-shaped.
    pub fn days(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => value.get("days"),
            Self::Unstructured { .. } => None,
        }
    }
}

/// Run the recovery ladder over a raw model text segment.
pub fn parse_model_text(text: &str) -> RecoveredPlan {
    // 1. Fenced block.
    if let Some(block) = fenced_json_block(text, true) {
        if let Some(value) = parse_cleaned(block) {
            debug!("recovered itinerary from fenced block");
            return RecoveredPlan::Structured(value);
        }
    }

    // 2. First `{` to last `}`.
    if let Some(span) = brace_span(text) {
        if let Some(value) = parse_cleaned(span) {
            debug!("recovered itinerary from brace span");
            return RecoveredPlan::Structured(value);
        }
    }

    // 3. The whole text.
    if let Some(value) = parse_cleaned(text) {
        debug!("recovered itinerary from whole text");
        return RecoveredPlan::Structured(value);
    }

    // 4. Partial per-day recovery.
    if let Some(value) = recover_partial(text) {
        debug!("recovered itinerary partially");
        return RecoveredPlan::Structured(value);
    }

    // 5. Display-only fallback.
    RecoveredPlan::Unstructured {
        text: text.to_owned(),
    }
}

fn parse_cleaned(segment: &str) -> Option<Value> {
    let cleaned = clean_json_text(segment);
    let value: Value = serde_json::from_str(&cleaned).ok()?;
    value.is_object().then_some(value)
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Content of the first ```json fence. With `require_close`, an
/// unterminated fence is rejected; otherwise it runs to end of text.
fn fenced_json_block(text: &str, require_close: bool) -> Option<&str> {
    let open = text.find("```json")?;
    let after_tag = open + "```json".len();
    let start = match text[after_tag..].strip_prefix('\n') {
        Some(_) => after_tag + 1,
        None => after_tag,
    };
    match text[start..].find("\n```") {
        Some(close) => Some(&text[start..start + close]),
        None if require_close => None,
        None => Some(&text[start..]),
    }
}

/// The span from the first `{` to the last `}`, when both exist in order.
fn brace_span(text: &str) -> Option<&str> {
    let first = text.find('{')?;
    let last = text.rfind('}')?;
    (last > first).then(|| &text[first..=last])
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

/// Scrub known corruption patterns before parsing:
/// - line-end continuation markers (`` ` + ``) and stray line-edge backticks;
/// - backtick-quoted runs inside the text, converted to double quotes;
/// - a trailing truncated object, cut back to the last complete `}`/`]`.
fn clean_json_text(segment: &str) -> String {
    let mut lines = Vec::new();
    for line in segment.lines() {
        lines.push(strip_line_noise(line));
    }
    let mut joined = lines.join("\n");
    joined = convert_inner_backticks(&joined);

    let trimmed = joined.trim();
    if !trimmed.ends_with('}') && !trimmed.ends_with(']') {
        let last_obj = trimmed.rfind('}');
        let last_arr = trimmed.rfind(']');
        if let Some(cut) = last_obj.max(last_arr) {
            return trimmed[..=cut].to_owned();
        }
    }
    trimmed.to_owned()
}

/// Remove a trailing `` ` + `` continuation or lone edge backtick, and a
/// leading backtick, from one line.
fn strip_line_noise(line: &str) -> String {
    let mut rest = line.trim_end();

    if let Some(before_plus) = rest.strip_suffix('+') {
        let before_plus = before_plus.trim_end();
        if let Some(stripped) = before_plus.strip_suffix('`') {
            rest = stripped.trim_end();
        }
    } else if let Some(stripped) = rest.strip_suffix('`') {
        rest = stripped;
    }

    let leading_ws = rest.len() - rest.trim_start().len();
    let (indent, body) = rest.split_at(leading_ws);
    match body.strip_prefix('`') {
        Some(stripped) => format!("{indent}{stripped}"),
        None => rest.to_owned(),
    }
}

/// Convert unescaped `` `...` `` runs into `"..."` quoting.
fn convert_inner_backticks(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'`' && (i == 0 || bytes[i - 1] != b'\\') {
            if let Some(close) = text[i + 1..].find('`') {
                out.push('"');
                out.push_str(&text[i + 1..i + 1 + close]);
                out.push('"');
                i = i + 1 + close + 1;
                continue;
            }
        }
        // Advance one full character, not one byte.
        let ch = text[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

// ---------------------------------------------------------------------------
// Partial recovery
// ---------------------------------------------------------------------------

/// Salvage what the stronger strategies could not: a `title`, then every
/// individually parseable day object after the `days` array marker.
fn recover_partial(text: &str) -> Option<Value> {
    let content = fenced_json_block(text, false).unwrap_or(text);

    let title = find_string_field(content, "title")?;
    let days_start = find_days_marker(content)?;

    let mut days = Vec::new();
    for candidate in balanced_objects(&content[days_start..]) {
        match serde_json::from_str::<Value>(candidate) {
            Ok(day) if day.get("day").is_some() && day.get("schedules").is_some() => {
                days.push(day);
            }
            Ok(_) => {}
            Err(err) => debug!(%err, "skipping unparseable day object"),
        }
    }

    if days.is_empty() {
        // Nothing but the title survived; synthesize a single placeholder
        // day so the caller still gets a renderable structure.
        days.push(json!({
            "day": 1,
            "date": Utc::now().date_naive().to_string(),
            "title": "1일차: 여행 시작",
            "schedules": [{
                "id": "1-1",
                "name": "여행 계획 확인 필요",
                "time": "09:00",
                "notes": "원본 데이터에서 일부 정보를 복구했습니다. 상세 내용을 확인해주세요.",
                "category": "기타"
            }]
        }));
    }

    Some(json!({ "title": title, "days": days }))
}

/// Locate `"name" : "value"` and return the value, escape-free.
fn find_string_field(content: &str, name: &str) -> Option<String> {
    let needle = format!("\"{name}\"");
    let mut search_from = 0;
    while let Some(found) = content[search_from..].find(&needle) {
        let after_key = search_from + found + needle.len();
        let rest = content[after_key..].trim_start();
        if let Some(after_colon) = rest.strip_prefix(':') {
            let after_colon = after_colon.trim_start();
            if let Some(value_body) = after_colon.strip_prefix('"') {
                if let Some(close) = value_body.find('"') {
                    let value = &value_body[..close];
                    if !value.is_empty() {
                        return Some(value.to_owned());
                    }
                }
            }
        }
        search_from = after_key;
    }
    None
}

/// Byte offset just past the `"days" : [` marker.
fn find_days_marker(content: &str) -> Option<usize> {
    let needle = "\"days\"";
    let mut search_from = 0;
    while let Some(found) = content[search_from..].find(needle) {
        let after_key = search_from + found + needle.len();
        let rest = &content[after_key..];
        let colon_off = rest.len() - rest.trim_start().len();
        if let Some(after_colon) = rest.trim_start().strip_prefix(':') {
            let bracket_off = after_colon.len() - after_colon.trim_start().len();
            if after_colon.trim_start().starts_with('[') {
                return Some(after_key + colon_off + 1 + bracket_off + 1);
            }
        }
        search_from = after_key;
    }
    None
}

/// Iterate over top-level brace-balanced object slices in `content`.
///
/// Depth increments on `{` and decrements on `}`; a slice is complete when
/// depth returns to zero. A final object that never closes (truncated
/// output) is not yielded.
fn balanced_objects(content: &str) -> Vec<&str> {
    let bytes = content.as_bytes();
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start.take() {
                            objects.push(&content[s..=i]);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    objects
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_fenced_block() {
        let text = "Here is your itinerary:\n```json\n{\"title\":\"오사카 여행\",\"days\":[{\"day\":1,\"schedules\":[]}]}\n```\nEnjoy!";
        let plan = parse_model_text(text);
        assert_eq!(plan.title(), Some("오사카 여행"));
        let days = plan.days().unwrap().as_array().unwrap();
        assert_eq!(days.len(), 1);
    }

    #[test]
    fn cleans_backtick_continuations_in_fence() {
        let text = "```json\n{\n  \"title\": \"로마 여행\",\n  \"days\": [\n    {\"day\": 1, \"schedules\": [{\"address\": `Via dell Aeroporto, 320`}]}\n  ]\n}\n```";
        let plan = parse_model_text(text);
        assert_eq!(plan.title(), Some("로마 여행"));
        // No recovery markers survive in the structured output.
        let serialized = match &plan {
            RecoveredPlan::Structured(v) => serde_json::to_string(v).unwrap(),
            _ => panic!("expected structured"),
        };
        assert!(!serialized.contains('`'));
    }

    #[test]
    fn falls_back_to_brace_span_without_fence() {
        let text = "The plan follows. {\"title\":\"부산 여행\",\"days\":[]} That is all.";
        let plan = parse_model_text(text);
        assert_eq!(plan.title(), Some("부산 여행"));
    }

    #[test]
    fn parses_bare_json_text() {
        let text = "{\"title\":\"제주 여행\",\"days\":[]}";
        assert_eq!(parse_model_text(text).title(), Some("제주 여행"));
    }

    #[test]
    fn truncated_day_is_skipped_prior_days_survive() {
        // Day 2 is cut off mid-object: day 1 must survive, day 2 must not.
        let text = "```json\n{\"title\":\"서울 여행\",\"days\":[\
            {\"day\":1,\"title\":\"1일차\",\"schedules\":[{\"name\":\"경복궁\",\"time\":\"10:00\"}]},\
            {\"day\":2,\"title\":\"2일차\",\"schedules\":[{\"name\":\"남산";
        let plan = parse_model_text(text);
        assert_eq!(plan.title(), Some("서울 여행"));
        let days = plan.days().unwrap().as_array().unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0]["day"], 1);
    }

    #[test]
    fn title_only_synthesizes_placeholder_day() {
        let text = "```json\n{\"title\":\"방콕 여행\",\"days\":[{\"broken";
        let plan = parse_model_text(text);
        assert_eq!(plan.title(), Some("방콕 여행"));
        let days = plan.days().unwrap().as_array().unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0]["day"], 1);
        assert_eq!(days[0]["schedules"][0]["name"], "여행 계획 확인 필요");
    }

    #[test]
    fn unrecoverable_text_is_preserved() {
        let text = "죄송합니다. 일정을 생성할 수 없었습니다.";
        match parse_model_text(text) {
            RecoveredPlan::Unstructured { text: t } => assert_eq!(t, text),
            other => panic!("expected unstructured, got {other:?}"),
        }
    }

    #[test]
    fn never_panics_on_adversarial_input() {
        let inputs = [
            "",
            "{",
            "}",
            "```json",
            "```json\n```",
            "{{{{{{{{",
            "\"title\"",
            "\"title\": \"x\" \"days\": [",
            "날씨가 좋네요 ` + \n `",
            "{\"title\":\"\",\"days\":[]}",
        ];
        for input in inputs {
            let _ = parse_model_text(input);
        }
    }

    #[test]
    fn strips_line_noise_patterns() {
        assert_eq!(strip_line_noise("  \"a\": \"b\"` + "), "  \"a\": \"b\"");
        assert_eq!(strip_line_noise("`\"a\": 1,"), "\"a\": 1,");
        assert_eq!(strip_line_noise("\"a\": 1`"), "\"a\": 1");
        assert_eq!(strip_line_noise("  plain"), "  plain");
    }

    #[test]
    fn truncates_to_last_complete_close() {
        let cleaned = clean_json_text("{\"a\": [1, 2]}, \"b\": \"cut off her");
        assert!(cleaned.ends_with('}') || cleaned.ends_with(']'));
    }
}
