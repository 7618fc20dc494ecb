//! Routing-marker parsing: `[FROM:name]`, `[TEAM_TASK:desc]`, `[NEXT:name!Pn,...]`.
//!
//! Implemented with plain string scanning rather than the `regex` crate:
//! find the opening tag, find the matching `]`, trim and validate the
//! capture. Markers are matched case-insensitively.

use crate::model::{Intent, ParsedAddressee};

/// Result of parsing a raw message body for routing markers.
#[derive(Debug, Clone, Default)]
pub struct ParsedMarkers {
    pub from: Option<String>,
    pub team_task: Option<String>,
    pub addressees: Vec<ParsedAddressee>,
    pub clean_content: String,
}

/// Parse `text` for `[FROM]`, `[TEAM_TASK]`, and `[NEXT]` markers.
pub fn parse(text: &str) -> ParsedMarkers {
    let from = find_first_tagged(text, "FROM").and_then(|raw| {
        let trimmed = raw.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    });

    let team_task = find_last_tagged(text, "TEAM_TASK").and_then(|raw| {
        let trimmed = raw.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    });

    let mut addressees = Vec::new();
    for raw in find_all_tagged(text, "NEXT") {
        for segment in raw.split(',') {
            if let Some(addressee) = parse_next_segment(segment) {
                addressees.push(addressee);
            } else if !segment.trim().is_empty() {
                log::warn!("discarding malformed [NEXT] segment: {:?}", segment);
            }
        }
    }

    let clean_content = normalize_whitespace(&strip_tag(text, "NEXT"));

    ParsedMarkers {
        from,
        team_task,
        addressees,
        clean_content,
    }
}

/// Strip only `[NEXT:...]` markers, leaving `[FROM]`/`[TEAM_TASK]` intact so
/// they remain visible in rendered history.
pub fn strip_next_only(text: &str) -> String {
    normalize_whitespace(&strip_tag(text, "NEXT"))
}

/// Strip all three marker kinds.
pub fn strip_all_markers(text: &str) -> String {
    let mut out = text.to_string();
    for tag in ["NEXT", "FROM", "TEAM_TASK"] {
        out = strip_tag(&out, tag);
    }
    normalize_whitespace(&out)
}

/// Does `text` mention the bare word `TEAM_TASK` without using the
/// conforming `[TEAM_TASK:...]` bracket form? Used by the coordinator to
/// reject malformed team-task messages before they are enqueued.
pub fn mentions_unbracketed_team_task(text: &str) -> bool {
    // ASCII-uppercase only: it's byte-length-preserving (unlike
    // `str::to_uppercase`, which can grow multi-byte characters such as
    // 'ﬀ' U+FB00 -> "FF"), so offsets found in `upper` stay valid byte
    // offsets into the original `text`.
    let upper = text.to_ascii_uppercase();
    let mut search_from = 0usize;
    while let Some(rel) = upper[search_from..].find("TEAM_TASK") {
        let idx = search_from + rel;
        let before_ok = idx == 0 || !is_word_char(upper.as_bytes()[idx - 1] as char);
        let after_idx = idx + "TEAM_TASK".len();
        let after_ok = after_idx >= upper.len() || !is_word_char(upper.as_bytes()[after_idx] as char);
        if before_ok && after_ok {
            // A bare word-boundary match; check whether it sits inside a
            // conforming `[TEAM_TASK:...]` bracket starting right here.
            // Compared against `upper` so a lowercase/mixed-case bracket
            // like `[team_task:...]` still conforms, matching what
            // `find_all_tagged` (also case-insensitive) would extract.
            let conforms = idx >= 1
                && upper.as_bytes()[idx - 1] == b'['
                && upper[idx..].find(':').map(|p| p == "TEAM_TASK".len()).unwrap_or(false);
            if !conforms {
                return true;
            }
        }
        search_from = after_idx;
    }
    false
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_next_segment(segment: &str) -> Option<ParsedAddressee> {
    let trimmed = segment.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (name_part, intent) = match trimmed.rfind('!') {
        Some(pos) => {
            let suffix = &trimmed[pos + 1..];
            if is_valid_intent_suffix(suffix) {
                (&trimmed[..pos], Intent::from_marker(suffix))
            } else {
                (trimmed, Intent::P2Reply)
            }
        }
        None => (trimmed, Intent::P2Reply),
    };
    let name = name_part.trim();
    if name.is_empty() {
        None
    } else {
        Some(ParsedAddressee {
            name: name.to_string(),
            intent,
        })
    }
}

fn is_valid_intent_suffix(s: &str) -> bool {
    let s = s.trim();
    s.len() == 2
        && (s.as_bytes()[0] == b'p' || s.as_bytes()[0] == b'P')
        && matches!(s.as_bytes()[1], b'1' | b'2' | b'3')
}

/// Find the first `[TAG:...]` payload (case-insensitive tag), trimmed.
fn find_first_tagged(text: &str, tag: &str) -> Option<String> {
    find_all_tagged(text, tag).into_iter().next()
}

/// Find the last `[TAG:...]` payload (case-insensitive tag), trimmed.
fn find_last_tagged(text: &str, tag: &str) -> Option<String> {
    find_all_tagged(text, tag).into_iter().last()
}

/// Scan `text` for every `[TAG:payload]` occurrence and return the payloads
/// in order of appearance. Matching is case-insensitive on the tag only.
fn find_all_tagged(text: &str, tag: &str) -> Vec<String> {
    let mut results = Vec::new();
    // ASCII-uppercase, not `to_uppercase`: byte-length-preserving, so every
    // offset found here stays a valid (and char-boundary-aligned) byte
    // offset into the original `text`.
    let upper = text.to_ascii_uppercase();
    let needle = format!("[{}:", tag.to_ascii_uppercase());
    let mut search_from = 0usize;
    while let Some(rel) = upper[search_from..].find(&needle) {
        let start = search_from + rel + needle.len();
        match text[start..].find(']') {
            Some(rel_end) => {
                let end = start + rel_end;
                results.push(text[start..end].to_string());
                search_from = end + 1;
            }
            None => break,
        }
    }
    results
}

/// Remove every `[TAG:...]` occurrence (case-insensitive tag) from `text`.
fn strip_tag(text: &str, tag: &str) -> String {
    // See `find_all_tagged`: ASCII-uppercase to keep offsets aligned with
    // the original (possibly non-ASCII) `text`.
    let upper = text.to_ascii_uppercase();
    let needle = format!("[{}:", tag.to_ascii_uppercase());
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    loop {
        match upper[cursor..].find(&needle) {
            Some(rel) => {
                let tag_start = cursor + rel;
                out.push_str(&text[cursor..tag_start]);
                match text[tag_start..].find(']') {
                    Some(rel_end) => {
                        cursor = tag_start + rel_end + 1;
                    }
                    None => {
                        // Unterminated marker: keep the rest verbatim.
                        out.push_str(&text[tag_start..]);
                        cursor = text.len();
                        break;
                    }
                }
            }
            None => {
                out.push_str(&text[cursor..]);
                break;
            }
        }
    }
    out
}

/// Collapse runs of two or more spaces to one, drop lines that become empty,
/// and trim the result.
fn normalize_whitespace(text: &str) -> String {
    let collapsed: Vec<String> = text
        .lines()
        .map(|line| {
            let mut result = String::with_capacity(line.len());
            let mut last_was_space = false;
            for c in line.chars() {
                if c == ' ' {
                    if !last_was_space {
                        result.push(' ');
                    }
                    last_was_space = true;
                } else {
                    result.push(c);
                    last_was_space = false;
                }
            }
            result.trim().to_string()
        })
        .filter(|line| !line.is_empty())
        .collect();
    collapsed.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Intent;

    #[test]
    fn parses_from_team_task_and_next() {
        let parsed = parse("[FROM:alice] [TEAM_TASK:ship it] hello [NEXT:bob!P1, carol]");
        assert_eq!(parsed.from.as_deref(), Some("alice"));
        assert_eq!(parsed.team_task.as_deref(), Some("ship it"));
        assert_eq!(parsed.addressees.len(), 2);
        assert_eq!(parsed.addressees[0].name, "bob");
        assert_eq!(parsed.addressees[0].intent, Intent::P1Interrupt);
        assert_eq!(parsed.addressees[1].name, "carol");
        assert_eq!(parsed.addressees[1].intent, Intent::P2Reply);
        assert!(parsed.clean_content.contains("[FROM:alice]"));
        assert!(!parsed.clean_content.contains("[NEXT"));
    }

    #[test]
    fn team_task_last_write_wins_within_one_message() {
        let parsed = parse("[TEAM_TASK:first] body [TEAM_TASK:second]");
        assert_eq!(parsed.team_task.as_deref(), Some("second"));
    }

    #[test]
    fn malformed_next_segment_is_skipped_not_fatal() {
        let parsed = parse("[NEXT:, bob]");
        assert_eq!(parsed.addressees.len(), 1);
        assert_eq!(parsed.addressees[0].name, "bob");
    }

    #[test]
    fn round_trip_property_strip_next_then_parse_has_no_addressees() {
        let text = "hi [NEXT:bob!P3] there [NEXT:carol]";
        let stripped = strip_next_only(text);
        assert!(parse(&stripped).addressees.is_empty());
    }

    #[test]
    fn strip_next_only_is_idempotent() {
        let text = "hi [NEXT:bob!P3] there";
        let once = strip_next_only(text);
        let twice = strip_next_only(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn detects_unbracketed_team_task_mention() {
        assert!(mentions_unbracketed_team_task("TEAM_TASK review the PRD"));
        assert!(!mentions_unbracketed_team_task("[TEAM_TASK:review the PRD]"));
        assert!(!mentions_unbracketed_team_task("nothing to see here"));
    }

    #[test]
    fn lowercase_and_mixed_case_bracket_conforms_like_parse_does() {
        // find_all_tagged/parse are case-insensitive on the tag, so a
        // lowercase or mixed-case bracket must conform here too, not be
        // rejected as a bare mention.
        assert!(!mentions_unbracketed_team_task("[team_task:review the PRD]"));
        assert!(!mentions_unbracketed_team_task("[Team_Task:review the PRD]"));
        let parsed = parse("[team_task:review the PRD] go");
        assert_eq!(parsed.team_task.as_deref(), Some("review the PRD"));
    }

    #[test]
    fn non_ascii_length_expanding_uppercase_does_not_misalign_or_panic() {
        // 'ﬀ' (U+FB00) is 3 bytes but `str::to_uppercase` expands it to the
        // 2-byte ASCII string "FF", which would misalign every subsequent
        // byte offset if scanning used `to_uppercase` instead of
        // `to_ascii_uppercase`.
        let text = "ﬀ [TEAM_TASK:ship it] body [NEXT:bob]";
        assert!(!mentions_unbracketed_team_task(text));
        let parsed = parse(text);
        assert_eq!(parsed.team_task.as_deref(), Some("ship it"));
        assert_eq!(parsed.addressees.len(), 1);
        assert_eq!(parsed.addressees[0].name, "bob");
    }
}
