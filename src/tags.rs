//! The tag grammar the model is asked to answer in. Model output is an
//! untrusted wire format: parse defensively, return nothing on mismatch,
//! and let each call site apply its documented fallback.

use once_cell::sync::Lazy;
use regex::Regex;

static POINT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<point>(.*?)</point>\s*<id>(\d+)</id>").unwrap());

static SELECTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<selected>\s*(\d+)\s*</selected>").unwrap());

/// First `<name>…</name>` occurrence, trimmed. None for a missing or empty
/// tag.
pub fn extract_tag(text: &str, name: &str) -> Option<String> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    let value = text[start..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// All `<point>…</point><id>N</id>` pairs, in order of appearance. Ids are
/// whatever numbering the prompt established (1-based list positions).
pub fn extract_points(text: &str) -> Vec<(String, usize)> {
    POINT_RE
        .captures_iter(text)
        .filter_map(|cap| {
            let point = cap[1].trim().to_string();
            let id: usize = cap[2].parse().ok()?;
            if point.is_empty() {
                None
            } else {
                Some((point, id))
            }
        })
        .collect()
}

/// All `<selected>N</selected>` occurrences, in order of appearance.
pub fn extract_selected(text: &str) -> Vec<usize> {
    SELECTED_RE
        .captures_iter(text)
        .filter_map(|cap| cap[1].parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_tag_and_trims() {
        let text = "reasoning...\n<category> Gaming </category>\n<category>Other</category>";
        assert_eq!(extract_tag(text, "category").as_deref(), Some("Gaming"));
    }

    #[test]
    fn missing_or_empty_tags_yield_none() {
        assert_eq!(extract_tag("no tags here", "category"), None);
        assert_eq!(extract_tag("<category>  </category>", "category"), None);
        assert_eq!(extract_tag("<category>unclosed", "category"), None);
    }

    #[test]
    fn points_map_to_their_ids() {
        let text = "<point>First claim</point><id>3</id>\n\
                    noise\n\
                    <point>Second\nclaim</point> <id>7</id>";
        assert_eq!(
            extract_points(text),
            vec![
                ("First claim".to_string(), 3),
                ("Second\nclaim".to_string(), 7),
            ]
        );
    }

    #[test]
    fn malformed_points_are_dropped() {
        assert!(extract_points("<point>orphan point, no id</point>").is_empty());
        assert!(extract_points("<point></point><id>1</id>").is_empty());
    }

    #[test]
    fn selected_numbers_parse_in_order() {
        let text = "<selected>4</selected> <selected> 12 </selected><selected>1</selected>";
        assert_eq!(extract_selected(text), vec![4, 12, 1]);
    }

    #[test]
    fn selected_ignores_non_numeric_noise() {
        assert!(extract_selected("<selected>four</selected>").is_empty());
    }
}
