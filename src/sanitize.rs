//! Message body sanitization for classifier prompts
//!
//! Converts HTML or plain-text bodies into bounded plain text: markup is
//! stripped, entities decoded and whitespace normalized before the result is
//! cut to a character budget.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::models::{BodyContentType, Message};

/// Appended when text was cut to fit its budget
pub const TRUNCATION_MARKER: &str = "[... truncated]";

pub const DEFAULT_BODY_CHAR_BUDGET: usize = 4000;
pub const DEFAULT_PREVIEW_CHAR_BUDGET: usize = 2000;

static HTML_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

// The regex crate has no backreferences, so each raw-text element gets its own pattern
static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());
static STYLE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap());

static BLOCK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*/?\s*(?:br|p|div|li|ul|ol|tr|table|h[1-6]|blockquote|hr|section|article|header|footer)\b[^>]*>")
        .unwrap()
});

static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]+);").unwrap());

static HORIZONTAL_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\x0B\x0C\u{00A0}]+").unwrap());

static EXCESS_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Character budgets applied to prompt text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextBudgets {
    /// Budget when the full body is available
    pub body_chars: usize,
    /// Budget when only the preview is available
    pub preview_chars: usize,
}

impl Default for TextBudgets {
    fn default() -> Self {
        Self {
            body_chars: DEFAULT_BODY_CHAR_BUDGET,
            preview_chars: DEFAULT_PREVIEW_CHAR_BUDGET,
        }
    }
}

/// Strip markup from an HTML fragment and return normalized plain text.
///
/// Angle brackets that survive tag stripping, including escaped ones such as
/// `&lt;script&gt;`, come out as `‹` and `›`.
pub fn html_to_text(html: &str) -> String {
    let text = HTML_COMMENT.replace_all(html, "");
    let text = SCRIPT_BLOCK.replace_all(&text, "");
    let text = STYLE_BLOCK.replace_all(&text, "");
    let text = BLOCK_TAG.replace_all(&text, "\n");
    let text = ANY_TAG.replace_all(&text, "");
    let text = neutralize_angle_brackets(&decode_entities(&text));
    normalize_whitespace(&text)
}

fn neutralize_angle_brackets(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '<' => '‹',
            '>' => '›',
            other => other,
        })
        .collect()
}

/// Decode named and numeric character references
pub fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| {
            let entity = &caps[1];
            decode_entity(entity).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn decode_entity(entity: &str) -> Option<String> {
    if let Some(numeric) = entity.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(|c| c.to_string());
    }

    let decoded = match entity {
        "nbsp" => " ",
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        _ => return None,
    };
    Some(decoded.to_string())
}

/// Normalize line endings, collapse horizontal runs, trim lines and squeeze blank lines
pub fn normalize_whitespace(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let collapsed = HORIZONTAL_SPACE.replace_all(&text, " ");
    let lines: Vec<&str> = collapsed.lines().map(str::trim).collect();
    let joined = lines.join("\n");
    EXCESS_BLANK_LINES
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

/// Cut text to at most `budget` characters, appending the truncation marker when cut
pub fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }

    let kept: String = text.chars().take(budget).collect();
    let kept = kept.trim_end();
    if kept.is_empty() {
        TRUNCATION_MARKER.to_string()
    } else {
        format!("{}\n{}", kept, TRUNCATION_MARKER)
    }
}

/// Produce the bounded plain text used to classify a message.
///
/// The full body is preferred; the preview is used when the body is absent
/// or empty after sanitization.
pub fn message_text(message: &Message, budgets: &TextBudgets) -> String {
    if let Some(body) = message.body.as_ref() {
        let text = match body.content_type {
            BodyContentType::Html => html_to_text(&body.content),
            BodyContentType::Text => normalize_whitespace(&body.content),
        };
        if !text.is_empty() {
            return truncate_chars(&text, budgets.body_chars);
        }
    }

    let preview = normalize_whitespace(&decode_entities(&message.body_preview));
    truncate_chars(&preview, budgets.preview_chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageBody;
    use chrono::Utc;
    use proptest::prelude::*;

    fn message(body: Option<MessageBody>, preview: &str) -> Message {
        Message {
            id: "m1".to_string(),
            subject: "subject".to_string(),
            from: None,
            received_date_time: Utc::now(),
            body_preview: preview.to_string(),
            body,
            is_read: false,
        }
    }

    #[test]
    fn test_inline_markup_and_nbsp() {
        assert_eq!(html_to_text("<p>Hello&nbsp;<b>World</b></p>"), "Hello World");
    }

    #[test]
    fn test_script_style_and_comments_removed() {
        let html = r#"<html><head><style>p { color: red; }</style>
            <script type="text/javascript">alert("x < y");</script></head>
            <body><!-- tracking pixel --><p>Need a quote</p></body></html>"#;
        assert_eq!(html_to_text(html), "Need a quote");
    }

    #[test]
    fn test_block_tags_become_line_breaks() {
        let html = "<div>Line one<br>Line two<br/>Line three</div>";
        assert_eq!(html_to_text(html), "Line one\nLine two\nLine three");
    }

    #[test]
    fn test_blank_lines_collapsed() {
        let html = "<p>First</p><p></p><p></p><p></p><p>Second</p>";
        assert_eq!(html_to_text(html), "First\n\nSecond");
    }

    #[test]
    fn test_entities_decoded() {
        assert_eq!(
            decode_entities("Tom &amp; Jerry &lt;3 &quot;hi&quot; &apos;x&apos; &#65;&#x42;"),
            "Tom & Jerry <3 \"hi\" 'x' AB"
        );
    }

    #[test]
    fn test_escaped_markup_is_not_reintroduced() {
        let text = html_to_text("<p>Remove &lt;script&gt;alert(1)&lt;/script&gt; and 3 &#62; 2</p>");
        assert_eq!(text, "Remove ‹script›alert(1)‹/script› and 3 › 2");
        assert!(!text.contains('<') && !text.contains('>'));
    }

    #[test]
    fn test_unknown_entity_kept() {
        assert_eq!(decode_entities("&copy; 2025"), "&copy; 2025");
    }

    #[test]
    fn test_entities_decoded_once() {
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_crlf_and_spaces_normalized() {
        assert_eq!(
            normalize_whitespace("  Hello \t  there\r\n\r\n\r\n\r\nbye  \r"),
            "Hello there\n\nbye"
        );
    }

    #[test]
    fn test_truncate_appends_marker() {
        let text = "a".repeat(50);
        let cut = truncate_chars(&text, 10);
        assert_eq!(cut, format!("{}\n{}", "a".repeat(10), TRUNCATION_MARKER));
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let text = "é".repeat(20);
        let cut = truncate_chars(&text, 5);
        assert!(cut.starts_with(&"é".repeat(5)));
        assert!(cut.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_message_text_prefers_body() {
        let msg = message(
            Some(MessageBody {
                content_type: BodyContentType::Html,
                content: "<p>Full body</p>".to_string(),
            }),
            "preview",
        );
        assert_eq!(message_text(&msg, &TextBudgets::default()), "Full body");
    }

    #[test]
    fn test_message_text_plain_body() {
        let msg = message(
            Some(MessageBody {
                content_type: BodyContentType::Text,
                content: "Plain <not a tag> body".to_string(),
            }),
            "preview",
        );
        assert_eq!(
            message_text(&msg, &TextBudgets::default()),
            "Plain <not a tag> body"
        );
    }

    #[test]
    fn test_message_text_falls_back_to_preview_budget() {
        let msg = message(None, &"p".repeat(100));
        let budgets = TextBudgets {
            body_chars: 80,
            preview_chars: 20,
        };
        let text = message_text(&msg, &budgets);
        assert_eq!(text, format!("{}\n{}", "p".repeat(20), TRUNCATION_MARKER));
    }

    #[test]
    fn test_empty_html_body_uses_preview() {
        let msg = message(
            Some(MessageBody {
                content_type: BodyContentType::Html,
                content: "<html><body><img src=\"x\"></body></html>".to_string(),
            }),
            "Only the preview",
        );
        assert_eq!(message_text(&msg, &TextBudgets::default()), "Only the preview");
    }

    proptest! {
        #[test]
        fn prop_output_respects_budget(input in "[a-zA-Z0-9 <>/=\"\n\t]{0,400}", budget in 1usize..200) {
            let text = truncate_chars(&html_to_text(&input), budget);
            prop_assert!(text.chars().count() <= budget + 1 + TRUNCATION_MARKER.chars().count());
        }

        #[test]
        fn prop_output_has_no_angle_brackets(input in "[a-zA-Z0-9 <>/=\"&;#\n]{0,400}") {
            let text = html_to_text(&input);
            prop_assert!(!text.contains('<'));
            prop_assert!(!text.contains('>'));
        }

        #[test]
        fn prop_output_is_trimmed(input in "[a-z <>/\r\n\t]{0,200}") {
            let text = html_to_text(&input);
            prop_assert_eq!(text.trim(), text.as_str());
            prop_assert!(!text.contains("\n\n\n"));
            prop_assert!(!text.contains('\r'));
        }
    }
}
