//! Decoding of assistant messages into questions.
//!
//! The assistant either sends plain prose or a JSON payload of the form
//! `{"question": "...", "options": ["...", ...]}`. Decoding is total: anything
//! that is not a well-formed question payload is rendered as plain text.

use serde::Serialize;
use serde_json::Value;

use super::model::Session;

/// A structured question extracted from an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedQuestion {
    pub question_text: String,
    /// Ordered choice labels. Empty means free text is expected.
    pub options: Vec<String>,
}

/// How the latest assistant message should be presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedMessage {
    Question(ParsedQuestion),
    PlainText { text: String },
}

impl ParsedMessage {
    /// The prompt to display, regardless of encoding.
    pub fn text(&self) -> &str {
        match self {
            Self::Question(q) => &q.question_text,
            Self::PlainText { text } => text,
        }
    }

    /// Offered choices; empty for free-text prompts.
    pub fn options(&self) -> &[String] {
        match self {
            Self::Question(q) => &q.options,
            Self::PlainText { .. } => &[],
        }
    }

    /// Whether `label` is one of the offered choices.
    pub fn has_option(&self, label: &str) -> bool {
        self.options().iter().any(|o| o == label)
    }
}

/// Decode raw assistant content.
pub fn parse_message(content: &str) -> ParsedMessage {
    match decode_question(content) {
        Some(question) => ParsedMessage::Question(question),
        None => ParsedMessage::PlainText {
            text: content.trim().to_string(),
        },
    }
}

/// Decode the session's latest assistant message, if there is one.
pub fn parse_latest(session: &Session) -> Option<ParsedMessage> {
    session
        .latest_assistant_message()
        .map(|m| parse_message(&m.content))
}

fn decode_question(content: &str) -> Option<ParsedQuestion> {
    let body = strip_code_fence(content.trim());
    if !body.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(body).ok()?;
    let obj = value.as_object()?;

    let question_text = obj.get("question")?.as_str()?.trim();
    if question_text.is_empty() {
        return None;
    }

    let options = match obj.get("options") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter_map(option_label).collect(),
        Some(_) => return None,
    };

    Some(ParsedQuestion {
        question_text: question_text.to_string(),
        options,
    })
}

/// Options may be bare strings or `{"id": .., "label": ..}` objects.
fn option_label(item: &Value) -> Option<String> {
    let label = match item {
        Value::String(s) => s.as_str(),
        Value::Object(obj) => obj
            .get("label")
            .and_then(Value::as_str)
            .or_else(|| obj.get("id").and_then(Value::as_str))?,
        _ => return None,
    };
    let label = label.trim();
    (!label.is_empty()).then(|| label.to_string())
}

/// Strip a single surrounding Markdown code fence (```json ... ```).
fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return s;
    };
    // Drop the info string ("json") on the opening line.
    match inner.split_once('\n') {
        Some((info, body)) if !info.trim_start().starts_with('{') => body.trim(),
        _ => inner.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_question_with_options() {
        let parsed =
            parse_message(r#"{"question":"Pick a style","options":["Option A","Option B"]}"#);
        assert_eq!(
            parsed,
            ParsedMessage::Question(ParsedQuestion {
                question_text: "Pick a style".to_string(),
                options: vec!["Option A".to_string(), "Option B".to_string()],
            })
        );
        assert_eq!(parsed.text(), "Pick a style");
        assert_eq!(parsed.options().len(), 2);
        assert!(parsed.has_option("Option B"));
        assert!(!parsed.has_option("option b"));
    }

    #[test]
    fn plain_prose_is_plain_text() {
        let parsed = parse_message("  Tell me about your team.  ");
        assert_eq!(
            parsed,
            ParsedMessage::PlainText {
                text: "Tell me about your team.".to_string()
            }
        );
        assert!(parsed.options().is_empty());
        assert!(!parsed.has_option("Other"));
    }

    #[test]
    fn broken_json_degrades_to_plain_text() {
        let raw = r#"{"question": "Pick one", "options": ["A""#;
        assert_eq!(
            parse_message(raw),
            ParsedMessage::PlainText {
                text: raw.to_string()
            }
        );
    }

    #[test]
    fn json_without_question_is_plain_text() {
        assert!(matches!(
            parse_message(r#"{"options":["A","B"]}"#),
            ParsedMessage::PlainText { .. }
        ));
        assert!(matches!(
            parse_message(r#"{"question": 42}"#),
            ParsedMessage::PlainText { .. }
        ));
        assert!(matches!(
            parse_message(r#"{"question": "   "}"#),
            ParsedMessage::PlainText { .. }
        ));
        assert!(matches!(
            parse_message(r#"["question"]"#),
            ParsedMessage::PlainText { .. }
        ));
    }

    #[test]
    fn options_of_wrong_type_degrade_to_plain_text() {
        assert!(matches!(
            parse_message(r#"{"question":"Q","options":"A,B"}"#),
            ParsedMessage::PlainText { .. }
        ));
    }

    #[test]
    fn question_without_options_expects_free_text() {
        let parsed = parse_message(r#"{"question":"What is the board for?","options":null}"#);
        match parsed {
            ParsedMessage::Question(q) => {
                assert_eq!(q.question_text, "What is the board for?");
                assert!(q.options.is_empty());
            }
            other => panic!("expected question, got {other:?}"),
        }
    }

    #[test]
    fn object_options_use_label_then_id() {
        let parsed = parse_message(
            r#"{"question":"Cadence?","options":[{"id":"daily","label":"Daily"},{"id":"weekly"},{"label":"  "},7,"Monthly"]}"#,
        );
        assert_eq!(parsed.options(), ["Daily", "weekly", "Monthly"]);
    }

    #[test]
    fn fenced_payload_is_decoded() {
        let raw = "```json\n{\"question\":\"Pick a style\",\"options\":[\"A\"]}\n```";
        let parsed = parse_message(raw);
        assert_eq!(parsed.text(), "Pick a style");
        assert_eq!(parsed.options(), ["A"]);

        let bare = "```{\"question\":\"Q?\"}```";
        assert_eq!(parse_message(bare).text(), "Q?");
    }

    #[test]
    fn parsing_is_idempotent() {
        let raw = r#"{"question":"Pick a style","options":["Option A","Option B"]}"#;
        let first = parse_message(raw);
        let second = parse_message(raw);
        assert_eq!(first, second);

        let prose = "Just prose";
        assert_eq!(parse_message(prose), parse_message(prose));
    }
}
