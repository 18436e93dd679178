//! Onboarding session data models.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ApiError, OnboardingError};

/// Lifecycle status of a remote onboarding session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    /// The assistant has produced a draft goal awaiting confirmation.
    Completed,
    Confirmed,
    Abandoned,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Confirmed => "confirmed",
            Self::Abandoned => "abandoned",
        };
        write!(f, "{s}")
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A single turn of the onboarding conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    /// Raw content: plain prose or a JSON-encoded question payload.
    pub content: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// The goal the assistant drafts once it has gathered enough answers.
///
/// Fields the controller does not know about are preserved in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DraftGoal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_metrics: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Snapshot of a remote onboarding session.
///
/// Always replaced wholesale; the controller never edits one in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub board_id: String,
    pub session_key: String,
    pub status: SessionStatus,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub draft_goal: Option<DraftGoal>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Decode and structurally validate a session payload.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ApiError> {
        if !value.is_object() {
            return Err(ApiError::Malformed(format!(
                "expected a JSON object, got {}",
                json_kind(&value)
            )));
        }
        let session: Session =
            serde_json::from_value(value).map_err(|e| ApiError::Malformed(e.to_string()))?;
        session.validate()?;
        Ok(session)
    }

    /// Checks serde cannot express: identifiers must be non-blank.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.id.trim().is_empty() {
            return Err(ApiError::Malformed("session id is empty".to_string()));
        }
        if self.board_id.trim().is_empty() {
            return Err(ApiError::Malformed("board id is empty".to_string()));
        }
        Ok(())
    }

    pub fn latest_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The most recent assistant turn, skipping any later user turns.
    pub fn latest_assistant_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    pub fn has_draft_goal(&self) -> bool {
        self.draft_goal.is_some()
    }
}

/// An answer to the current question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerPayload {
    /// One of the offered choices, by label.
    Option(String),
    /// Typed prose for a free-text question.
    FreeText(String),
    /// Prose accompanying an "Other" choice.
    Other(String),
}

impl AnswerPayload {
    /// Reject blank submissions before any network call.
    pub fn validate(&self) -> Result<(), OnboardingError> {
        let (kind, text) = match self {
            Self::Option(label) => ("option", label),
            Self::FreeText(text) => ("answer", text),
            Self::Other(text) => ("other answer", text),
        };
        if text.trim().is_empty() {
            return Err(OnboardingError::InvalidUserInput(format!("{kind} is empty")));
        }
        Ok(())
    }

    /// Wire body for the answer endpoint.
    pub fn to_request(&self) -> AnswerRequest {
        match self {
            Self::Option(label) => AnswerRequest {
                answer: label.clone(),
                other_text: None,
            },
            Self::FreeText(text) => AnswerRequest {
                answer: text.trim().to_string(),
                other_text: None,
            },
            Self::Other(text) => AnswerRequest {
                answer: OTHER_OPTION.to_string(),
                other_text: Some(text.trim().to_string()),
            },
        }
    }
}

/// Label of the choice that asks for accompanying free text.
pub const OTHER_OPTION: &str = "Other";

/// JSON body of an answer request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerRequest {
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_text: Option<String>,
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Message>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Message>>::deserialize(deserializer)?.unwrap_or_default())
}

/// RFC 3339, or a naive ISO timestamp taken as UTC.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp {raw:?}: {e}")))
}
