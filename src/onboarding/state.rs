//! Conversation phase — a pure projection of the held session and the
//! controller's in-flight requests.

use serde::Serialize;

use crate::error::{OnboardingError, Operation};

use super::model::{DraftGoal, Role, Session, SessionStatus};
use super::question::ParsedMessage;

/// Where the conversation currently stands, from the client's point of view.
///
/// ```text
/// Starting → AwaitingUserAnswer ⇄ SubmittingAnswer → AwaitingAssistant
///          → AwaitingUserAnswer → … → Confirming → Confirmed
/// ```
///
/// `Failed` is reachable from any start/answer/confirm error and is left
/// through `retry`. Only `Confirmed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    Starting,
    AwaitingUserAnswer,
    SubmittingAnswer,
    AwaitingAssistant,
    Confirming,
    Confirmed,
    Failed,
}

impl ConversationPhase {
    /// Derive the phase. First matching rule wins.
    pub fn project(
        session: Option<&Session>,
        in_flight: &InFlight,
        error: Option<&SurfacedError>,
    ) -> Self {
        if session.is_some_and(|s| s.status == SessionStatus::Confirmed) {
            return Self::Confirmed;
        }
        if in_flight.confirming {
            return Self::Confirming;
        }
        if in_flight.submitting {
            return Self::SubmittingAnswer;
        }
        if in_flight.starting {
            return Self::Starting;
        }
        if error.is_some() {
            return Self::Failed;
        }
        let Some(session) = session else {
            return Self::Starting;
        };
        if session.status == SessionStatus::Abandoned {
            return Self::Failed;
        }
        let assistant_spoke_last = session
            .latest_message()
            .is_some_and(|m| m.role == Role::Assistant);
        if assistant_spoke_last || session.has_draft_goal() {
            Self::AwaitingUserAnswer
        } else {
            Self::AwaitingAssistant
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed)
    }

    /// Whether the poll scheduler should be armed in this phase.
    pub fn wants_polling(&self) -> bool {
        matches!(self, Self::AwaitingAssistant)
    }

    pub fn accepts_answer(&self) -> bool {
        matches!(self, Self::AwaitingUserAnswer)
    }
}

impl std::fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::AwaitingUserAnswer => "awaiting_user_answer",
            Self::SubmittingAnswer => "submitting_answer",
            Self::AwaitingAssistant => "awaiting_assistant",
            Self::Confirming => "confirming",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Which collaborator calls are outstanding. Doubles as per-operation loading flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InFlight {
    pub starting: bool,
    pub refreshing: bool,
    pub submitting: bool,
    pub confirming: bool,
}

/// A user-visible, retryable error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurfacedError {
    pub operation: Operation,
    pub message: String,
}

impl SurfacedError {
    pub fn new(operation: Operation, err: &OnboardingError) -> Self {
        Self {
            operation,
            message: err.to_string(),
        }
    }
}

/// Everything the host UI needs to render the onboarding dialog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerView {
    pub board_id: String,
    pub phase: ConversationPhase,
    /// The latest assistant prompt, decoded.
    pub message: Option<ParsedMessage>,
    /// The option highlighted but not yet submitted.
    pub selected_option: Option<String>,
    pub draft_goal: Option<DraftGoal>,
    pub loading: InFlight,
    pub error: Option<SurfacedError>,
    /// A background refresh failed; the conversation is still usable.
    pub reconnecting: bool,
}

impl ControllerView {
    pub fn initial(board_id: impl Into<String>) -> Self {
        Self {
            board_id: board_id.into(),
            phase: ConversationPhase::Starting,
            message: None,
            selected_option: None,
            draft_goal: None,
            loading: InFlight::default(),
            error: None,
            reconnecting: false,
        }
    }

    pub fn can_confirm(&self) -> bool {
        self.draft_goal.is_some() && self.phase == ConversationPhase::AwaitingUserAnswer
    }
}
