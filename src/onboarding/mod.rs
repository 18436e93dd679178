//! Board onboarding — a question-and-answer conversation with a remote
//! assistant that ends in a confirmed board goal.
//!
//! The controller alternates between waiting for the user (a question is on
//! screen) and waiting for the assistant (an answer was sent). It polls the
//! remote session only in the latter, and only while the page is visible.

pub mod activity;
pub mod api;
pub mod controller;
pub mod model;
pub mod poller;
pub mod question;
pub mod sequence;
pub mod state;

pub use activity::{AlwaysActive, PageActivitySource, WatchPageActivity};
pub use api::{HttpOnboardingApi, OnboardingApi};
pub use controller::{ConfirmedCallback, OnboardingController};
pub use model::{AnswerPayload, DraftGoal, Message, Role, Session, SessionStatus};
pub use question::{ParsedMessage, ParsedQuestion, parse_message};
pub use state::{ControllerView, ConversationPhase, InFlight, SurfacedError};
