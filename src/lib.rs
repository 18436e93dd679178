//! Board onboarding — client-side conversation controller.

pub mod config;
pub mod error;
pub mod onboarding;
