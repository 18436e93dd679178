//! Onboarding session collaborator — the remote side of the conversation.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use secrecy::ExposeSecret;

use crate::config::ApiConfig;
use crate::error::ApiError;

use super::model::{AnswerPayload, Session};

/// Start, fetch, answer and confirm a board's onboarding session.
#[async_trait]
pub trait OnboardingApi: Send + Sync {
    async fn start_session(&self, board_id: &str) -> Result<Session, ApiError>;

    async fn get_session(&self, board_id: &str, session_id: &str) -> Result<Session, ApiError>;

    async fn answer_session(
        &self,
        board_id: &str,
        session_id: &str,
        answer: &AnswerPayload,
    ) -> Result<Session, ApiError>;

    async fn confirm_session(&self, board_id: &str, session_id: &str)
    -> Result<Session, ApiError>;
}

/// JSON-over-HTTP implementation of [`OnboardingApi`].
pub struct HttpOnboardingApi {
    client: Client,
    config: ApiConfig,
}

impl HttpOnboardingApi {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Network {
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    /// Build a client from `ONBOARDING_API_*` environment variables.
    pub fn from_env() -> crate::error::Result<Self> {
        let config = ApiConfig::from_env()?;
        Ok(Self::new(config)?)
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, board_id: &str, tail: &str) -> String {
        format!(
            "{}/api/v1/boards/{}/onboarding{}",
            self.config.base_url.trim_end_matches('/'),
            board_id,
            tail
        )
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.config.token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    /// Send and decode a session response.
    async fn send(&self, builder: RequestBuilder) -> Result<Session, ApiError> {
        let response = builder.send().await.map_err(|e| ApiError::Network {
            reason: e.to_string(),
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ApiError::Network {
            reason: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: truncate(&body, 512),
            });
        }

        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| ApiError::Malformed(e.to_string()))?;
        Session::from_value(value)
    }
}

#[async_trait]
impl OnboardingApi for HttpOnboardingApi {
    async fn start_session(&self, board_id: &str) -> Result<Session, ApiError> {
        let url = self.url(board_id, "/start");
        tracing::debug!(board_id = %board_id, "Starting onboarding session");
        self.send(self.request(Method::POST, url)).await
    }

    async fn get_session(&self, board_id: &str, session_id: &str) -> Result<Session, ApiError> {
        let url = self.url(board_id, &format!("/{session_id}"));
        self.send(self.request(Method::GET, url)).await
    }

    async fn answer_session(
        &self,
        board_id: &str,
        session_id: &str,
        answer: &AnswerPayload,
    ) -> Result<Session, ApiError> {
        let url = self.url(board_id, &format!("/{session_id}/answer"));
        let body = answer.to_request();
        self.send(self.request(Method::POST, url).json(&body)).await
    }

    async fn confirm_session(
        &self,
        board_id: &str,
        session_id: &str,
    ) -> Result<Session, ApiError> {
        let url = self.url(board_id, &format!("/{session_id}/confirm"));
        self.send(self.request(Method::POST, url)).await
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_board_scoped() {
        let api = HttpOnboardingApi::new(ApiConfig::new("http://localhost:8000/")).unwrap();
        assert_eq!(
            api.url("b1", "/start"),
            "http://localhost:8000/api/v1/boards/b1/onboarding/start"
        );
        assert_eq!(
            api.url("b1", "/s9/answer"),
            "http://localhost:8000/api/v1/boards/b1/onboarding/s9/answer"
        );
        assert_eq!(api.base_url(), "http://localhost:8000/");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééé", 3), "é…");
    }
}
