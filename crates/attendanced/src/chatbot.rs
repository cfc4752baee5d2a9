//! Natural-language questions over the attendance log, answered by Gemini.

use async_trait::async_trait;
use attendance_core::clock::format_timestamp;
use attendance_core::{AttendanceRecord, UserProfile};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::GeminiConfig;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("response contained no text")]
    EmptyResponse,
}

/// A text generation backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ChatError>;
}

/// Client for the Gemini `generateContent` REST endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    /// Build a client, or `None` when no API key is configured.
    pub fn from_config(config: &GeminiConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        Some(Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ChatError> {
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        let resp = self
            .http
            .post(self.endpoint())
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "gemini request rejected");
            return Err(ChatError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = resp.json().await?;
        candidate_text(&value).ok_or(ChatError::EmptyResponse)
    }
}

/// Concatenated text parts of the first candidate.
fn candidate_text(response: &Value) -> Option<String> {
    let parts = response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

/// Prompt embedding the whole attendance log ahead of the user's question.
pub fn build_prompt(log: &[(UserProfile, AttendanceRecord)], query: &str) -> String {
    let records = log
        .iter()
        .map(|(user, record)| {
            format!(
                "User: {}, Email: {}, Mobile: {}, Gender: {}, Timestamp: {}",
                user.name,
                user.email,
                user.mobile_number,
                user.gender,
                format_timestamp(&record.timestamp)
            )
        })
        .collect::<Vec<_>>()
        .join("; ");

    format!(
        "You are an attendance chatbot. Based on the following attendance records, answer the user's query. \
If you cannot find the information, state that you don't have it.\n\n\
Attendance Records:\n{records}\n\n\
User Query: {query}\n\n\
Chatbot:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entry(name: &str, day: u32) -> (UserProfile, AttendanceRecord) {
        let user = UserProfile {
            id: 1,
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            mobile_number: "5550100".to_string(),
            gender: "F".to_string(),
        };
        let record = AttendanceRecord {
            id: day as i64,
            user_id: 1,
            timestamp: NaiveDate::from_ymd_opt(2024, 3, day)
                .unwrap()
                .and_hms_opt(9, 15, 0)
                .unwrap(),
        };
        (user, record)
    }

    #[test]
    fn test_prompt_layout() {
        let prompt = build_prompt(&[entry("Asha", 4), entry("Asha", 5)], "Who came on the 5th?");
        assert!(prompt.starts_with("You are an attendance chatbot."));
        assert!(prompt.contains(
            "Attendance Records:\nUser: Asha, Email: asha@example.com, Mobile: 5550100, Gender: F, \
Timestamp: 2024-03-04T09:15:00; User: Asha"
        ));
        assert!(prompt.ends_with("User Query: Who came on the 5th?\n\nChatbot:"));
    }

    #[test]
    fn test_prompt_with_empty_log() {
        let prompt = build_prompt(&[], "anything?");
        assert!(prompt.contains("Attendance Records:\n\n\nUser Query: anything?"));
    }

    #[test]
    fn test_candidate_text_joins_parts() {
        let resp = json!({
            "candidates": [
                {"content": {"parts": [{"text": "Asha "}, {"text": "was present."}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        });
        assert_eq!(candidate_text(&resp).as_deref(), Some("Asha was present."));
    }

    #[test]
    fn test_candidate_text_missing() {
        assert!(candidate_text(&json!({"candidates": []})).is_none());
        assert!(candidate_text(&json!({"promptFeedback": {"blockReason": "SAFETY"}})).is_none());
    }

    #[test]
    fn test_client_requires_key() {
        let mut config = GeminiConfig {
            api_key: None,
            model: "gemini-2.0-flash".to_string(),
            base_url: "https://example.test/".to_string(),
        };
        assert!(GeminiClient::from_config(&config).is_none());

        config.api_key = Some("k".to_string());
        let client = GeminiClient::from_config(&config).unwrap();
        assert_eq!(
            client.endpoint(),
            "https://example.test/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }
}
