//! Request and response bodies exchanged with the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::UserProfile;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: UserProfile,
    /// Not sent by every backend version; callers fall back to a configured lifetime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(Self::Beginner),
            "intermediate" => Ok(Self::Intermediate),
            "advanced" => Ok(Self::Advanced),
            other => Err(format!("unknown difficulty: {other}")),
        }
    }
}

/// Options accompanying a generation submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub difficulty: Difficulty,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitGenerationRequest {
    pub github_url: String,
    #[serde(flatten)]
    pub options: GenerationOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitGenerationResponse {
    #[serde(
        default,
        rename = "generationId",
        alias = "generation_id",
        alias = "job_id"
    )]
    pub generation_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatusResponse {
    #[serde(alias = "is_generating")]
    pub is_generating: bool,
    #[serde(default, alias = "generation_step")]
    pub generation_step: u32,
    #[serde(default, alias = "generation_progress")]
    pub generation_progress: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, alias = "error_message", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Durable record of the job currently being observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingGeneration {
    pub target_repository_url: String,
}

/// Error envelope produced by the backend on non-success statuses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    /// Human-readable message, if the envelope carries one.
    ///
    /// `detail` is either a string or a list of field errors with a `msg` key.
    pub fn message(&self) -> Option<String> {
        match &self.detail {
            Some(Value::String(text)) => return Some(text.clone()),
            Some(Value::Array(items)) => {
                let parts: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(Value::as_str))
                    .collect();
                if !parts.is_empty() {
                    return Some(parts.join("; "));
                }
            }
            _ => {}
        }
        self.message.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_response_reads_camel_case() {
        let status: GenerationStatusResponse = serde_json::from_str(
            r#"{"isGenerating": true, "generationStep": 2, "generationProgress": 40, "status": "ANALYZING"}"#,
        )
        .unwrap();
        assert!(status.is_generating);
        assert_eq!(status.generation_step, 2);
        assert_eq!(status.generation_progress, 40);
        assert_eq!(status.status.as_deref(), Some("ANALYZING"));
        assert_eq!(status.error_message, None);
    }

    #[test]
    fn submit_request_flattens_options() {
        let request = SubmitGenerationRequest {
            github_url: "https://github.com/a/b".into(),
            options: GenerationOptions {
                difficulty: Difficulty::Advanced,
                focus_areas: vec!["parsing".into()],
                description: None,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["github_url"], "https://github.com/a/b");
        assert_eq!(json["difficulty"], "advanced");
        assert_eq!(json["focus_areas"][0], "parsing");
        assert!(json.get("description").is_none());
    }

    #[test]
    fn submit_response_accepts_legacy_job_id() {
        let response: SubmitGenerationResponse =
            serde_json::from_str(r#"{"message": "Analysis job started.", "job_id": "j1"}"#)
                .unwrap();
        assert_eq!(response.generation_id.as_deref(), Some("j1"));
    }

    #[test]
    fn error_body_messages() {
        let plain: ErrorBody = serde_json::from_str(r#"{"detail": "Not found"}"#).unwrap();
        assert_eq!(plain.message().as_deref(), Some("Not found"));

        let fields: ErrorBody = serde_json::from_str(
            r#"{"detail": [{"loc": ["body", "email"], "msg": "value is not a valid email"}]}"#,
        )
        .unwrap();
        assert_eq!(fields.message().as_deref(), Some("value is not a valid email"));

        let empty = ErrorBody::default();
        assert_eq!(empty.message(), None);
    }

    #[test]
    fn difficulty_parses_case_insensitively() {
        assert_eq!("Advanced".parse::<Difficulty>(), Ok(Difficulty::Advanced));
        assert!("expert".parse::<Difficulty>().is_err());
    }
}
