//! Core data models used throughout cache-chat.
//!
//! Two groups of types live here: the transient values that flow through
//! the ingestion pipeline and chat session ([`SourceDocument`],
//! [`Message`]), and the provider wire types ([`RemoteFile`],
//! [`ContextCache`], [`Content`], ...) which serialize to the
//! camelCase JSON the Gemini REST API speaks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============ Pipeline values ============

/// Where a [`SourceDocument`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    Path(PathBuf),
    Url(String),
}

impl std::fmt::Display for SourceOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceOrigin::Path(p) => write!(f, "{}", p.display()),
            SourceOrigin::Url(u) => f.write_str(u),
        }
    }
}

/// Raw bytes of the reference document, held only until upload.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub display_name: String,
    pub origin: SourceOrigin,
}

/// Role of a chat transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

/// One entry of the chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self::new(Role::Bot, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
        }
    }
}

// ============ Provider: files ============

/// Provider-side processing state of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Pending,
    Processing,
    Active,
    Failed,
    #[default]
    #[serde(other)]
    StateUnspecified,
}

impl FileState {
    /// `true` while the provider reports `PROCESSING`, the only state the
    /// poller waits out.
    pub fn is_in_flight(self) -> bool {
        self == FileState::Processing
    }
}

/// Error detail the provider attaches to a `FAILED` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Read-only view of a file held by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Resource name used for lookups, e.g. `files/abc123`.
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub mime_type: String,
    /// int64 encoded as a JSON string by the provider.
    #[serde(default)]
    pub size_bytes: Option<String>,
    #[serde(default)]
    pub state: FileState,
    #[serde(default)]
    pub error: Option<ProviderStatus>,
}

/// Envelope returned by the upload endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct UploadFileResponse {
    pub file: RemoteFile,
}

// ============ Provider: contents ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

/// One part of a [`Content`]: inline text or a file reference.
///
/// Keys this crate does not model (`thoughtSignature`, `inlineData`, ...)
/// are ignored when parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
    /// Set by thinking models on reasoning parts that are not the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn file_data(file_data: FileData) -> Self {
        Self {
            file_data: Some(file_data),
            ..Self::default()
        }
    }

    pub fn is_thought(&self) -> bool {
        self.thought.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    /// A `"user"` turn carrying a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part::text(text)],
        }
    }

    /// A role-less content holding one text part (system instructions).
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }
}

// ============ Provider: context caches ============

/// Request body for `POST /v1beta/cachedContents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCacheRequest {
    pub model: String,
    pub display_name: String,
    pub system_instruction: Content,
    pub contents: Vec<Content>,
    /// Duration in the provider's `"{seconds}s"` notation.
    pub ttl: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheUsage {
    #[serde(default)]
    pub total_token_count: u64,
}

/// Opaque handle to a provider-side context cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextCache {
    /// Resource name, e.g. `cachedContents/xyz`.
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<CacheUsage>,
}

impl ContextCache {
    /// Whether the provider has already dropped this cache at `now`.
    /// A cache without an `expire_time` is treated as live.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_time.is_some_and(|t| t <= now)
    }
}

// ============ Provider: generation ============

/// Request body for `POST /v1beta/{model}:generateContent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    pub cached_content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// Concatenated text parts of the first candidate; empty when the
    /// model returned nothing usable.
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|p| !p.is_thought())
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_file_parses_provider_json() {
        let file: RemoteFile = serde_json::from_value(json!({
            "name": "files/abc",
            "displayName": "Guide",
            "mimeType": "application/pdf",
            "sizeBytes": "1024",
            "uri": "https://files.example/abc",
            "state": "PROCESSING"
        }))
        .unwrap();
        assert_eq!(file.state, FileState::Processing);
        assert_eq!(file.size_bytes.as_deref(), Some("1024"));
        assert!(file.state.is_in_flight());
    }

    #[test]
    fn unknown_file_state_is_unspecified() {
        let file: RemoteFile =
            serde_json::from_value(json!({ "name": "files/x", "state": "ARCHIVED" })).unwrap();
        assert_eq!(file.state, FileState::StateUnspecified);
        assert!(!file.state.is_in_flight());
    }

    #[test]
    fn file_data_part_serializes_camel_case() {
        let content = Content {
            role: Some("user".into()),
            parts: vec![Part::file_data(FileData {
                mime_type: "application/pdf".into(),
                file_uri: "file://abc".into(),
            })],
        };
        assert_eq!(
            serde_json::to_value(&content).unwrap(),
            json!({
                "role": "user",
                "parts": [{ "fileData": { "mimeType": "application/pdf", "fileUri": "file://abc" } }]
            })
        );
    }

    #[test]
    fn system_instruction_content_omits_role() {
        let v = serde_json::to_value(Content::text("be brief")).unwrap();
        assert_eq!(v, json!({ "parts": [{ "text": "be brief" }] }));
    }

    #[test]
    fn generate_response_text_joins_parts() {
        let resp: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Hello" }, { "text": ", world" }] },
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(resp.text(), "Hello, world");
    }

    #[test]
    fn generate_response_tolerates_extra_part_keys() {
        let resp: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "role": "model", "parts": [
                    { "thought": true, "text": "The user asks about staking..." },
                    { "text": "Staking is taxed as income.", "thoughtSignature": "abc" }
                ] }
            }]
        }))
        .unwrap();
        assert_eq!(resp.text(), "Staking is taxed as income.");
    }

    #[test]
    fn only_processing_is_in_flight() {
        assert!(FileState::Processing.is_in_flight());
        for state in [
            FileState::Pending,
            FileState::Active,
            FileState::Failed,
            FileState::StateUnspecified,
        ] {
            assert!(!state.is_in_flight(), "{state:?}");
        }
        assert_eq!(serde_json::to_value(FileState::Pending).unwrap(), "PENDING");
    }

    #[test]
    fn generate_response_without_candidates_is_empty() {
        let resp: GenerateResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(resp.text(), "");
    }

    #[test]
    fn cache_expiry() {
        let cache: ContextCache = serde_json::from_value(json!({
            "name": "cachedContents/1",
            "model": "models/gemini-1.5-flash-001",
            "expireTime": "2024-06-01T12:10:00Z"
        }))
        .unwrap();
        let before = "2024-06-01T12:00:00Z".parse().unwrap();
        let after = "2024-06-01T12:10:01Z".parse().unwrap();
        assert!(!cache.is_expired_at(before));
        assert!(cache.is_expired_at(after));
    }

    #[test]
    fn messages_get_distinct_ids() {
        let a = Message::user("hi");
        let b = Message::user("hi");
        assert_ne!(a.id, b.id);
        assert_eq!(serde_json::to_value(&a).unwrap()["role"], "user");
    }
}
