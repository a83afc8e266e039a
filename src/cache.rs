//! Context cache builder.
//!
//! Bundles the processed file, the fixed system instruction, a model id
//! and a TTL into one `cachedContents` request. The request always has
//! exactly one `"user"` content entry holding one `fileData` part that
//! points at the file's `uri` and `mimeType` from the final poll.

use crate::error::{ChatError, ChatResult};
use crate::models::{Content, ContextCache, CreateCacheRequest, FileData, Part, RemoteFile};
use crate::provider::{normalize_model, Provider};

/// Persona and answering policy shared by every cache this deployment
/// builds. A deployment may replace it once through
/// `cache.system_instruction`.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are an expert in UK Crypto Law. Your task is to assist users by providing context-based answers directly from the cached guide.
Answer ONLY using the information available in the provided document, and do not use external sources.

Core functionality:
- Summarize key sections to simplify complex legal concepts in plain English.
- Provide contextual guidance on applying legal principles to Web3 projects.
- Highlight and explain relevant laws, FCA guidelines, and taxation policies in the UK.

Search and indexing:
- Retrieve specific sections or chapters from the cached guide based on the user's query.
- Cite sections or chapters to validate answers and provide deeper insight into the legal framework.
- Prioritize accuracy by referencing direct content from the guide.

Follow-up suggestions:
- Recommend relevant sections for further reading.
- Suggest contacting legal experts or contributors when questions require specialized or tailored legal advice.
- Offer expert contact details, such as email addresses or websites, where the guide provides them.

Important note:
- You are not a lawyer. Your responses are purely educational and do not constitute legal advice. Always recommend consulting a professional for legal matters.

Rules:
- If the question cannot be answered directly from the guide, politely say so and recommend reading the guide or contacting a legal expert.
- Do not answer anything that is not in the guide, even if you know the answer.
- Politely decline anything outside the context of crypto and Web3.
";

/// Everything the builder needs besides the file itself.
#[derive(Debug, Clone)]
pub struct CacheSpec<'a> {
    pub display_name: &'a str,
    pub system_instruction: &'a str,
    pub model: &'a str,
    pub ttl_secs: u64,
}

/// Build the `cachedContents` request body for `file`.
pub fn build_cache_request(file: &RemoteFile, spec: &CacheSpec<'_>) -> CreateCacheRequest {
    CreateCacheRequest {
        model: normalize_model(spec.model),
        display_name: spec.display_name.to_string(),
        system_instruction: Content::text(spec.system_instruction),
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part::file_data(FileData {
                mime_type: file.mime_type.clone(),
                file_uri: file.uri.clone(),
            })],
        }],
        ttl: format!("{}s", spec.ttl_secs),
    }
}

/// Submit one cache-creation request. Not retried.
pub async fn create_context_cache(
    provider: &dyn Provider,
    file: &RemoteFile,
    spec: &CacheSpec<'_>,
) -> ChatResult<ContextCache> {
    let request = build_cache_request(file, spec);
    let mut cache = provider
        .create_cache(&request)
        .await
        .map_err(ChatError::cache_creation)?;

    // Some responses omit the model; generation needs it to build the URL.
    if cache.model.is_empty() {
        cache.model = request.model;
    }
    tracing::info!(cache = %cache.name, model = %cache.model, expire_time = ?cache.expire_time, "context cache created");
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileState;
    use serde_json::json;

    fn active_file() -> RemoteFile {
        RemoteFile {
            name: "files/abc".into(),
            display_name: Some("Guide".into()),
            uri: "file://abc".into(),
            mime_type: "application/pdf".into(),
            size_bytes: None,
            state: FileState::Active,
            error: None,
        }
    }

    fn spec() -> CacheSpec<'static> {
        CacheSpec {
            display_name: "The Founder's Guide to UK",
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION,
            model: "gemini-1.5-flash-001",
            ttl_secs: 600,
        }
    }

    #[test]
    fn request_has_single_user_file_entry() {
        let req = build_cache_request(&active_file(), &spec());
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v["contents"],
            json!([{
                "role": "user",
                "parts": [{ "fileData": { "mimeType": "application/pdf", "fileUri": "file://abc" } }]
            }])
        );
        assert_eq!(v["systemInstruction"]["parts"][0]["text"], DEFAULT_SYSTEM_INSTRUCTION);
        assert_eq!(v["model"], "models/gemini-1.5-flash-001");
        assert_eq!(v["ttl"], "600s");
        assert_eq!(v["displayName"], "The Founder's Guide to UK");
    }

    #[test]
    fn instruction_covers_answering_policy() {
        assert!(DEFAULT_SYSTEM_INSTRUCTION.contains("ONLY"));
        assert!(DEFAULT_SYSTEM_INSTRUCTION.contains("not a lawyer"));
        assert!(DEFAULT_SYSTEM_INSTRUCTION.contains("decline"));
    }
}
