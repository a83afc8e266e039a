//! Provider abstraction and the Gemini REST implementation.
//!
//! Defines the [`Provider`] trait, the seam between the pipeline and the
//! hosted model service, and [`GeminiProvider`], which speaks the
//! Generative Language REST API:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | [`upload_file`](Provider::upload_file) | `POST /upload/v1beta/files` (resumable: start, then `upload, finalize`) |
//! | [`get_file`](Provider::get_file) | `GET /v1beta/{name}` |
//! | [`create_cache`](Provider::create_cache) | `POST /v1beta/cachedContents` |
//! | [`generate`](Provider::generate) | `POST /v1beta/{model}:generateContent` |
//!
//! The API key is sent in the `x-goog-api-key` header.
//!
//! # Retry Strategy
//!
//! None. Every call is issued once and any non-2xx response or transport
//! error is returned to the caller. The only wait in the pipeline is the
//! processing poll in [`crate::poll`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::models::{
    ContextCache, CreateCacheRequest, GenerateRequest, GenerateResponse, RemoteFile,
    SourceDocument, UploadFileResponse,
};

/// Operations the pipeline needs from the hosted model service.
///
/// Implementations must be cheap to share behind an `Arc`; the server
/// clones one provider into every request handler.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Store the document with the provider. Every call creates a new
    /// remote file; there is no deduplication.
    async fn upload_file(&self, doc: &SourceDocument) -> Result<RemoteFile>;

    /// Look up a previously uploaded file by resource name.
    async fn get_file(&self, name: &str) -> Result<RemoteFile>;

    /// Create a context cache and return its handle.
    async fn create_cache(&self, request: &CreateCacheRequest) -> Result<ContextCache>;

    /// Run one generation against `model`.
    async fn generate(&self, model: &str, request: &GenerateRequest) -> Result<GenerateResponse>;
}

/// Prefix a bare model id with `models/`.
pub fn normalize_model(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

// ============ Gemini Provider ============

/// [`Provider`] backed by the Gemini REST API.
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiProvider {
    /// Create a provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no API key was resolved from
    /// `provider.api_key_env`, or if the HTTP client cannot be built.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            bail!("{} environment variable not set", config.api_key_env);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn upload_file(&self, doc: &SourceDocument) -> Result<RemoteFile> {
        let start_url = self.url("upload/v1beta/files");
        let metadata = serde_json::json!({
            "file": { "displayName": doc.display_name }
        });

        let start = self
            .client
            .post(&start_url)
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", doc.bytes.len())
            .header("X-Goog-Upload-Header-Content-Type", &doc.mime_type)
            .json(&metadata)
            .send()
            .await
            .with_context(|| format!("POST {}", start_url))?;
        let start = check_status(start, "upload start").await?;

        let session_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("upload start response missing x-goog-upload-url"))?;

        let finish = self
            .client
            .post(&session_url)
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header(reqwest::header::CONTENT_LENGTH, doc.bytes.len())
            .body(doc.bytes.clone())
            .send()
            .await
            .context("sending upload bytes")?;
        let finish = check_status(finish, "upload finalize").await?;

        let body: UploadFileResponse = finish
            .json()
            .await
            .context("Invalid upload response: missing file")?;
        tracing::debug!(name = %body.file.name, state = ?body.file.state, "file uploaded");
        Ok(body.file)
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile> {
        let url = self.url(&format!("v1beta/{}", name));
        let resp = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;
        let resp = check_status(resp, "get file").await?;
        resp.json().await.context("Invalid file response")
    }

    async fn create_cache(&self, request: &CreateCacheRequest) -> Result<ContextCache> {
        let url = self.url("v1beta/cachedContents");
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .with_context(|| format!("POST {}", url))?;
        let resp = check_status(resp, "create cache").await?;
        resp.json().await.context("Invalid cachedContents response")
    }

    async fn generate(&self, model: &str, request: &GenerateRequest) -> Result<GenerateResponse> {
        let url = self.url(&format!("v1beta/{}:generateContent", normalize_model(model)));
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .with_context(|| format!("POST {}", url))?;
        let resp = check_status(resp, "generate content").await?;
        resp.json().await.context("Invalid generateContent response")
    }
}

/// Pass 2xx responses through; turn anything else into an error carrying
/// the provider's message when it sent one.
async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body_text = response.text().await.unwrap_or_default();
    bail!(
        "Gemini API error {} ({}): {}",
        status,
        what,
        provider_error_message(&body_text)
    );
}

/// Extract `error.message` from a provider error body, falling back to the
/// raw text.
fn provider_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_normalization() {
        assert_eq!(normalize_model("gemini-1.5-flash-001"), "models/gemini-1.5-flash-001");
        assert_eq!(
            normalize_model("models/gemini-1.5-flash-001"),
            "models/gemini-1.5-flash-001"
        );
    }

    #[test]
    fn error_message_extraction() {
        let body = r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(provider_error_message(body), "API key not valid");
        assert_eq!(provider_error_message("bad gateway"), "bad gateway");
    }

    #[test]
    fn new_requires_api_key() {
        let cfg = ProviderConfig::default();
        let err = GeminiProvider::new(&cfg).err().unwrap();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn url_joining() {
        let cfg = ProviderConfig {
            api_key: "k".into(),
            base_url: "http://127.0.0.1:9/".into(),
            ..ProviderConfig::default()
        };
        let p = GeminiProvider::new(&cfg).unwrap();
        assert_eq!(p.url("/v1beta/files/abc"), "http://127.0.0.1:9/v1beta/files/abc");
    }
}
