//! Generation client bound to a context cache.
//!
//! Every call is single-turn: the request carries one `"user"` content
//! holding the new text only, plus the cache name. The model's context is
//! therefore the cached document and system instruction, never earlier
//! turns of the conversation. Sending the transcript would change answers
//! observably, so it is not done here.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{ChatError, ChatResult};
use crate::models::{Content, ContextCache, GenerateRequest};
use crate::provider::Provider;

/// Something that turns one user text into one reply.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Name of the context cache replies are grounded in.
    fn cache_name(&self) -> &str;

    /// Generate a reply to `text`. An empty string means the model
    /// returned no text.
    async fn generate(&self, text: &str) -> ChatResult<String>;
}

/// In-process [`Generator`] calling the provider directly.
pub struct GenerationClient {
    provider: Arc<dyn Provider>,
    cache: ContextCache,
}

impl GenerationClient {
    pub fn new(provider: Arc<dyn Provider>, cache: ContextCache) -> Self {
        Self { provider, cache }
    }

    pub fn cache(&self) -> &ContextCache {
        &self.cache
    }
}

/// The request body for one single-turn generation.
pub fn single_turn_request(cache_name: &str, text: &str) -> GenerateRequest {
    GenerateRequest {
        contents: vec![Content::user_text(text)],
        cached_content: cache_name.to_string(),
    }
}

#[async_trait]
impl Generator for GenerationClient {
    fn cache_name(&self) -> &str {
        &self.cache.name
    }

    async fn generate(&self, text: &str) -> ChatResult<String> {
        let request = single_turn_request(&self.cache.name, text);
        let response = self
            .provider
            .generate(&self.cache.model, &request)
            .await
            .map_err(ChatError::generation)?;
        Ok(response.text())
    }
}
