//! Ingestion pipeline orchestration.
//!
//! Runs the four stages in order under one error boundary:
//!
//! ```text
//! load_source ─▶ Provider::upload_file ─▶ wait_for_processing ─▶ create_context_cache
//!  (SourceFetch)        (Upload)          (ProcessingFailed /       (CacheCreation)
//!                                          ProcessingTimedOut)
//! ```
//!
//! Any failing stage aborts the run. Work already done by earlier stages is
//! not rolled back: a file uploaded before a later failure stays with the
//! provider until the provider expires it.
//!
//! By default every run uploads and caches again, so two runs produce two
//! remote files and two caches. With `cache.reuse_by_content_hash` the
//! [`Ingestor`] remembers the outcome per SHA-256 of (document bytes,
//! model, system instruction) and hands it back while the cache is live.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::{create_context_cache, CacheSpec, DEFAULT_SYSTEM_INSTRUCTION};
use crate::config::Config;
use crate::error::{ChatError, ChatResult};
use crate::models::{ContextCache, RemoteFile, SourceDocument};
use crate::poll::wait_for_processing;
use crate::progress::{IngestEvent, IngestProgressReporter};
use crate::provider::{normalize_model, Provider};
use crate::source::load_source;

/// Result of one successful ingestion run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub cache: ContextCache,
    /// The file as reported by the final (non-processing) poll.
    pub file: RemoteFile,
    /// SHA-256 of the document bytes, hex encoded.
    pub content_hash: String,
    /// `true` when a remembered cache was returned instead of a new one.
    pub reused: bool,
}

/// Owns the configuration and provider for repeated ingestion runs.
pub struct Ingestor {
    config: Arc<Config>,
    provider: Arc<dyn Provider>,
    http: reqwest::Client,
    instruction: String,
    remembered: Mutex<HashMap<String, IngestOutcome>>,
}

impl Ingestor {
    pub fn new(config: Arc<Config>, provider: Arc<dyn Provider>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider.timeout_secs))
            .build()?;
        let instruction = config
            .cache
            .system_instruction
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string());

        Ok(Self {
            config,
            provider,
            http,
            instruction,
            remembered: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn provider(&self) -> Arc<dyn Provider> {
        self.provider.clone()
    }

    /// The instruction attached to every cache this ingestor builds.
    pub fn system_instruction(&self) -> &str {
        &self.instruction
    }

    /// Run Loader → Uploader → Poller → Cache Builder once.
    pub async fn run(&self, progress: &dyn IngestProgressReporter) -> ChatResult<IngestOutcome> {
        let source_label = match (&self.config.source.path, &self.config.source.url) {
            (Some(p), _) => p.display().to_string(),
            (None, Some(u)) => u.clone(),
            (None, None) => String::new(),
        };
        progress.report(IngestEvent::Loading {
            source: source_label,
        });

        let doc = load_source(&self.config.source, &self.http)
            .await
            .map_err(ChatError::source_fetch)?;
        progress.report(IngestEvent::Loaded {
            bytes: doc.bytes.len() as u64,
            mime_type: doc.mime_type.clone(),
        });

        let content_hash = hex::encode(Sha256::digest(&doc.bytes));
        let reuse_key = self.reuse_key(&doc);

        if self.config.cache.reuse_by_content_hash {
            if let Some(outcome) = self.remembered_outcome(&reuse_key) {
                tracing::info!(cache = %outcome.cache.name, "reusing live context cache");
                progress.report(IngestEvent::Reused {
                    cache: outcome.cache.name.clone(),
                });
                return Ok(outcome);
            }
        }

        let uploaded = self
            .provider
            .upload_file(&doc)
            .await
            .map_err(ChatError::upload)?;
        tracing::info!(name = %uploaded.name, display_name = %doc.display_name, "document uploaded");
        progress.report(IngestEvent::Uploaded {
            name: uploaded.name.clone(),
        });

        let file = wait_for_processing(
            self.provider.as_ref(),
            &uploaded.name,
            &self.config.poll.policy(),
            progress,
        )
        .await?;

        let model = normalize_model(&self.config.provider.model);
        progress.report(IngestEvent::Caching {
            model: model.clone(),
            ttl_secs: self.config.cache.ttl_secs,
        });
        let spec = CacheSpec {
            display_name: &self.config.source.display_name,
            system_instruction: &self.instruction,
            model: &model,
            ttl_secs: self.config.cache.ttl_secs,
        };
        let cache = create_context_cache(self.provider.as_ref(), &file, &spec).await?;

        progress.report(IngestEvent::Ready {
            cache: cache.name.clone(),
            file_uri: file.uri.clone(),
        });

        let outcome = IngestOutcome {
            cache,
            file,
            content_hash,
            reused: false,
        };
        if self.config.cache.reuse_by_content_hash {
            self.remember(reuse_key, &outcome);
        }
        Ok(outcome)
    }

    fn reuse_key(&self, doc: &SourceDocument) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&doc.bytes);
        hasher.update(normalize_model(&self.config.provider.model).as_bytes());
        hasher.update(self.instruction.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn remembered_outcome(&self, key: &str) -> Option<IngestOutcome> {
        let mut remembered = self.remembered.lock().ok()?;
        let live = remembered
            .get(key)
            .map(|outcome| !outcome.cache.is_expired_at(Utc::now()));
        match live {
            Some(true) => remembered.get(key).map(|outcome| IngestOutcome {
                reused: true,
                ..outcome.clone()
            }),
            Some(false) => {
                remembered.remove(key);
                None
            }
            None => None,
        }
    }

    fn remember(&self, key: String, outcome: &IngestOutcome) {
        if let Ok(mut remembered) = self.remembered.lock() {
            prune_expired(&mut remembered, Utc::now());
            remembered.insert(key, outcome.clone());
        }
    }
}

/// Drop outcomes whose cache the provider has already expired.
fn prune_expired(remembered: &mut HashMap<String, IngestOutcome>, now: DateTime<Utc>) {
    remembered.retain(|_, outcome| !outcome.cache.is_expired_at(now));
}
