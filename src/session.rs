//! Chat session controller and the per-message generation cycle.
//!
//! A [`ChatSession`] owns one transcript and moves through three states:
//!
//! ```text
//! Initializing ──initialize() ok──▶ Ready ──send_message()──▶ Generating
//!      │                              ▲                          │
//!      └─ initialize() err: stays     └──────── always ──────────┘
//! ```
//!
//! Input is accepted only in `Ready`. A user message is appended before
//! the request is issued, so it is visible while the reply is pending.
//! Failures come back as [`SendOutcome::Failed`] and leave the transcript
//! without a bot reply; rendering the failure is up to the caller.
//!
//! Two [`SessionBackend`]s exist: [`DirectBackend`] runs ingestion and
//! generation in process, [`HttpBackend`] talks to a running
//! `cchat serve`.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ChatError, ChatResult};
use crate::generate::{GenerationClient, Generator};
use crate::ingest::Ingestor;
use crate::models::Message;
use crate::progress::IngestProgressReporter;
use crate::server::{ChatReply, ChatRequest, ErrorBody, IngestSummary};

/// Bot text used when the model answers with nothing.
pub const FALLBACK_REPLY: &str =
    "Sorry, I couldn't find an answer to that in the guide. Please try rephrasing your question.";

/// Starter question shown on an empty transcript.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Suggestion {
    pub title: &'static str,
    pub description: &'static str,
}

pub const SUGGESTIONS: &[Suggestion] = &[
    Suggestion {
        title: "What are the key regulations for launching a token in the UK?",
        description: "Summarize the legal framework for token launches in the UK.",
    },
    Suggestion {
        title: "How is staking taxed under UK crypto regulations?",
        description: "Get insights on how staking rewards are taxed in the UK.",
    },
    Suggestion {
        title: "Is my crypto project considered a security?",
        description: "Understand the criteria for crypto assets being classified as securities.",
    },
    Suggestion {
        title: "How does the FCA regulate DeFi projects?",
        description: "Summarize the FCA's stance on decentralized finance (DeFi) platforms.",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Ready,
    Generating,
}

/// Result of one [`ChatSession::send_message`] call.
#[derive(Debug)]
pub enum SendOutcome {
    /// The bot reply that was appended.
    Replied(Message),
    /// Input was empty after trimming; nothing changed.
    Empty,
    /// Input longer than the configured limit; nothing changed.
    TooLong { chars: usize, max: usize },
    /// Input is disabled in this state; nothing changed.
    NotReady(SessionState),
    /// The user message stays in the transcript; no bot reply was added.
    Failed(ChatError),
}

/// Produces the [`Generator`] a session talks to once it is ready.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Prime the model (run ingestion) and return a generator bound to the
    /// resulting cache.
    async fn connect(&self) -> ChatResult<Box<dyn Generator>>;
}

/// A user message that has been appended and is waiting for its reply.
///
/// Holds the session mutably until [`complete`](PendingTurn::complete)
/// finishes, so no second turn can start meanwhile. Dropping the turn,
/// completed or not, puts the session back in `Ready`; this covers a
/// caller that abandons the turn and a `complete` future that is dropped
/// mid-flight. The user message stays in the transcript either way.
#[must_use = "a pending turn keeps the session in Generating until completed or dropped"]
pub struct PendingTurn<'a> {
    session: &'a mut ChatSession,
    message: Message,
}

impl PendingTurn<'_> {
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// The transcript as it is while the reply is pending.
    pub fn transcript(&self) -> &[Message] {
        &self.session.messages
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// Issue the generation and append the reply.
    pub async fn complete(mut self) -> SendOutcome {
        let session = &mut *self.session;
        let Some(generator) = session.generator.as_deref() else {
            return SendOutcome::NotReady(session.state);
        };
        let result = generator.generate(&self.message.content).await;

        match result {
            Ok(text) => {
                let content = if text.trim().is_empty() {
                    FALLBACK_REPLY.to_string()
                } else {
                    text
                };
                let reply = Message::bot(content);
                session.messages.push(reply.clone());
                SendOutcome::Replied(reply)
            }
            Err(err) => {
                tracing::warn!(message_id = %self.message.id, error = %err, "no reply generated");
                SendOutcome::Failed(err)
            }
        }
    }
}

impl Drop for PendingTurn<'_> {
    fn drop(&mut self) {
        if self.session.state == SessionState::Generating {
            self.session.state = SessionState::Ready;
        }
    }
}

/// One chat transcript plus its readiness state.
pub struct ChatSession {
    backend: Box<dyn SessionBackend>,
    generator: Option<Box<dyn Generator>>,
    messages: Vec<Message>,
    state: SessionState,
    max_chars: usize,
}

impl ChatSession {
    pub fn new(backend: Box<dyn SessionBackend>, max_chars: usize) -> Self {
        Self {
            backend,
            generator: None,
            messages: Vec::new(),
            state: SessionState::Initializing,
            max_chars,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the input box should be enabled.
    pub fn input_enabled(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Cache the session is bound to, once ready.
    pub fn cache_name(&self) -> Option<&str> {
        self.generator.as_deref().map(|g| g.cache_name())
    }

    /// Connect the backend. On failure the session stays `Initializing`;
    /// the caller decides whether to try again.
    pub async fn initialize(&mut self) -> ChatResult<()> {
        if self.state != SessionState::Initializing {
            return Ok(());
        }
        match self.backend.connect().await {
            Ok(generator) => {
                tracing::info!(cache = generator.cache_name(), "chat session ready");
                self.generator = Some(generator);
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "chat session initialization failed");
                Err(err)
            }
        }
    }

    /// Validate `input`, append it as a user message and enter
    /// `Generating`. Synchronous: the message is in the transcript when
    /// this returns.
    pub fn begin_turn(&mut self, input: &str) -> Result<PendingTurn<'_>, SendOutcome> {
        if self.state != SessionState::Ready || self.generator.is_none() {
            return Err(SendOutcome::NotReady(self.state));
        }
        if input.trim().is_empty() {
            return Err(SendOutcome::Empty);
        }
        let chars = input.chars().count();
        if chars > self.max_chars {
            return Err(SendOutcome::TooLong {
                chars,
                max: self.max_chars,
            });
        }

        let message = Message::user(input);
        self.messages.push(message.clone());
        self.state = SessionState::Generating;
        Ok(PendingTurn {
            session: self,
            message,
        })
    }

    /// `begin_turn` followed by [`PendingTurn::complete`].
    pub async fn send_message(&mut self, input: &str) -> SendOutcome {
        match self.begin_turn(input) {
            Ok(turn) => turn.complete().await,
            Err(outcome) => outcome,
        }
    }
}

// ============ Direct backend ============

/// Runs ingestion in process and generates through the provider.
pub struct DirectBackend {
    ingestor: Arc<Ingestor>,
    progress: Box<dyn IngestProgressReporter>,
}

impl DirectBackend {
    pub fn new(ingestor: Arc<Ingestor>, progress: Box<dyn IngestProgressReporter>) -> Self {
        Self { ingestor, progress }
    }
}

#[async_trait]
impl SessionBackend for DirectBackend {
    async fn connect(&self) -> ChatResult<Box<dyn Generator>> {
        let outcome = self.ingestor.run(self.progress.as_ref()).await?;
        Ok(Box::new(GenerationClient::new(
            self.ingestor.provider(),
            outcome.cache,
        )))
    }
}

// ============ HTTP backend ============

/// Talks to a running `cchat serve` over its JSON API.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn transport_error(err: reqwest::Error) -> ChatError {
    ChatError::Remote {
        code: "transport".to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl SessionBackend for HttpBackend {
    async fn connect(&self) -> ChatResult<Box<dyn Generator>> {
        let url = format!("{}/api/upload", self.base_url);
        let summary: IngestSummary = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(transport_error)?
            .json()
            .await
            .map_err(transport_error)?;

        match (summary.success, summary.cached_result) {
            (true, Some(cache)) => Ok(Box::new(RemoteGenerator {
                client: self.client.clone(),
                base_url: self.base_url.clone(),
                cache_name: cache.name,
                model: Some(cache.model).filter(|m| !m.is_empty()),
            })),
            (true, None) => Err(ChatError::Remote {
                code: "invalid_response".to_string(),
                message: "ingestion succeeded without a cache handle".to_string(),
            }),
            (false, _) => Err(ChatError::Remote {
                code: summary.stage.unwrap_or_else(|| "internal".to_string()),
                message: summary.error.unwrap_or_default(),
            }),
        }
    }
}

/// [`Generator`] that posts to `/api/chat`.
struct RemoteGenerator {
    client: reqwest::Client,
    base_url: String,
    cache_name: String,
    model: Option<String>,
}

#[async_trait]
impl Generator for RemoteGenerator {
    fn cache_name(&self) -> &str {
        &self.cache_name
    }

    async fn generate(&self, text: &str) -> ChatResult<String> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            cache_name: self.cache_name.clone(),
            model: self.model.clone(),
            message: text.to_string(),
        };
        let resp = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::Generation(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let message = match resp.json::<ErrorBody>().await {
                Ok(body) => body.error.message,
                Err(_) => status.to_string(),
            };
            return Err(ChatError::Generation(message));
        }

        let reply: ChatReply = resp
            .json()
            .await
            .map_err(|e| ChatError::Generation(e.to_string()))?;
        Ok(reply.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Generator replaying canned results.
    struct Canned {
        replies: Mutex<Vec<ChatResult<String>>>,
        calls: Arc<AtomicU32>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Generator for Canned {
        fn cache_name(&self) -> &str {
            "cachedContents/test"
        }

        async fn generate(&self, text: &str) -> ChatResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(text.to_string());
            self.replies.lock().unwrap().remove(0)
        }
    }

    struct CannedBackend {
        fail_connect: bool,
        replies: Mutex<Option<Vec<ChatResult<String>>>>,
        calls: Arc<AtomicU32>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SessionBackend for CannedBackend {
        async fn connect(&self) -> ChatResult<Box<dyn Generator>> {
            if self.fail_connect {
                return Err(ChatError::Upload("provider rejected file".into()));
            }
            let replies = self.replies.lock().unwrap().take().unwrap_or_default();
            Ok(Box::new(Canned {
                replies: Mutex::new(replies),
                calls: self.calls.clone(),
                seen: self.seen.clone(),
            }))
        }
    }

    struct Harness {
        session: ChatSession,
        calls: Arc<AtomicU32>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    fn harness(fail_connect: bool, replies: Vec<ChatResult<String>>) -> Harness {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let backend = CannedBackend {
            fail_connect,
            replies: Mutex::new(Some(replies)),
            calls: calls.clone(),
            seen: seen.clone(),
        };
        Harness {
            session: ChatSession::new(Box::new(backend), 2000),
            calls,
            seen,
        }
    }

    #[tokio::test]
    async fn send_is_noop_while_initializing() {
        let mut h = harness(false, vec![Ok("hi".into())]);
        let outcome = h.session.send_message("What is a security token?").await;
        assert!(matches!(outcome, SendOutcome::NotReady(SessionState::Initializing)));
        assert!(h.session.messages().is_empty());
        assert!(!h.session.input_enabled());
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_initialize_stays_initializing() {
        let mut h = harness(true, vec![]);
        let err = h.session.initialize().await.unwrap_err();
        assert_eq!(err.code(), "upload");
        assert_eq!(h.session.state(), SessionState::Initializing);
        assert!(h.session.cache_name().is_none());
    }

    #[tokio::test]
    async fn whitespace_input_is_rejected_without_network() {
        let mut h = harness(false, vec![Ok("unused".into())]);
        h.session.initialize().await.unwrap();
        for input in ["", "   ", "\n\t "] {
            assert!(matches!(h.session.send_message(input).await, SendOutcome::Empty));
        }
        assert!(h.session.messages().is_empty());
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn overlong_input_is_rejected() {
        let mut h = harness(false, vec![]);
        h.session.initialize().await.unwrap();
        let input = "a".repeat(2001);
        match h.session.send_message(&input).await {
            SendOutcome::TooLong { chars, max } => {
                assert_eq!(chars, 2001);
                assert_eq!(max, 2000);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(h.session.messages().is_empty());
    }

    #[tokio::test]
    async fn user_message_is_visible_before_reply() {
        let mut h = harness(false, vec![Ok("Staking rewards are income.".into())]);
        h.session.initialize().await.unwrap();

        let turn = h.session.begin_turn("How is staking taxed?").unwrap();
        assert_eq!(turn.transcript().len(), 1);
        assert_eq!(turn.transcript()[0].role, Role::User);
        assert_eq!(turn.message().content, "How is staking taxed?");
        assert_eq!(turn.state(), SessionState::Generating);

        let outcome = turn.complete().await;
        assert!(matches!(outcome, SendOutcome::Replied(ref m) if m.role == Role::Bot));
        assert_eq!(h.session.messages().len(), 2);
        assert_eq!(h.session.messages()[1].content, "Staking rewards are income.");
        assert_eq!(h.session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn abandoned_turn_returns_session_to_ready() {
        let mut h = harness(false, vec![Ok("Later answer.".into())]);
        h.session.initialize().await.unwrap();

        let turn = h.session.begin_turn("Is my token a security?").unwrap();
        drop(turn);

        assert_eq!(h.session.state(), SessionState::Ready);
        assert!(h.session.input_enabled());
        assert_eq!(h.session.messages().len(), 1);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);

        // The session accepts the next message normally.
        let outcome = h.session.send_message("Is my token a security?").await;
        assert!(matches!(outcome, SendOutcome::Replied(_)));
        assert_eq!(h.session.messages().len(), 2);
    }

    /// Generator whose reply never arrives.
    struct Hanging;

    #[async_trait]
    impl Generator for Hanging {
        fn cache_name(&self) -> &str {
            "cachedContents/hanging"
        }

        async fn generate(&self, _text: &str) -> ChatResult<String> {
            std::future::pending().await
        }
    }

    struct HangingBackend;

    #[async_trait]
    impl SessionBackend for HangingBackend {
        async fn connect(&self) -> ChatResult<Box<dyn Generator>> {
            Ok(Box::new(Hanging))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_request_returns_session_to_ready() {
        let mut session = ChatSession::new(Box::new(HangingBackend), 2000);
        session.initialize().await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            session.send_message("How does the FCA regulate DeFi?"),
        )
        .await;
        assert!(result.is_err());

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].role, Role::User);
    }

    #[tokio::test]
    async fn only_the_new_text_is_sent() {
        let mut h = harness(false, vec![Ok("a1".into()), Ok("a2".into())]);
        h.session.initialize().await.unwrap();
        h.session.send_message("first question").await;
        h.session.send_message("second question").await;
        assert_eq!(
            *h.seen.lock().unwrap(),
            vec!["first question".to_string(), "second question".to_string()]
        );
        assert_eq!(h.session.messages().len(), 4);
    }

    #[tokio::test]
    async fn empty_reply_uses_fallback() {
        let mut h = harness(false, vec![Ok("  ".into())]);
        h.session.initialize().await.unwrap();
        match h.session.send_message("Is DeFi regulated?").await {
            SendOutcome::Replied(m) => assert_eq!(m.content, FALLBACK_REPLY),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn generation_failure_keeps_user_message_only() {
        let mut h = harness(
            false,
            vec![Err(ChatError::Generation("quota exceeded".into()))],
        );
        h.session.initialize().await.unwrap();
        let outcome = h.session.send_message("Is my token a security?").await;
        match outcome {
            SendOutcome::Failed(err) => assert_eq!(err.code(), "generation"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(h.session.messages().len(), 1);
        assert_eq!(h.session.messages()[0].role, Role::User);
        assert_eq!(h.session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn initialize_twice_does_not_reconnect() {
        let mut h = harness(false, vec![]);
        h.session.initialize().await.unwrap();
        // The canned backend hands out its replies only once; a second
        // connect would still succeed, so check the cache name is stable.
        h.session.initialize().await.unwrap();
        assert_eq!(h.session.cache_name(), Some("cachedContents/test"));
    }
}
