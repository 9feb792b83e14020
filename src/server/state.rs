//! Application state shared across all request handlers.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::config::AssistantConfig;
use crate::conversation::ConversationStore;
use crate::llm::{ChatCompletion, OpenAiChatClient};

/// One browser session and its conversation history.
#[derive(Debug)]
pub struct Session {
    /// When the session was opened.
    pub created_at: DateTime<Utc>,
    /// Last time a request touched the session.
    pub last_used: DateTime<Utc>,
    /// Conversations belonging to this session only.
    pub store: ConversationStore,
}

impl Session {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            last_used: now,
            store: ConversationStore::new(),
        }
    }

    fn is_idle(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_used > ttl
    }
}

/// Shared application state.
pub struct AppState {
    /// Provider and server settings.
    pub config: AssistantConfig,
    /// Inference collaborator used to answer questions.
    pub llm: Arc<dyn ChatCompletion>,
    sessions: DashMap<Uuid, Session>,
}

impl AppState {
    /// Create a new application state backed by the OpenAI-compatible client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: AssistantConfig) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let llm = OpenAiChatClient::new(&config)
            .map_err(|e| format!("Failed to create chat client: {e}"))?;

        Ok(Self::with_llm(config, Arc::new(llm)))
    }

    /// Create a state around an existing inference collaborator.
    #[must_use]
    pub fn with_llm(config: AssistantConfig, llm: Arc<dyn ChatCompletion>) -> Arc<Self> {
        Arc::new(Self {
            config,
            llm,
            sessions: DashMap::new(),
        })
    }

    /// Open a new session with an empty conversation store.
    ///
    /// Idle sessions are evicted first.
    pub fn create_session(&self) -> Uuid {
        let now = Utc::now();
        self.evict_idle(now);

        let id = Uuid::new_v4();
        self.sessions.insert(id, Session::new(now));
        id
    }

    /// Drop sessions not used within the configured TTL, as of `now`.
    ///
    /// Returns the number of sessions removed.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.session_ttl();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_idle(now, ttl));

        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            tracing::info!("Evicted {removed} idle session(s)");
        }
        removed
    }

    /// Close a session. Returns `false` if it did not exist.
    pub fn remove_session(&self, id: Uuid) -> bool {
        self.sessions.remove(&id).is_some()
    }

    /// Run `f` against a session, or return `None` if it does not exist.
    ///
    /// The session is locked for the duration of `f`; do not await inside it.
    pub fn with_session<R>(&self, id: Uuid, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.get_mut(&id).map(|mut entry| {
            let session = entry.value_mut();
            session.last_used = Utc::now();
            f(session)
        })
    }

    /// Number of open sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn session_ttl(&self) -> Duration {
        i64::try_from(self.config.session_ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}
