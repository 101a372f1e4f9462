//! Session grouping and the in-process channel service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use spindle_context::{ChannelPort, ChannelService, KernelContext};

use crate::channel::Channel;

/// Conversation-id values treated as "not set".
const CONVERSATION_SENTINEL: &str = "na";

struct SessionState {
    channels: HashMap<String, Arc<Channel>>,
    last_activity: DateTime<Utc>,
}

/// Groups channels under one session key.
///
/// Channels are created lazily and reused thereafter; every access
/// touches `last_activity` so idle sessions can be reaped.
pub struct ChannelSession {
    id: String,
    inner: Mutex<SessionState>,
}

impl ChannelSession {
    /// Create an empty session.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: Mutex::new(SessionState {
                channels: HashMap::new(),
                last_activity: Utc::now(),
            }),
        }
    }

    /// The session key.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Deterministic session key for a request:
    /// `{userId|"anonymous"}-{conversationId ?? traceId}`, where the
    /// `"na"` sentinel counts as unset. All other conversation ids are
    /// opaque.
    #[must_use]
    pub fn generate_id(ctx: &KernelContext) -> String {
        let user = ctx
            .user
            .as_ref()
            .map(|principal| principal.id.as_str())
            .unwrap_or("anonymous");
        let conversation = ctx
            .metadata
            .get("conversationId")
            .and_then(Value::as_str)
            .filter(|id| *id != CONVERSATION_SENTINEL);
        match conversation {
            Some(conversation) => format!("{user}-{conversation}"),
            None => format!("{user}-{}", ctx.trace_id),
        }
    }

    /// Resolve (lazily creating) the named channel and touch
    /// `last_activity`.
    pub fn channel(&self, name: &str) -> Arc<Channel> {
        let mut state = self.inner.lock().expect("session state poisoned");
        state.last_activity = Utc::now();
        state
            .channels
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Channel::new(name)))
            .clone()
    }

    /// When the session was last touched.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.inner
            .lock()
            .expect("session state poisoned")
            .last_activity
    }

    /// Names of the channels created so far.
    pub fn channel_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("session state poisoned")
            .channels
            .keys()
            .cloned()
            .collect()
    }

    /// Destroy every channel in the session.
    pub fn destroy(&self) {
        let mut state = self.inner.lock().expect("session state poisoned");
        for channel in state.channels.values() {
            channel.destroy();
        }
        state.channels.clear();
    }
}

impl std::fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSession")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// In-process [`ChannelService`] keyed by
/// [`ChannelSession::generate_id`].
///
/// The transport layer performs its own session scoping before calling
/// into the kernel; this implementation is what engines and tests use
/// when everything runs in one process.
#[derive(Default)]
pub struct SessionChannelService {
    sessions: Mutex<HashMap<String, Arc<ChannelSession>>>,
}

impl SessionChannelService {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve (lazily creating) the session for a request context.
    pub fn session_for(&self, ctx: &KernelContext) -> Arc<ChannelSession> {
        let key = ChannelSession::generate_id(ctx);
        self.sessions
            .lock()
            .expect("service state poisoned")
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ChannelSession::new(key)))
            .clone()
    }

    /// Destroy and remove one session. Returns whether it existed.
    pub fn destroy_session(&self, key: &str) -> bool {
        let session = self
            .sessions
            .lock()
            .expect("service state poisoned")
            .remove(key);
        match session {
            Some(session) => {
                session.destroy();
                true
            }
            None => false,
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().expect("service state poisoned").len()
    }
}

impl std::fmt::Debug for SessionChannelService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionChannelService")
            .field("sessions", &self.session_count())
            .finish()
    }
}

#[async_trait]
impl ChannelService for SessionChannelService {
    fn channel(&self, ctx: &KernelContext, name: &str) -> Arc<dyn ChannelPort> {
        self.session_for(ctx).channel(name)
    }
}
