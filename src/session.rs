//! Per-tool session state: current input, suggestion history and the busy
//! flag that keeps a control from issuing overlapping requests.

use crate::tools::{Suggestion, ToolKind};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

const MAX_SESSION_COUNT: usize = 4096;

/// Previously returned primary strings, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    entries: Vec<String>,
}

impl History {
    pub fn push(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    EmptyInput,
    Busy,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::EmptyInput => write!(f, "input must not be empty"),
            SessionError::Busy => write!(f, "a request is already in flight"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Snapshot handed out by [`ToolSession::begin`] and returned to
/// [`ToolSession::finish`].
#[derive(Debug, Clone)]
pub struct Ticket {
    pub input: String,
    pub history: Vec<String>,
    epoch: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ToolSession {
    input: String,
    history: History,
    suggestion: Option<Suggestion>,
    busy: bool,
    epoch: u64,
}

impl ToolSession {
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn suggestion(&self) -> Option<&Suggestion> {
        self.suggestion.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Replaces the input. A changed value clears the suggestion and history
    /// and marks any in-flight request stale; the busy flag stays set until
    /// that request settles.
    pub fn set_input(&mut self, value: &str) {
        if self.input == value {
            return;
        }
        self.input = value.to_string();
        self.suggestion = None;
        self.history.clear();
        self.epoch = self.epoch.wrapping_add(1);
    }

    pub fn begin(&mut self) -> Result<Ticket, SessionError> {
        if self.input.trim().is_empty() {
            return Err(SessionError::EmptyInput);
        }
        if self.busy {
            return Err(SessionError::Busy);
        }
        self.busy = true;
        Ok(Ticket {
            input: self.input.clone(),
            history: self.history.entries().to_vec(),
            epoch: self.epoch,
        })
    }

    /// Settles a request. Results for a superseded input are discarded.
    pub fn finish<E>(
        &mut self,
        ticket: Ticket,
        outcome: Result<Suggestion, E>,
    ) -> Result<Suggestion, E> {
        let current = ticket.epoch == self.epoch;
        self.busy = false;
        match outcome {
            Ok(suggestion) => {
                if current {
                    self.history.push(suggestion.history_entry());
                    self.suggestion = Some(suggestion.clone());
                }
                Ok(suggestion)
            }
            Err(err) => {
                if current {
                    self.suggestion = None;
                }
                Err(err)
            }
        }
    }
}

struct StoredSession {
    session: ToolSession,
    last_seen: u64,
}

/// Server-side sessions keyed by session id and tool, bounded by evicting
/// the least recently touched entry.
pub struct SessionStore {
    sessions: RwLock<HashMap<(String, ToolKind), StoredSession>>,
    capacity: usize,
    clock: AtomicU64,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_capacity(MAX_SESSION_COUNT)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Runs `f` against the session, creating it on first use.
    pub fn with_session<R>(
        &self,
        session_id: &str,
        tool: ToolKind,
        f: impl FnOnce(&mut ToolSession) -> R,
    ) -> R {
        let mut guard = self.sessions.write();
        let key = (session_id.to_string(), tool);
        if guard.len() >= self.capacity && !guard.contains_key(&key) {
            if let Some(oldest) = oldest_key(&guard) {
                guard.remove(&oldest);
            }
        }
        let now = self.clock.fetch_add(1, Ordering::Relaxed);
        let entry = guard.entry(key).or_insert_with(|| StoredSession {
            session: ToolSession::default(),
            last_seen: now,
        });
        entry.last_seen = now;
        f(&mut entry.session)
    }

    pub fn snapshot(&self, session_id: &str, tool: ToolKind) -> Option<ToolSession> {
        self.sessions
            .read()
            .get(&(session_id.to_string(), tool))
            .map(|stored| stored.session.clone())
    }
}

fn oldest_key(sessions: &HashMap<(String, ToolKind), StoredSession>) -> Option<(String, ToolKind)> {
    sessions
        .iter()
        .min_by_key(|(_, stored)| stored.last_seen)
        .map(|(key, _)| key.clone())
}
