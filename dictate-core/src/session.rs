//! Exactly-once delivery tracking for recording sessions.
//!
//! Mirrors the state machine a session moves through: `pending` until a
//! terminal event has been emitted, then `completed`, `error`, or
//! `cancelled`. Enforces invariants I1 (at most one terminal event per
//! session) and I2 (a cancelled session emits nothing).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Completed,
    Error,
    Cancelled,
}

#[derive(Debug, Clone)]
struct SessionRecord {
    created_at: Instant,
    state: SessionState,
    terminal_emitted: bool,
}

pub struct SessionTracker {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    ttl: Duration,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl SessionTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Registers a fresh pending session, evicting any sessions older than
    /// the TTL in the same pass (lazy eviction, matching the reference
    /// implementation).
    pub fn register(&self, session_id: &str) {
        let mut guard = self.sessions.lock();
        self.evict_stale(&mut guard);
        guard.insert(
            session_id.to_string(),
            SessionRecord {
                created_at: Instant::now(),
                state: SessionState::Pending,
                terminal_emitted: false,
            },
        );
    }

    /// Transitions a pending session to cancelled. Returns `true` if the
    /// transition applied (session was pending), `false` otherwise (unknown
    /// session, or already terminal).
    pub fn mark_cancelled(&self, session_id: &str) -> bool {
        let mut guard = self.sessions.lock();
        match guard.get_mut(session_id) {
            Some(record) if record.state == SessionState::Pending => {
                record.state = SessionState::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// True iff the session is still pending and has not yet emitted a
    /// terminal event. Unknown sessions are treated as not-emittable.
    pub fn should_emit(&self, session_id: &str) -> bool {
        let guard = self.sessions.lock();
        matches!(
            guard.get(session_id),
            Some(record) if record.state == SessionState::Pending && !record.terminal_emitted
        )
    }

    pub fn mark_completed(&self, session_id: &str) -> bool {
        self.mark_terminal(session_id, SessionState::Completed)
    }

    pub fn mark_error(&self, session_id: &str) -> bool {
        self.mark_terminal(session_id, SessionState::Error)
    }

    fn mark_terminal(&self, session_id: &str, state: SessionState) -> bool {
        let mut guard = self.sessions.lock();
        match guard.get_mut(session_id) {
            Some(record) if record.state == SessionState::Pending && !record.terminal_emitted => {
                record.state = state;
                record.terminal_emitted = true;
                true
            }
            _ => false,
        }
    }

    pub fn get_state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.lock().get(session_id).map(|r| r.state)
    }

    pub fn has_pending(&self) -> bool {
        self.sessions
            .lock()
            .values()
            .any(|r| r.state == SessionState::Pending)
    }

    fn evict_stale(&self, guard: &mut HashMap<String, SessionRecord>) {
        let ttl = self.ttl;
        guard.retain(|_, record| record.created_at.elapsed() < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_should_emit() {
        let tracker = SessionTracker::default();
        tracker.register("s1");
        assert!(tracker.should_emit("s1"));
    }

    #[test]
    fn mark_completed_is_exactly_once() {
        let tracker = SessionTracker::default();
        tracker.register("s1");
        assert!(tracker.mark_completed("s1"));
        assert!(!tracker.should_emit("s1"));
        // A second completion/error attempt must not re-fire.
        assert!(!tracker.mark_completed("s1"));
        assert!(!tracker.mark_error("s1"));
    }

    #[test]
    fn cancelled_session_never_emits() {
        let tracker = SessionTracker::default();
        tracker.register("s2");
        assert!(tracker.mark_cancelled("s2"));
        assert!(!tracker.should_emit("s2"));
        assert!(!tracker.mark_completed("s2"));
        assert!(!tracker.mark_error("s2"));
    }

    #[test]
    fn cancel_on_unknown_session_is_noop() {
        let tracker = SessionTracker::default();
        assert!(!tracker.mark_cancelled("ghost"));
    }

    #[test]
    fn unknown_session_does_not_emit() {
        let tracker = SessionTracker::default();
        assert!(!tracker.should_emit("ghost"));
    }

    #[test]
    fn stale_sessions_are_evicted_on_register() {
        let tracker = SessionTracker::new(Duration::from_millis(1));
        tracker.register("old");
        std::thread::sleep(Duration::from_millis(5));
        tracker.register("new");
        assert_eq!(tracker.get_state("old"), None);
        assert_eq!(tracker.get_state("new"), Some(SessionState::Pending));
    }
}
