//! Per-user conversation sessions.
//!
//! A session is a bounded FIFO of clean `(user, assistant)` pairs.  Tool
//! calls and tool results are **not** stored: persisting them would leak
//! sensitive outputs into future prompts and bloat the context.  They exist
//! only within one ReAct turn.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use crate::UserId;

/// One completed exchange.
pub type Pair = (String, String);

pub struct SessionStore {
    max_pairs: usize,
    sessions: Mutex<HashMap<UserId, VecDeque<Pair>>>,
}

impl SessionStore {
    pub fn new(max_pairs: usize) -> Self {
        Self {
            max_pairs,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Append a completed pair, trimming the oldest past the cap.
    ///
    /// Writes happen only inside the owning user's serialized task, so two
    /// appends for one user never race.
    pub fn append(&self, user_id: UserId, user_turn: &str, assistant_text: &str) {
        let Ok(mut sessions) = self.sessions.lock() else {
            return;
        };
        let session = sessions.entry(user_id).or_default();
        session.push_back((user_turn.to_string(), assistant_text.to_string()));
        while session.len() > self.max_pairs {
            session.pop_front();
        }
    }

    /// Snapshot of the user's pairs, oldest first.
    pub fn pairs(&self, user_id: UserId) -> Vec<Pair> {
        self.sessions
            .lock()
            .map(|s| s.get(&user_id).map(|d| d.iter().cloned().collect()).unwrap_or_default())
            .unwrap_or_default()
    }

    /// Drop the user's history (`/reset`).
    pub fn clear(&self, user_id: UserId) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&user_id);
        }
    }

    /// Number of stored pairs for the user.
    pub fn depth(&self, user_id: UserId) -> usize {
        self.sessions
            .lock()
            .map(|s| s.get(&user_id).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_snapshot() {
        let store = SessionStore::new(10);
        store.append(42, "hi", "hello!");
        store.append(42, "how are you", "fine");
        let pairs = store.pairs(42);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], ("hi".to_string(), "hello!".to_string()));
    }

    #[test]
    fn sessions_are_per_user() {
        let store = SessionStore::new(10);
        store.append(1, "a", "b");
        assert!(store.pairs(2).is_empty());
    }

    #[test]
    fn oldest_pairs_are_trimmed() {
        let store = SessionStore::new(3);
        for i in 0..5 {
            store.append(42, &format!("q{i}"), &format!("a{i}"));
        }
        let pairs = store.pairs(42);
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].0, "q2", "oldest two should be gone");
        assert_eq!(pairs[2].0, "q4");
    }

    #[test]
    fn clear_empties_one_user_only() {
        let store = SessionStore::new(10);
        store.append(1, "a", "b");
        store.append(2, "c", "d");
        store.clear(1);
        assert_eq!(store.depth(1), 0);
        assert_eq!(store.depth(2), 1);
    }
}
