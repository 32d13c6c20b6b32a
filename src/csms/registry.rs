//! The session registry: a `DashMap` so the accept task and the watchdog
//! task can touch disjoint entries without an explicit global lock (§4.3
//! "[AMBIENT] Session registry").

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::domain::auth::AuthorizedTags;
use crate::domain::session::CpSession;

pub struct SessionRegistry {
    pub sessions: DashMap<String, CpSession>,
    pub authorized_tags: AuthorizedTags,
}

impl SessionRegistry {
    pub fn new(authorized_tags: AuthorizedTags) -> Self {
        Self {
            sessions: DashMap::new(),
            authorized_tags,
        }
    }

    pub fn register(&self, cp_id: String, outbound: mpsc::UnboundedSender<String>) {
        self.sessions.insert(cp_id.clone(), CpSession::new(cp_id, outbound));
    }

    pub fn unregister(&self, cp_id: &str) -> Option<CpSession> {
        self.sessions.remove(cp_id).map(|(_, session)| session)
    }

    /// Pushes an already-serialized frame onto a session's write half.
    /// Returns `false` if the session is gone (closed/evicted mid-dispatch).
    pub fn send_to(&self, cp_id: &str, text: String) -> bool {
        match self.sessions.get(cp_id) {
            Some(session) => session.outbound.send(text).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(AuthorizedTags::default_fixture())
    }
}
