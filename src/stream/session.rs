// src/stream/session.rs
// Session manager (§4.G.3, §3 "Message-level state machine" neighbor).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::stream::events::SseEvent;

pub struct SessionManager {
    session_id: String,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    active: bool,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            start_time: None,
            end_time: None,
            active: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn handle_session_start(&mut self) -> SseEvent {
        let now = Utc::now();
        self.start_time = Some(now);
        self.active = true;
        SseEvent::SessionStart {
            session_id: self.session_id.clone(),
            start_time: now.to_rfc3339(),
        }
    }

    pub fn handle_session_end(&mut self) -> SseEvent {
        let now = Utc::now();
        self.end_time = Some(now);
        self.active = false;
        let duration_ms = match self.start_time {
            Some(start) => (now - start).num_milliseconds(),
            None => 0,
        };
        SseEvent::SessionEnd {
            session_id: self.session_id.clone(),
            duration_ms,
        }
    }
}
