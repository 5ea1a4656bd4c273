// src/realtime/mod.rs

//! Room-based fan-out of proctoring events to connected observers.
//!
//! Nothing here is persisted: publishing to a room nobody has joined is a
//! no-op, and an observer only sees events published after it joined.

pub mod ws;

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::models::{
    session::{ExamSession, ResultStatus, SessionStatus},
    violation::ViolationSummary,
};

const ROOM_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    /// The student taking the session.
    Session(Uuid),
    /// Staff watching every session of one exam.
    Monitor(Uuid),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Session(id) => write!(f, "session:{}", id),
            Room::Monitor(id) => write!(f, "monitor:{}", id),
        }
    }
}

/// Live session row sent to a monitor when it joins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub session_id: Uuid,
    pub student_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub warning_count: u32,
    pub answered: usize,
    pub total_questions: u32,
}

impl From<&ExamSession> for ActiveSession {
    fn from(s: &ExamSession) -> Self {
        Self {
            session_id: s.id,
            student_id: s.student_id,
            start_time: s.start_time,
            warning_count: s.warning_count,
            answered: s.answers.len(),
            total_questions: s.total_questions,
        }
    }
}

/// Events pushed to observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    SessionJoined {
        session_id: Uuid,
    },
    MonitorJoined {
        exam_id: Uuid,
    },
    ActiveSessions {
        exam_id: Uuid,
        sessions: Vec<ActiveSession>,
    },
    StudentJoined {
        session_id: Uuid,
        student_id: Uuid,
        student_name: String,
        timestamp: DateTime<Utc>,
    },
    ViolationAlert {
        session_id: Uuid,
        student_id: Uuid,
        violation: ViolationSummary,
        warning_count: u32,
        threshold: u32,
        auto_submitted: bool,
    },
    ExamSubmission {
        session_id: Uuid,
        student_id: Uuid,
        status: SessionStatus,
        score: f64,
        percentage: f64,
        result: ResultStatus,
    },
    ForceSubmit {
        session_id: Uuid,
        reason: String,
    },
    Announcement {
        exam_id: Uuid,
        message: String,
        from: String,
        timestamp: DateTime<Utc>,
    },
    StudentActivityUpdate {
        session_id: Uuid,
        student_id: Uuid,
        activity: String,
        timestamp: DateTime<Utc>,
    },
    HeartbeatAck {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn submission(session: &ExamSession) -> Self {
        ServerEvent::ExamSubmission {
            session_id: session.id,
            student_id: session.student_id,
            status: session.status,
            score: session.score,
            percentage: crate::proctoring::grading::round_percentage(session.percentage),
            result: session.result,
        }
    }
}

/// Messages a connected client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    JoinSession {
        session_id: Uuid,
    },
    JoinMonitor {
        exam_id: Uuid,
    },
    ForceSubmit {
        session_id: Uuid,
        #[serde(default)]
        reason: Option<String>,
    },
    BroadcastAnnouncement {
        exam_id: Uuid,
        message: String,
    },
    StudentActivity {
        activity: String,
    },
    Heartbeat,
}

/// Registry of rooms, each backed by a broadcast channel.
#[derive(Default)]
pub struct Notifier {
    rooms: Mutex<HashMap<Room, broadcast::Sender<ServerEvent>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, room: Room) -> broadcast::Receiver<ServerEvent> {
        let mut rooms = self.rooms.lock().await;
        rooms
            .entry(room)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Returns how many observers received the event.
    pub async fn publish(&self, room: Room, event: ServerEvent) -> usize {
        let mut rooms = self.rooms.lock().await;
        let Some(sender) = rooms.get(&room) else {
            return 0;
        };
        match sender.send(event) {
            Ok(delivered) => delivered,
            Err(_) => {
                // Every observer left; drop the room.
                rooms.remove(&room);
                0
            }
        }
    }

    pub async fn observers(&self, room: Room) -> usize {
        self.rooms
            .lock()
            .await
            .get(&room)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}
