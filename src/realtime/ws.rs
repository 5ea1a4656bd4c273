// src/realtime/ws.rs

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    task::JoinHandle,
};
use uuid::Uuid;

use super::{ActiveSession, ClientMessage, Notifier, Room, ServerEvent};
use crate::{
    error::AppError,
    models::session::SessionStatus,
    state::AppState,
    store::Store,
    utils::jwt::{Claims, Role, verify_jwt},
};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Upgrades to a WebSocket. The token is validated once, here.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Result<impl IntoResponse, AppError> {
    let token = params
        .token
        .ok_or_else(|| AppError::AuthError("Missing token".to_string()))?;
    let claims = verify_jwt(&token, &state.config.jwt_secret)?;
    let user_id = claims.user_id()?;

    Ok(ws.on_upgrade(move |socket| async move {
        let mut conn = Connection::new(claims, user_id, state.store, state.notifier);
        conn.run(socket).await;
    }))
}

struct Connection {
    claims: Claims,
    user_id: Uuid,
    store: Arc<dyn Store>,
    notifier: Arc<Notifier>,
    /// One forwarding task per joined room.
    forwards: HashMap<Room, JoinHandle<()>>,
    /// (session, exam) the student joined, for activity updates.
    joined_session: Option<(Uuid, Uuid)>,
}

impl Connection {
    fn new(claims: Claims, user_id: Uuid, store: Arc<dyn Store>, notifier: Arc<Notifier>) -> Self {
        Self {
            claims,
            user_id,
            store,
            notifier,
            forwards: HashMap::new(),
            joined_session: None,
        }
    }

    async fn run(&mut self, mut socket: WebSocket) {
        let (tx, mut rx) = mpsc::channel::<ServerEvent>(64);
        tracing::debug!(user = %self.user_id, role = %self.claims.role, "realtime client connected");

        loop {
            tokio::select! {
                incoming = socket.recv() => {
                    let text = match incoming {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            tracing::debug!("websocket receive error: {}", e);
                            break;
                        }
                    };

                    let replies = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(msg) => self.handle(msg, &tx).await,
                        Err(e) => vec![ServerEvent::error(format!("Malformed message: {}", e))],
                    };
                    let mut closed = false;
                    for event in &replies {
                        if send(&mut socket, event).await.is_err() {
                            closed = true;
                            break;
                        }
                    }
                    if closed {
                        break;
                    }
                }
                Some(event) = rx.recv() => {
                    if send(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
            }
        }

        for (_, forward) in self.forwards.drain() {
            forward.abort();
        }
        tracing::debug!(user = %self.user_id, "realtime client disconnected");
    }

    /// Handles one client message; the returned events go straight back to
    /// this client, in order.
    async fn handle(&mut self, msg: ClientMessage, tx: &mpsc::Sender<ServerEvent>) -> Vec<ServerEvent> {
        match msg {
            ClientMessage::JoinSession { session_id } => vec![self.join_session(session_id, tx).await],
            ClientMessage::JoinMonitor { exam_id } => self.join_monitor(exam_id, tx).await,
            ClientMessage::ForceSubmit { session_id, reason } => {
                self.force_submit(session_id, reason).await.into_iter().collect()
            }
            ClientMessage::BroadcastAnnouncement { exam_id, message } => {
                self.announce(exam_id, message).await.into_iter().collect()
            }
            ClientMessage::StudentActivity { activity } => {
                let Some((session_id, exam_id)) = self.joined_session else {
                    return vec![ServerEvent::error("Join a session first")];
                };
                let event = ServerEvent::StudentActivityUpdate {
                    session_id,
                    student_id: self.user_id,
                    activity,
                    timestamp: Utc::now(),
                };
                self.notifier.publish(Room::Monitor(exam_id), event).await;
                Vec::new()
            }
            ClientMessage::Heartbeat => vec![ServerEvent::HeartbeatAck { timestamp: Utc::now() }],
        }
    }

    async fn join_session(&mut self, session_id: Uuid, tx: &mpsc::Sender<ServerEvent>) -> ServerEvent {
        let session = match self.store.get_session(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return ServerEvent::error("Session not found"),
            Err(e) => {
                tracing::error!("Failed to load session for join: {}", e);
                return ServerEvent::error("Failed to join session");
            }
        };
        if session.student_id != self.user_id {
            return ServerEvent::error("Not authorized to join this session");
        }

        self.follow(Room::Session(session_id), tx).await;
        self.joined_session = Some((session_id, session.exam_id));

        let joined = ServerEvent::StudentJoined {
            session_id,
            student_id: self.user_id,
            student_name: self.claims.name.clone(),
            timestamp: Utc::now(),
        };
        self.notifier.publish(Room::Monitor(session.exam_id), joined).await;

        ServerEvent::SessionJoined { session_id }
    }

    async fn join_monitor(&mut self, exam_id: Uuid, tx: &mpsc::Sender<ServerEvent>) -> Vec<ServerEvent> {
        if !self.claims.is_staff() {
            return vec![ServerEvent::error("Only faculty can monitor exams")];
        }

        let sessions = match self.store.list_sessions_for_exam(exam_id).await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::error!("Failed to list sessions for monitor: {}", e);
                return vec![ServerEvent::error("Failed to join monitor")];
            }
        };

        self.follow(Room::Monitor(exam_id), tx).await;

        let active: Vec<ActiveSession> = sessions
            .iter()
            .filter(|s| s.status == SessionStatus::InProgress)
            .map(ActiveSession::from)
            .collect();

        vec![
            ServerEvent::MonitorJoined { exam_id },
            ServerEvent::ActiveSessions {
                exam_id,
                sessions: active,
            },
        ]
    }

    async fn force_submit(&self, session_id: Uuid, reason: Option<String>) -> Option<ServerEvent> {
        if !self.claims.is_staff() {
            return Some(ServerEvent::error("Only faculty can force submission"));
        }
        if let Err(message) = self.check_session_authority(session_id).await {
            return Some(ServerEvent::error(message));
        }

        let event = ServerEvent::ForceSubmit {
            session_id,
            reason: reason.unwrap_or_else(|| "Submitted by invigilator".to_string()),
        };
        self.notifier.publish(Room::Session(session_id), event).await;
        None
    }

    async fn announce(&self, exam_id: Uuid, message: String) -> Option<ServerEvent> {
        if !self.claims.is_staff() {
            return Some(ServerEvent::error("Only faculty can broadcast announcements"));
        }

        let event = ServerEvent::Announcement {
            exam_id,
            message: crate::utils::html::clean_html(&message),
            from: self.claims.name.clone(),
            timestamp: Utc::now(),
        };
        self.notifier.publish(Room::Monitor(exam_id), event).await;
        None
    }

    /// Admins may act on any session; faculty only on their own exams.
    async fn check_session_authority(&self, session_id: Uuid) -> Result<(), &'static str> {
        if self.claims.role() == Some(Role::Admin) {
            return Ok(());
        }
        let session = match self.store.get_session(session_id).await {
            Ok(Some(session)) => session,
            _ => return Err("Session not found"),
        };
        match self.store.get_exam(session.exam_id).await {
            Ok(Some(exam)) if exam.created_by == self.user_id => Ok(()),
            Ok(Some(_)) => Err("Not authorized for this session"),
            _ => Err("Exam not found"),
        }
    }

    /// Subscribes to `room` and forwards its events into this connection.
    /// Joining a room this connection already follows is a no-op.
    async fn follow(&mut self, room: Room, tx: &mpsc::Sender<ServerEvent>) {
        if self.forwards.get(&room).is_some_and(|f| !f.is_finished()) {
            return;
        }
        let mut sub = self.notifier.subscribe(room).await;
        let tx = tx.clone();
        let forward = tokio::spawn(async move {
            loop {
                match sub.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(%room, skipped, "realtime observer lagging");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.forwards.insert(room, forward);
    }
}

async fn send(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to serialize realtime event: {}", e);
            return Ok(());
        }
    };
    socket.send(Message::Text(text.into())).await
}
