use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Field, Ms};

#[allow(dead_code)]
const CHANNEL_CAPACITY: usize = 256;

/// Transient happenings the presentation layer may surface (toasts, status
/// line). Distinct from the watch-published `EditorState`, which is the
/// durable observable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    SaveCompleted { fields: Vec<Field>, at: Ms },
    SaveFailed { fields: Vec<Field>, message: String },
    ConflictsUpdated { has_conflict: bool },
    /// First clear conflict check of the session.
    AvailabilityConfirmed,
    SessionClosed,
}

/// Broadcast hub for session events, one channel per session id.
pub struct SessionHub {
    channels: DashMap<Ulid, broadcast::Sender<SessionEvent>>,
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a session's events. Creates the channel if needed.
    pub fn subscribe(&self, session_id: Ulid) -> broadcast::Receiver<SessionEvent> {
        let sender = self
            .channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, session_id: Ulid, event: SessionEvent) {
        if let Some(sender) = self.channels.get(&session_id) {
            let _ = sender.send(event);
        }
    }

    /// Remove a session's channel once the session is gone.
    pub fn remove(&self, session_id: &Ulid) {
        self.channels.remove(session_id);
    }
}

// ── Editor commands ──────────────────────────────────────────────

/// Input-level commands (e.g. the window submit shortcut). The active
/// session subscribes on open and drops the subscription on close, so no
/// global listener outlives a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorCommand {
    /// Flush every pending edit now.
    Submit,
}

/// Broadcast source for editor commands.
pub struct CommandHub {
    sender: broadcast::Sender<EditorCommand>,
}

impl Default for CommandHub {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EditorCommand> {
        self.sender.subscribe()
    }

    pub fn send(&self, command: EditorCommand) {
        let _ = self.sender.send(command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = SessionHub::new();
        let sid = Ulid::new();
        let mut rx = hub.subscribe(sid);

        let event = SessionEvent::SaveCompleted {
            fields: vec![Field::Notes],
            at: 1_000,
        };
        hub.send(sid, event.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = SessionHub::new();
        hub.send(Ulid::new(), SessionEvent::SessionClosed);
    }

    #[tokio::test]
    async fn events_do_not_cross_sessions() {
        let hub = SessionHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = hub.subscribe(a);
        let _rx_b = hub.subscribe(b);

        hub.send(b, SessionEvent::SessionClosed);
        assert!(matches!(
            rx_a.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn command_hub_broadcasts_submit() {
        let hub = CommandHub::new();
        let mut rx = hub.subscribe();
        hub.send(EditorCommand::Submit);
        assert_eq!(rx.recv().await.unwrap(), EditorCommand::Submit);
    }
}
