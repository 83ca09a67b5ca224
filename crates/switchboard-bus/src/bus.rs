//! Progress bus (C4): connection set, confirmation callbacks, broadcast/unicast.
//!
//! The connection set and the pending-confirmation table are the two
//! process-wide mutable structures the bus owns (spec §5: "Both are
//! protected by a single-writer discipline"). Both live in `DashMap`s, the
//! same toolset the registry (C1) uses for its own global table, per
//! spec.md §9's "encapsulate each in a dedicated owner object" guidance.

use crate::event::{BusEvent, ClientAction, ClientMessage, ErrorResponse};
use dashmap::DashMap;
use std::time::Duration;
use switchboard_shared::config::ConfirmationTimeoutPolicy;
use switchboard_shared::status::UserConfirmation;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use uuid::Uuid;

struct Connection {
    user_id: String,
    sender: mpsc::UnboundedSender<BusEvent>,
}

/// Opaque handle identifying one live WebSocket connection.
pub type ConnectionId = Uuid;

/// User-scoped pub/sub with blocking confirmation callbacks (C4).
#[derive(Debug)]
pub struct ProgressBus {
    connections: DashMap<ConnectionId, Connection>,
    pending: DashMap<String, oneshot::Sender<UserConfirmation>>,
    cancelled: DashMap<String, ()>,
    default_timeout: Duration,
    default_timeout_policy: ConfirmationTimeoutPolicy,
    max_connections: usize,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("user_id", &self.user_id).finish()
    }
}

impl ProgressBus {
    /// `max_connections` bounds the active-connection set (spec §6:
    /// "`max_connections` — bus connection cap").
    pub fn new(default_timeout: Duration, default_timeout_policy: ConfirmationTimeoutPolicy, max_connections: usize) -> Self {
        Self {
            connections: DashMap::new(),
            pending: DashMap::new(),
            cancelled: DashMap::new(),
            default_timeout,
            default_timeout_policy,
            max_connections,
        }
    }

    /// A bus with no connection cap — for callers (tests, in-process
    /// wiring) that don't need `max_connections` enforced.
    pub fn unbounded(default_timeout: Duration, default_timeout_policy: ConfirmationTimeoutPolicy) -> Self {
        Self::new(default_timeout, default_timeout_policy, usize::MAX)
    }

    /// Register a new connection for `user_id`; returns an id to
    /// deregister with and the receiving half the caller's socket-write
    /// loop drains. Returns `None` if the active-connection set is
    /// already at `max_connections` (spec §6) — the caller must refuse
    /// the connection rather than register it.
    pub fn register(&self, user_id: impl Into<String>) -> Option<(ConnectionId, mpsc::UnboundedReceiver<BusEvent>)> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            Connection {
                user_id: user_id.into(),
                sender: tx,
            },
        );
        Some((id, rx))
    }

    /// Remove a connection on disconnect or I/O error (spec §4.4: "On
    /// disconnect or I/O error, remove promptly").
    pub fn deregister(&self, connection_id: ConnectionId) {
        self.connections.remove(&connection_id);
    }

    /// Change the `user_id` a connection is registered under — used by a
    /// client `subscribe` action.
    pub fn subscribe(&self, connection_id: ConnectionId, user_id: impl Into<String>) {
        if let Some(mut entry) = self.connections.get_mut(&connection_id) {
            entry.user_id = user_id.into();
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Send to every active connection, ignoring per-connection send
    /// failures; a dropped receiver means the connection is gone and is
    /// evicted (spec §4.4: "ignoring per-connection send failures (the
    /// failed connection is evicted)").
    pub fn broadcast(&self, event: BusEvent) {
        let stale: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter_map(|entry| {
                if entry.sender.send(event.clone()).is_err() {
                    Some(*entry.key())
                } else {
                    None
                }
            })
            .collect();
        for id in stale {
            self.connections.remove(&id);
        }
    }

    /// Send directly to one connection, bypassing user_id routing —
    /// used for error replies and heartbeats scoped to a single socket.
    /// Returns `false` if the connection is gone.
    pub fn send_to_connection(&self, connection_id: ConnectionId, event: BusEvent) -> bool {
        match self.connections.get(&connection_id) {
            Some(conn) => conn.sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Send only to connections registered for `user_id`.
    pub fn send_to_user(&self, user_id: &str, event: BusEvent) {
        let stale: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .filter_map(|entry| {
                if entry.sender.send(event.clone()).is_err() {
                    Some(*entry.key())
                } else {
                    None
                }
            })
            .collect();
        for id in stale {
            self.connections.remove(&id);
        }
    }

    /// Block the caller until the user confirms or a timeout elapses
    /// (P3: returns within `timeout + ε`; on timeout synthesises a default
    /// governed by `policy`, documented as Open Question 2).
    ///
    /// Routes strictly by `user_id` (Open Question 1, option (a) — the
    /// recommended resolution, not the source's ambiguous broadcast).
    pub async fn notify_user(
        &self,
        user_id: &str,
        task_id: &str,
        step: i64,
        task_name: &str,
        message: impl Into<String>,
        timeout: Option<Duration>,
        policy: Option<ConfirmationTimeoutPolicy>,
    ) -> UserConfirmation {
        let callback_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(callback_id.clone(), tx);

        let event = BusEvent::confirmation_request(
            user_id,
            task_id,
            step,
            switchboard_shared::status::TaskStatus::Running,
            task_name,
            message,
            callback_id.clone(),
        );
        self.send_to_user(user_id, event);

        let timeout = timeout.unwrap_or(self.default_timeout);
        let policy = policy.unwrap_or(self.default_timeout_policy);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(confirmation)) => confirmation,
            Ok(Err(_)) | Err(_) => {
                self.pending.remove(&callback_id);
                warn!(callback_id, user_id, task_id, "confirmation timed out or channel closed");
                match policy {
                    ConfirmationTimeoutPolicy::Proceed => UserConfirmation::proceed(None),
                    ConfirmationTimeoutPolicy::Abort => UserConfirmation::deny(None),
                }
            }
        }
    }

    /// Resolve a pending confirmation. Returns `false` if `callback_id` is
    /// unknown (already resolved, timed out, or never registered).
    pub fn resolve_confirmation(&self, callback_id: &str, confirmation: UserConfirmation) -> bool {
        match self.pending.remove(callback_id) {
            Some((_, tx)) => tx.send(confirmation).is_ok(),
            None => false,
        }
    }

    /// Mark `task_id` cancelled and rebroadcast a cancellation notice
    /// (spec §4.4: "A client cancel action rebroadcasts a cancellation
    /// notice; the worker/executor observes it and aborts the task").
    pub fn cancel_task(&self, task_id: &str) {
        self.cancelled.insert(task_id.to_string(), ());
        self.broadcast(BusEvent::system_notification(
            "",
            task_id,
            format!("task {task_id} cancellation requested"),
        ));
    }

    /// Polled by the worker/executor at suspension points (spec §5: "The
    /// worker polls cancel state at suspension points and between steps").
    pub fn is_cancelled(&self, task_id: &str) -> bool {
        self.cancelled.contains_key(task_id)
    }

    /// Drop cancellation bookkeeping once a task reaches a terminal state.
    pub fn clear_cancelled(&self, task_id: &str) {
        self.cancelled.remove(task_id);
    }

    /// Dispatch one client→server message. `connection_id` identifies the
    /// socket it arrived on (needed for `subscribe`/`ping`).
    pub fn handle_client_message(
        &self,
        connection_id: ConnectionId,
        msg: ClientMessage,
    ) -> Result<(), ErrorResponse> {
        match msg.action {
            ClientAction::Confirm => {
                let callback_id = msg.callback_id.ok_or_else(|| ErrorResponse {
                    error: "confirm requires callback_id".to_string(),
                })?;
                let proceed = msg.proceed.unwrap_or(false);
                let confirmation = UserConfirmation {
                    proceed,
                    feedback: msg.feedback,
                };
                self.resolve_confirmation(&callback_id, confirmation);
                Ok(())
            }
            ClientAction::Cancel => {
                let task_id = msg.task_id.ok_or_else(|| ErrorResponse {
                    error: "cancel requires task_id".to_string(),
                })?;
                self.cancel_task(&task_id);
                Ok(())
            }
            ClientAction::Ping => {
                if let Some(conn) = self.connections.get(&connection_id) {
                    let _ = conn.sender.send(BusEvent::heartbeat());
                }
                Ok(())
            }
            ClientAction::Subscribe => {
                let user_id = msg.user_id.ok_or_else(|| ErrorResponse {
                    error: "subscribe requires user_id".to_string(),
                })?;
                self.subscribe(connection_id, user_id);
                Ok(())
            }
        }
    }
}
