//! `ConnectionActor` - per-WebSocket outbound actor.
//!
//! Each `ConnectionActor`:
//! - Owns the outbound side of exactly one WebSocket
//! - Receives `ServerEvent`s from room actors and the relay
//! - Forwards them, in order, to the socket writer task
//!
//! # Lifecycle
//!
//! 1. Spawned when the WebSocket upgrade completes
//! 2. Runs until cancelled or the writer goes away
//! 3. Cancellation via child token propagates from the membership supervisor

use crate::errors::CcError;
use crate::signaling::events::ServerEvent;

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::UserId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: Uuid,
    user_id: UserId,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Send an event to the client, waiting for mailbox capacity.
    pub async fn send(&self, event: ServerEvent) -> Result<(), CcError> {
        self.sender
            .send(ConnectionMessage::Send { event })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))
    }

    /// Send an event without waiting.
    ///
    /// Used by room fan-out so one slow client never stalls its room.
    pub fn try_send(&self, event: ServerEvent) -> Result<(), CcError> {
        self.sender
            .try_send(ConnectionMessage::Send { event })
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))
    }

    /// Stop the actor. The transport reading this connection's socket
    /// watches the same token and closes the WebSocket.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    connection_id: Uuid,
    user_id: UserId,
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Events for the socket writer task.
    outbound: mpsc::Sender<ServerEvent>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connection_id: Uuid,
        user_id: UserId,
        outbound: mpsc::Sender<ServerEvent>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        metrics.connection_created();

        let actor = Self {
            connection_id,
            user_id,
            receiver,
            outbound,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, connection_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
            user_id,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "cc.actor.connection",
        fields(connection_id = %self.connection_id, user_id = %self.user_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "cc.actor.connection",
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "cc.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue(self.receiver.len());
                            let should_exit = self.handle_message(message).await;
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "cc.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.connection_closed();

        info!(
            target: "cc.actor.connection",
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Send { event } => self.handle_send(event).await,
        }
    }

    /// Forward an event to the socket writer.
    ///
    /// Returns true if the writer is gone or the actor was cancelled while
    /// waiting on a stalled writer.
    async fn handle_send(&mut self, event: ServerEvent) -> bool {
        let event_name = event.name();

        let sent = tokio::select! {
            () = self.cancel_token.cancelled() => {
                debug!(
                    target: "cc.actor.connection",
                    connection_id = %self.connection_id,
                    event = event_name,
                    "Cancelled while writer was stalled"
                );
                return true;
            }
            sent = self.outbound.send(event) => sent,
        };

        if sent.is_err() {
            debug!(
                target: "cc.actor.connection",
                connection_id = %self.connection_id,
                event = event_name,
                "Socket writer gone, exiting"
            );
            return true;
        }

        debug!(
            target: "cc.actor.connection",
            connection_id = %self.connection_id,
            event = event_name,
            "Event forwarded to client"
        );
        false
    }
}
