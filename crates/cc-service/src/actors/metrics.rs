//! Actor metrics and mailbox monitoring.
//!
//! Mailbox depth thresholds:
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Membership | < 100  | 100-500 | > 500    |
//! | Room       | < 100  | 100-500 | > 500    |
//! | Connection | < 50   | 50-200  | > 200    |
//!
//! A room only ever holds two members, but ICE candidate bursts arrive in
//! quick succession, so rooms share the supervisor thresholds.

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for the membership supervisor and room actors.
pub const ROOM_MAILBOX_NORMAL: usize = 100;
pub const ROOM_MAILBOX_WARNING: usize = 500;

/// Mailbox depth thresholds for connection actors.
pub const CONNECTION_MAILBOX_NORMAL: usize = 50;
pub const CONNECTION_MAILBOX_WARNING: usize = 200;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// MembershipActor (singleton supervisor).
    Membership,
    /// RoomActor (one per active room token).
    Room,
    /// ConnectionActor (one per WebSocket).
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Membership => "membership",
            ActorType::Room => "room",
            ActorType::Connection => "connection",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Membership | ActorType::Room => ROOM_MAILBOX_WARNING,
            ActorType::Connection => CONNECTION_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Membership | ActorType::Room => ROOM_MAILBOX_NORMAL,
            ActorType::Connection => CONNECTION_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Mailbox monitor for tracking queue depth.
///
/// Owned by its actor. Depth is sampled from the channel itself each time a
/// message is taken off it, so it reflects the real backlog.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Actor identifier (room id, connection id, ...). Never a room token.
    actor_id: String,
    depth: usize,
    peak_depth: usize,
    level: MailboxLevel,
    messages_processed: u64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: 0,
            peak_depth: 0,
            level: MailboxLevel::Normal,
            messages_processed: 0,
        }
    }

    /// Record one message taken off the mailbox.
    ///
    /// `backlog` is the number of messages still queued behind it, usually
    /// `Receiver::len()` right after `recv()`.
    pub fn record_dequeue(&mut self, backlog: usize) {
        self.messages_processed += 1;
        self.depth = backlog;
        self.peak_depth = self.peak_depth.max(backlog);

        let level = self.level_for_depth(backlog);
        if level == self.level {
            return;
        }

        match level {
            MailboxLevel::Critical => warn!(
                target: "cc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = backlog,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            ),
            MailboxLevel::Warning => debug!(
                target: "cc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = backlog,
                "Mailbox depth elevated"
            ),
            MailboxLevel::Normal => debug!(
                target: "cc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                peak_depth = self.peak_depth,
                "Mailbox depth back to normal"
            ),
        }
        self.level = level;
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Aggregated metrics for the actor system.
///
/// Room and connection counts are mirrored into the `cc_rooms_active` and
/// `cc_connections_active` Prometheus gauges.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    pub active_rooms: AtomicUsize,
    pub active_connections: AtomicUsize,
    /// Total actor panics (indicates bugs).
    pub actor_panics: AtomicU64,
    pub total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_created(&self) {
        let count = self.active_rooms.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_rooms_active(count);
    }

    pub fn room_removed(&self) {
        let count = self.active_rooms.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        prom::set_rooms_active(count);
    }

    pub fn connection_created(&self) {
        let count = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_connections_active(count);
    }

    pub fn connection_closed(&self) {
        let count = self
            .active_connections
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        prom::set_connections_active(count);
    }

    /// Record an actor panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            target: "cc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_as_str() {
        assert_eq!(ActorType::Membership.as_str(), "membership");
        assert_eq!(ActorType::Room.as_str(), "room");
        assert_eq!(ActorType::Connection.as_str(), "connection");
    }

    #[test]
    fn test_actor_type_thresholds() {
        assert_eq!(ActorType::Room.normal_threshold(), 100);
        assert_eq!(ActorType::Room.warning_threshold(), 500);
        assert_eq!(ActorType::Connection.normal_threshold(), 50);
        assert_eq!(ActorType::Connection.warning_threshold(), 200);
    }

    #[test]
    fn test_mailbox_monitor_tracks_backlog() {
        let mut monitor = MailboxMonitor::new(ActorType::Room, "room-1");

        monitor.record_dequeue(3);
        monitor.record_dequeue(2);
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 2);
    }

    #[test]
    fn test_mailbox_monitor_levels() {
        let mut monitor = MailboxMonitor::new(ActorType::Connection, "conn-1");
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        monitor.record_dequeue(75);
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        monitor.record_dequeue(225);
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);

        monitor.record_dequeue(0);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);
        assert_eq!(monitor.peak_depth(), 225);
    }

    #[tokio::test]
    async fn test_mailbox_monitor_sees_real_channel_backlog() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<u32>(512);
        for n in 0..150 {
            tx.send(n).await.unwrap();
        }

        let mut monitor = MailboxMonitor::new(ActorType::Connection, "conn-2");
        while let Ok(_message) = rx.try_recv() {
            monitor.record_dequeue(rx.len());
            if monitor.messages_processed() == 1 {
                assert_eq!(monitor.current_depth(), 149);
                assert_eq!(monitor.current_level(), MailboxLevel::Warning);
            }
        }

        assert_eq!(monitor.messages_processed(), 150);
        assert_eq!(monitor.peak_depth(), 149);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);
    }

    #[test]
    fn test_actor_metrics_counts() {
        let metrics = ActorMetrics::new();

        metrics.room_created();
        metrics.room_created();
        metrics.connection_created();
        assert_eq!(metrics.room_count(), 2);
        assert_eq!(metrics.connection_count(), 1);

        metrics.room_removed();
        metrics.connection_closed();
        assert_eq!(metrics.room_count(), 1);
        assert_eq!(metrics.connection_count(), 0);
    }

    #[test]
    fn test_actor_metrics_panics() {
        let metrics = ActorMetrics::new();

        metrics.record_panic(ActorType::Room);
        metrics.record_panic(ActorType::Connection);
        assert_eq!(metrics.actor_panics.load(Ordering::Relaxed), 2);
    }
}
