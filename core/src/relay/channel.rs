//! Relay Channel: per-session publish/subscribe over connection queues
//!
//! Each client connection owns one bounded outbound queue. Publishing never
//! awaits: a full queue loses the event for that connection only, and a
//! closed queue is pruned on the spot.

use super::protocol::{RelayEvent, RelayFrame};
use crate::config::RelayConfig;
use crate::session::SessionId;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Identifies one client connection for the lifetime of the process
pub type ConnectionId = u64;

/// Statistics about relay operations
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelayStats {
    /// Open connections
    pub connections: usize,
    /// Channels with at least one subscriber
    pub channels: usize,
    /// Total publish calls
    pub published_total: u64,
    /// Total frames queued to subscribers
    pub delivered_total: u64,
    /// Total frames lost to full queues
    pub dropped_total: u64,
}

pub struct RelayChannel {
    config: RelayConfig,
    next_connection: AtomicU64,
    /// connection_id -> outbound queue
    connections: Arc<RwLock<HashMap<ConnectionId, mpsc::Sender<RelayFrame>>>>,
    /// session_id -> subscribed connections, in subscription order
    channels: Arc<RwLock<HashMap<SessionId, Vec<ConnectionId>>>>,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayChannel {
    /// Create a relay with default configuration
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    /// Create a relay with custom configuration
    pub fn with_config(config: RelayConfig) -> Self {
        Self {
            config,
            next_connection: AtomicU64::new(1),
            connections: Arc::new(RwLock::new(HashMap::new())),
            channels: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    /// Register a client connection and hand back its outbound queue
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<RelayFrame>) {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.subscriber_queue_depth.max(1));

        let mut connections = self.connections.write();
        connections.insert(id, tx);
        self.stats.write().connections = connections.len();

        debug!("Relay connection {} opened", id);
        (id, rx)
    }

    /// Subscribe a connection to a channel. Returns false for unknown
    /// connections; subscribing twice is a no-op.
    pub fn subscribe(&self, channel: &str, connection: ConnectionId) -> bool {
        if !self.connections.read().contains_key(&connection) {
            return false;
        }

        let mut channels = self.channels.write();
        let subscribers = channels.entry(channel.to_string()).or_default();
        if !subscribers.contains(&connection) {
            subscribers.push(connection);
        }
        self.stats.write().channels = channels.len();

        debug!("Connection {} subscribed to {}", connection, channel);
        true
    }

    pub fn unsubscribe(&self, channel: &str, connection: ConnectionId) {
        let mut channels = self.channels.write();
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.retain(|c| *c != connection);
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
        self.stats.write().channels = channels.len();
    }

    /// Forget a connection and every subscription it held
    pub fn disconnect(&self, connection: ConnectionId) {
        {
            let mut connections = self.connections.write();
            connections.remove(&connection);
            self.stats.write().connections = connections.len();
        }

        let mut channels = self.channels.write();
        for subscribers in channels.values_mut() {
            subscribers.retain(|c| *c != connection);
        }
        channels.retain(|_, subscribers| !subscribers.is_empty());
        self.stats.write().channels = channels.len();

        debug!("Relay connection {} closed", connection);
    }

    /// Drop a channel and all its subscriptions. Returns how many
    /// subscriptions were removed.
    pub fn close_channel(&self, channel: &str) -> usize {
        let mut channels = self.channels.write();
        let removed = channels.remove(channel).map_or(0, |s| s.len());
        self.stats.write().channels = channels.len();
        removed
    }

    /// Deliver an event to every current subscriber of `channel`.
    ///
    /// Returns the number of connections the event was queued for.
    /// Subscribers that join later never see it.
    pub fn publish(&self, channel: &str, event: RelayEvent) -> usize {
        let subscribers = match self.channels.read().get(channel) {
            Some(subscribers) => subscribers.clone(),
            None => Vec::new(),
        };

        let frame = RelayFrame::broadcast(channel, event);
        let mut delivered = 0usize;
        let mut dropped = 0u64;
        let mut stale = Vec::new();

        {
            let connections = self.connections.read();
            for connection in &subscribers {
                let Some(tx) = connections.get(connection) else {
                    stale.push(*connection);
                    continue;
                };

                match tx.try_send(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        dropped += 1;
                        warn!(
                            "Dropped {} for connection {} on {}: queue full",
                            frame.event.name(),
                            connection,
                            channel
                        );
                    }
                    Err(TrySendError::Closed(_)) => stale.push(*connection),
                }
            }
        }

        for connection in stale {
            self.disconnect(connection);
        }

        {
            let mut stats = self.stats.write();
            stats.published_total += 1;
            stats.delivered_total += delivered as u64;
            stats.dropped_total += dropped;
        }

        debug!(
            "Published {} on {} to {} subscriber(s)",
            frame.event.name(),
            channel,
            delivered
        );
        delivered
    }

    /// Queue an event for one connection only
    pub fn send_to(&self, connection: ConnectionId, event: RelayEvent) -> bool {
        let result = match self.connections.read().get(&connection) {
            Some(tx) => tx.try_send(RelayFrame::direct(event)),
            None => return false,
        };

        match result {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                warn!(
                    "Dropped direct {} for connection {}: queue full",
                    frame.event.name(),
                    connection
                );
                self.stats.write().dropped_total += 1;
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.disconnect(connection);
                false
            }
        }
    }

    /// Number of connections subscribed to a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.read().get(channel).map_or(0, |s| s.len())
    }

    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.connections.read().contains_key(&connection)
    }

    pub fn get_stats(&self) -> RelayStats {
        self.stats.read().clone()
    }
}

impl Default for RelayChannel {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
