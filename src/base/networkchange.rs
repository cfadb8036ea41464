//! Network change notifications.
//!
//! Chromium mapping: net/base/network_change_notifier.h (observer side only).
//!
//! Observers subscribe to a `tokio::sync::broadcast` channel instead of
//! registering callbacks, so delivery is asynchronous just like Chromium's
//! observer lists. Senders never block and never fail when nobody listens.

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

/// Connection type of the active network (matches Chromium's ordering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    #[default]
    Unknown = 0,
    Ethernet = 1,
    Wifi = 2,
    #[serde(rename = "2g")]
    Cellular2g = 3,
    #[serde(rename = "3g")]
    Cellular3g = 4,
    #[serde(rename = "4g")]
    Cellular4g = 5,
    None = 6,
    Bluetooth = 7,
    #[serde(rename = "5g")]
    Cellular5g = 8,
}

impl ConnectionType {
    /// All connection types, indexed by their numeric value.
    pub const ALL: [ConnectionType; 9] = [
        ConnectionType::Unknown,
        ConnectionType::Ethernet,
        ConnectionType::Wifi,
        ConnectionType::Cellular2g,
        ConnectionType::Cellular3g,
        ConnectionType::Cellular4g,
        ConnectionType::None,
        ConnectionType::Bluetooth,
        ConnectionType::Cellular5g,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Events delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkChange {
    /// DNS configuration or secure DNS availability changed.
    DnsChanged,
    /// The active connection type changed.
    ConnectionTypeChanged(ConnectionType),
}

/// Broadcasts network change events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct NetworkChangeNotifier {
    sender: broadcast::Sender<NetworkChange>,
}

impl Default for NetworkChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkChangeNotifier {
    /// Create an isolated notifier (tests, embedders with their own scope).
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Process-wide notifier.
    pub fn global() -> &'static NetworkChangeNotifier {
        static NOTIFIER: LazyLock<NetworkChangeNotifier> =
            LazyLock::new(NetworkChangeNotifier::new);
        &NOTIFIER
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkChange> {
        self.sender.subscribe()
    }

    /// Signal a DNS change that did not originate from the system config,
    /// e.g. secure DNS servers becoming (un)available.
    pub fn trigger_non_system_dns_change(&self) {
        tracing::debug!(receivers = self.sender.receiver_count(), "non-system DNS change");
        let _ = self.sender.send(NetworkChange::DnsChanged);
    }

    /// Signal a connection type change.
    pub fn notify_connection_type_changed(&self, connection_type: ConnectionType) {
        tracing::debug!(?connection_type, "connection type changed");
        let _ = self.sender.send(NetworkChange::ConnectionTypeChanged(connection_type));
    }
}
