//! Socket pools for DNS transactions.
//!
//! Chromium mapping: net/dns/dns_socket_pool.h
//!
//! Two pools are provided:
//! - [`NullDnsSocketPool`]: a fresh socket per allocation, closed on free
//! - [`DefaultDnsSocketPool`]: keeps a few idle sockets per server and hands
//!   them out in random order, so consecutive queries do not share a source
//!   port. Caps outstanding sockets per server; beyond the cap allocation
//!   fails instead of queuing.

use crate::socket::client::{ClientSocketFactory, DatagramClientSocket, DnsStreamSocket};
use parking_lot::Mutex;
use rand::Rng;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Allocates sockets for the nameservers of one DNS configuration.
pub trait DnsSocketPool: Send + Sync {
    /// Bind the pool to the nameserver list. Called once by the session.
    fn initialize(&mut self, nameservers: &[SocketAddr]);

    /// A connected datagram socket, or `None` if none can be had right now.
    fn allocate_socket(&self, server_index: usize) -> Option<Box<dyn DatagramClientSocket>>;

    /// Return a socket obtained from `allocate_socket`.
    fn free_socket(&self, server_index: usize, socket: Box<dyn DatagramClientSocket>);

    /// An unpooled, unconnected stream socket for one TCP transaction.
    fn create_tcp_socket(&self, server_index: usize) -> Box<dyn DnsStreamSocket>;
}

/// State shared by both pool flavors.
struct PoolBase {
    factory: Arc<dyn ClientSocketFactory>,
    nameservers: Vec<SocketAddr>,
}

impl PoolBase {
    fn new(factory: Arc<dyn ClientSocketFactory>) -> Self {
        Self { factory, nameservers: Vec::new() }
    }

    fn server(&self, server_index: usize) -> SocketAddr {
        assert!(
            server_index < self.nameservers.len(),
            "server index {server_index} out of range ({} nameservers)",
            self.nameservers.len()
        );
        self.nameservers[server_index]
    }

    fn create_connected_socket(
        &self,
        server_index: usize,
    ) -> Option<Box<dyn DatagramClientSocket>> {
        let server = self.server(server_index);
        match self.factory.create_datagram_socket(server) {
            Ok(socket) => Some(socket),
            Err(e) => {
                tracing::warn!(server = %server, error = %e, "failed to create DNS socket");
                None
            }
        }
    }

    fn create_tcp_socket(&self, server_index: usize) -> Box<dyn DnsStreamSocket> {
        self.factory.create_stream_socket(self.server(server_index))
    }
}

/// Creates a new socket on every allocation.
pub struct NullDnsSocketPool {
    base: PoolBase,
}

impl NullDnsSocketPool {
    pub fn new(factory: Arc<dyn ClientSocketFactory>) -> Self {
        Self { base: PoolBase::new(factory) }
    }
}

impl fmt::Debug for NullDnsSocketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NullDnsSocketPool")
            .field("nameservers", &self.base.nameservers.len())
            .finish()
    }
}

impl DnsSocketPool for NullDnsSocketPool {
    fn initialize(&mut self, nameservers: &[SocketAddr]) {
        self.base.nameservers = nameservers.to_vec();
    }

    fn allocate_socket(&self, server_index: usize) -> Option<Box<dyn DatagramClientSocket>> {
        self.base.create_connected_socket(server_index)
    }

    fn free_socket(&self, _server_index: usize, socket: Box<dyn DatagramClientSocket>) {
        drop(socket);
    }

    fn create_tcp_socket(&self, server_index: usize) -> Box<dyn DnsStreamSocket> {
        self.base.create_tcp_socket(server_index)
    }
}

/// Per-server slot state.
#[derive(Default)]
struct ServerSockets {
    idle: Vec<Box<dyn DatagramClientSocket>>,
    outstanding: usize,
}

/// Pools idle sockets per server with a cap on outstanding sockets.
pub struct DefaultDnsSocketPool {
    base: PoolBase,
    max_idle_per_server: usize,
    max_outstanding_per_server: usize,
    servers: Mutex<Vec<ServerSockets>>,
}

impl DefaultDnsSocketPool {
    /// Default idle sockets kept per server.
    pub const DEFAULT_MAX_IDLE: usize = 4;
    /// Default outstanding sockets per server.
    pub const DEFAULT_MAX_OUTSTANDING: usize = 64;

    pub fn new(factory: Arc<dyn ClientSocketFactory>) -> Self {
        Self::with_limits(factory, Self::DEFAULT_MAX_IDLE, Self::DEFAULT_MAX_OUTSTANDING)
    }

    pub fn with_limits(
        factory: Arc<dyn ClientSocketFactory>,
        max_idle_per_server: usize,
        max_outstanding_per_server: usize,
    ) -> Self {
        Self {
            base: PoolBase::new(factory),
            max_idle_per_server,
            max_outstanding_per_server,
            servers: Mutex::new(Vec::new()),
        }
    }

    /// Idle sockets held for `server_index`.
    pub fn idle_socket_count(&self, server_index: usize) -> usize {
        self.servers.lock().get(server_index).map_or(0, |s| s.idle.len())
    }

    /// Sockets currently leased out for `server_index`.
    pub fn outstanding_socket_count(&self, server_index: usize) -> usize {
        self.servers.lock().get(server_index).map_or(0, |s| s.outstanding)
    }
}

impl fmt::Debug for DefaultDnsSocketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultDnsSocketPool")
            .field("nameservers", &self.base.nameservers.len())
            .field("max_idle_per_server", &self.max_idle_per_server)
            .field("max_outstanding_per_server", &self.max_outstanding_per_server)
            .finish()
    }
}

impl DnsSocketPool for DefaultDnsSocketPool {
    fn initialize(&mut self, nameservers: &[SocketAddr]) {
        self.base.nameservers = nameservers.to_vec();
        let servers = self.servers.get_mut();
        servers.clear();
        servers.resize_with(nameservers.len(), ServerSockets::default);
    }

    fn allocate_socket(&self, server_index: usize) -> Option<Box<dyn DatagramClientSocket>> {
        let server = self.base.server(server_index);
        let mut servers = self.servers.lock();
        let slot = &mut servers[server_index];

        if slot.outstanding >= self.max_outstanding_per_server {
            tracing::warn!(
                server = %server,
                outstanding = slot.outstanding,
                "DNS socket pool exhausted"
            );
            return None;
        }

        // Dead sockets are dropped rather than handed out.
        slot.idle.retain(|s| s.is_connected());

        let socket = if slot.idle.is_empty() {
            self.base.create_connected_socket(server_index)?
        } else {
            let pick = rand::thread_rng().gen_range(0..slot.idle.len());
            slot.idle.swap_remove(pick)
        };

        slot.outstanding += 1;
        Some(socket)
    }

    fn free_socket(&self, server_index: usize, socket: Box<dyn DatagramClientSocket>) {
        let mut servers = self.servers.lock();
        let Some(slot) = servers.get_mut(server_index) else {
            return;
        };
        slot.outstanding = slot.outstanding.saturating_sub(1);

        if socket.is_connected() && slot.idle.len() < self.max_idle_per_server {
            slot.idle.push(socket);
        }
    }

    fn create_tcp_socket(&self, server_index: usize) -> Box<dyn DnsStreamSocket> {
        self.base.create_tcp_socket(server_index)
    }
}
