//! Socket abstractions consumed by the DNS layer.
//!
//! Mirrors the parts of Chromium's `net/socket/` that DNS transactions use:
//! - [`client::DatagramClientSocket`]: connected UDP socket per server
//! - [`client::DnsStreamSocket`]: one-shot TCP socket for truncated responses
//! - [`client::ClientSocketFactory`]: creates both, tokio-backed by default

pub mod client;
