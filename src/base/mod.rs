//! Base types and error handling.
//!
//! Provides foundational types mirroring Chromium's `net/base/`:
//! - [`neterror::NetError`]: Network error codes matching `net_error_list.h`
//! - [`networkchange::NetworkChangeNotifier`]: Connection type and DNS change events

pub mod context;
pub mod networkchange;
pub mod neterror;

#[cfg(test)]
mod tests;
