//! Backend processes
//!
//! - [`handshake`]: the line a backend prints to announce its endpoint
//! - [`client`]: the [`ManagedClient`] trait and the local [`ProcessClient`]
//! - [`provider`]: attaches clients to backend plugins at registration
//! - [`supervisor`]: starts, restarts and stops backends

pub mod client;
pub mod handshake;
pub mod provider;
pub mod supervisor;

pub use client::{ManagedClient, ProcessClient, ProcessSettings};
pub use handshake::{parse_handshake, Endpoint, HandshakeError, Network, Protocol};
pub use provider::{resolve_executable, BackendProvider, ProcessProvider};
pub use supervisor::{Supervisor, SupervisorSettings};
