//! plugd Engine Library
//!
//! Discovers plugins on disk, decides whether each one may be trusted, keeps
//! the accepted ones in a registry and supervises their backend processes.
//! It is used by both the `plugd` binary and integration tests.

/// Configuration management module
pub mod config;

/// Plugin manifest discovery
pub mod finder;

/// Descriptor loading, classification and registration
pub mod loader;

/// Registered plugin records
pub mod plugin;

/// Backend process clients and supervision
pub mod process;

/// Registry of loaded plugins
pub mod registry;

/// Signature manifests, trusted keys and trust policy
pub mod signature;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers for the CLI
pub mod handlers;
