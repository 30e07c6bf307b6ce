//! plugd SDK
//!
//! Shared types for the plugd engine and the components that consume it:
//! the plugin descriptor model, the trust vocabulary, and the error types.

/// Error types and handling
pub mod errors;

/// Plugin descriptor (`plugin.json`) types
pub mod descriptor;

/// Class and signature types
pub mod signature;

// Re-export commonly used types
pub use descriptor::{
    DescriptorError, Include, Info, InfoLink, PluginDependency, PluginDescriptor, PluginType, Role,
    PLUGIN_MANIFEST_FILENAME,
};
pub use errors::{HostError, PlugdErrorExt, PluginError};
pub use signature::{Class, Signature, SignatureStatus, SignatureType};
