//! Plugin signatures
//!
//! - [`keys`]: trusted Ed25519 verifying keys, one embedded at build time
//! - [`manifest`]: the clear-signed `MANIFEST.txt` format
//! - [`calculator`]: computes a plugin's signature status from its files
//! - [`validator`]: inheritance and the allow/deny policy

pub mod calculator;
pub mod keys;
pub mod manifest;
pub mod validator;

pub use calculator::SignatureCalculator;
pub use keys::{TrustedKeys, EMBEDDED_KEY_ID};
pub use manifest::{sign_manifest, ClearSigned, ManifestError, SignatureManifest, MANIFEST_FILENAME};
pub use validator::{resolve, ParentTrust, SignaturePolicy, SignatureValidator};
