//! Build script for embedding the trusted signing key at compile time
//!
//! The engine trusts one signing key without any configuration: the key the
//! upstream publisher signs `MANIFEST.txt` files with. Embedding it at build
//! time means it cannot be swapped without recompiling.
//!
//! # Key Location
//!
//! The script looks for the public key in the following locations (in order):
//! 1. Environment variable `PLUGD_SIGNING_PUBLIC_KEY` (hex-encoded)
//! 2. File `keys/signing_public_key.hex` at the workspace root (hex-encoded)
//!
//! If no key is found a placeholder (all zeros) is embedded, which the engine
//! refuses to trust. Operators then supply keys through `config.toml`.

use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let dest_path = out_dir.join("signing_public_key.bin");

    let public_key_bytes = load_signing_public_key();

    fs::write(&dest_path, &public_key_bytes).expect("Failed to write signing public key");

    println!("cargo:rerun-if-changed=../keys/signing_public_key.hex");
    println!("cargo:rerun-if-env-changed=PLUGD_SIGNING_PUBLIC_KEY");

    if is_placeholder_key(&public_key_bytes) {
        println!("cargo:warning=No embedded signing key; only configured keys will be trusted");
    }
}

/// Load the signing public key from available sources
fn load_signing_public_key() -> Vec<u8> {
    if let Ok(key_hex) = env::var("PLUGD_SIGNING_PUBLIC_KEY") {
        if let Ok(bytes) = hex::decode(key_hex.trim()) {
            if bytes.len() == 32 {
                return bytes;
            }
        }
        println!("cargo:warning=Invalid PLUGD_SIGNING_PUBLIC_KEY (must be 32 bytes hex)");
    }

    // build.rs runs from the crate dir (engine/), key files are at workspace root
    let manifest_dir =
        PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set by cargo"));
    let workspace_root = manifest_dir.parent().unwrap_or(&manifest_dir);

    let hex_path = workspace_root.join("keys/signing_public_key.hex");
    if let Ok(hex_str) = fs::read_to_string(&hex_path) {
        if let Ok(bytes) = hex::decode(hex_str.trim()) {
            if bytes.len() == 32 {
                return bytes;
            }
        }
        println!("cargo:warning=Invalid keys/signing_public_key.hex (must be 32 bytes hex)");
    }

    vec![0u8; 32]
}

/// Check if a key is the placeholder key
fn is_placeholder_key(key: &[u8]) -> bool {
    key.iter().all(|&b| b == 0)
}
