//! Signature manifest (`MANIFEST.txt`)
//!
//! A signature manifest is a clear-signed block: a JSON payload listing the
//! plugin's files and their hashes, followed by a detached Ed25519 signature
//! over that payload.
//!
//! ```text
//! -----BEGIN PLUGD SIGNED MESSAGE-----
//! Hash: SHA512
//!
//! {"plugin":"acme-panel","version":"1.0.0",...}
//! -----BEGIN PLUGD SIGNATURE-----
//! ed25519:<128 hex chars>
//! -----END PLUGD SIGNATURE-----
//! ```
//!
//! The signed bytes are the payload lines joined with `\n`, without the
//! newline preceding the signature armor. Payload lines starting with `-` are
//! dash-escaped (`- ` prefix) on encoding and unescaped on decoding. Line
//! endings are normalized, so a manifest rewritten with CRLF still verifies.

use super::keys::{TrustedKeys, VerifyError};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use sdk::signature::SignatureType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// File name of the signature manifest inside a plugin directory
pub const MANIFEST_FILENAME: &str = "MANIFEST.txt";

const BEGIN_MESSAGE: &str = "-----BEGIN PLUGD SIGNED MESSAGE-----";
const BEGIN_SIGNATURE: &str = "-----BEGIN PLUGD SIGNATURE-----";
const END_SIGNATURE: &str = "-----END PLUGD SIGNATURE-----";

/// Errors produced while decoding or verifying a signature manifest
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("manifest is not valid UTF-8")]
    NotUtf8,

    #[error("missing '{0}' armor line")]
    MissingArmor(&'static str),

    #[error("malformed armor header '{0}'")]
    MalformedHeader(String),

    #[error("signature block is empty")]
    EmptySignature,

    #[error("payload is not a valid manifest: {0}")]
    Payload(String),

    #[error("manifest is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("unknown signature type '{0}'")]
    UnknownSignatureType(String),

    #[error("signing key '{0}' is not trusted")]
    UnknownKey(String),

    #[error("signature is malformed")]
    MalformedSignature,

    #[error("signature does not match payload")]
    BadSignature,
}

/// Decoded clear-signed block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearSigned {
    /// Armor headers such as `Hash`
    pub headers: Vec<(String, String)>,
    /// Signed bytes, dash-unescaped
    pub payload: Vec<u8>,
    /// Signature text, typically `ed25519:<hex>`
    pub signature: String,
}

impl ClearSigned {
    /// Decode a clear-signed block
    pub fn decode(bytes: &[u8]) -> Result<Self, ManifestError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ManifestError::NotUtf8)?;
        let mut lines = text.lines().skip_while(|l| l.trim().is_empty());

        if lines.next().map(str::trim_end) != Some(BEGIN_MESSAGE) {
            return Err(ManifestError::MissingArmor(BEGIN_MESSAGE));
        }

        let mut headers = Vec::new();
        loop {
            let line = lines
                .next()
                .ok_or(ManifestError::MissingArmor(BEGIN_SIGNATURE))?
                .trim_end();
            if line.is_empty() {
                break;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| ManifestError::MalformedHeader(line.to_string()))?;
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }

        let mut payload_lines = Vec::new();
        loop {
            let line = lines
                .next()
                .ok_or(ManifestError::MissingArmor(BEGIN_SIGNATURE))?;
            if line.trim_end() == BEGIN_SIGNATURE {
                break;
            }
            payload_lines.push(line.strip_prefix("- ").unwrap_or(line));
        }

        let mut signature = String::new();
        let mut terminated = false;
        for line in lines.by_ref() {
            let line = line.trim();
            if line == END_SIGNATURE {
                terminated = true;
                break;
            }
            signature.push_str(line);
        }
        if !terminated {
            return Err(ManifestError::MissingArmor(END_SIGNATURE));
        }
        if signature.is_empty() {
            return Err(ManifestError::EmptySignature);
        }

        Ok(Self {
            headers,
            payload: payload_lines.join("\n").into_bytes(),
            signature,
        })
    }

    /// Encode a payload and its signature as a clear-signed block
    pub fn encode(payload: &str, signature: &str) -> String {
        let mut out = String::new();
        out.push_str(BEGIN_MESSAGE);
        out.push_str("\nHash: SHA512\n\n");
        for line in payload.lines() {
            if line.starts_with('-') {
                out.push_str("- ");
            }
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(BEGIN_SIGNATURE);
        out.push('\n');
        out.push_str(signature);
        out.push('\n');
        out.push_str(END_SIGNATURE);
        out.push('\n');
        out
    }
}

/// Sign `payload` and return the complete `MANIFEST.txt` text
pub fn sign_manifest(payload: &str, key: &SigningKey) -> String {
    let canonical = payload.lines().collect::<Vec<_>>().join("\n");
    let signature = key.sign(canonical.as_bytes());
    ClearSigned::encode(
        &canonical,
        &format!("ed25519:{}", hex::encode(signature.to_bytes())),
    )
}

/// Signed payload of `MANIFEST.txt`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureManifest {
    #[serde(default)]
    pub manifest_version: String,
    #[serde(default)]
    pub signature_type: String,
    #[serde(default)]
    pub signed_by_org: String,
    #[serde(default)]
    pub signed_by_org_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub root_urls: Vec<String>,
    #[serde(default)]
    pub plugin: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub key_id: String,
    /// Issue time, milliseconds since the Unix epoch
    #[serde(default)]
    pub time: i64,
    /// Relative path to hex content hash
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl SignatureManifest {
    /// Decode, verify and validate a `MANIFEST.txt`
    ///
    /// # Errors
    ///
    /// Any decoding, validation or verification failure. Callers treat every
    /// error as an invalid signature.
    pub fn read_verified(bytes: &[u8], keys: &TrustedKeys) -> Result<Self, ManifestError> {
        let block = ClearSigned::decode(bytes)?;

        let manifest: SignatureManifest = serde_json::from_slice(&block.payload)
            .map_err(|e| ManifestError::Payload(e.to_string()))?;
        manifest.validate()?;

        keys.verify(&manifest.key_id, &block.payload, &block.signature)
            .map_err(|e| match e {
                VerifyError::UnknownKey(id) => ManifestError::UnknownKey(id),
                VerifyError::MalformedSignature => ManifestError::MalformedSignature,
                VerifyError::Mismatch => ManifestError::BadSignature,
            })?;

        Ok(manifest)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        if self.plugin.is_empty() {
            return Err(ManifestError::MissingField("plugin"));
        }
        if self.version.is_empty() {
            return Err(ManifestError::MissingField("version"));
        }
        if self.key_id.is_empty() {
            return Err(ManifestError::MissingField("keyId"));
        }
        if self.time <= 0 {
            return Err(ManifestError::MissingField("time"));
        }
        if self.files.is_empty() {
            return Err(ManifestError::MissingField("files"));
        }
        self.kind()?;
        Ok(())
    }

    /// Signature type, `grafana` when the manifest leaves it empty
    pub fn kind(&self) -> Result<SignatureType, ManifestError> {
        if self.signature_type.is_empty() {
            return Ok(SignatureType::Grafana);
        }
        self.signature_type
            .parse()
            .map_err(|_| ManifestError::UnknownSignatureType(self.signature_type.clone()))
    }

    /// Whether the manifest uses the 2.x schema, which lists every file
    pub fn is_v2(&self) -> bool {
        self.manifest_version.starts_with("2.")
    }

    /// Signing org display name, falling back to the org ID
    pub fn org(&self) -> &str {
        if self.signed_by_org_name.is_empty() {
            &self.signed_by_org
        } else {
            &self.signed_by_org_name
        }
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.time)
    }
}
