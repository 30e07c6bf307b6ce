//! Integration tests for signature calculation over real plugin directories
//!
//! Fixtures are signed with a fixed-seed Ed25519 key that is added to the
//! trusted key set under `test-key`.

use ed25519_dalek::SigningKey;
use plugd_engine::signature::{sign_manifest, SignatureCalculator, TrustedKeys, MANIFEST_FILENAME};
use sdk::{Class, PluginDescriptor, Signature, SignatureStatus, SignatureType};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use url::Url;
use walkdir::WalkDir;

const KEY_ID: &str = "test-key";

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

fn trusted_keys() -> TrustedKeys {
    let mut keys = TrustedKeys::new();
    keys.insert(KEY_ID, signing_key().verifying_key());
    keys
}

fn calculator() -> SignatureCalculator {
    SignatureCalculator::new(
        trusted_keys(),
        Some(Url::parse("https://grafana.example.com/monitoring/").unwrap()),
    )
}

fn descriptor(id: &str, version: &str) -> PluginDescriptor {
    PluginDescriptor::from_json(
        &json!({"id": id, "type": "panel", "info": {"version": version}}).to_string(),
    )
    .unwrap()
}

/// Write plugin.json plus `files` into `dir`
fn write_plugin(dir: &Path, id: &str, version: &str, files: &[(&str, &str)]) {
    fs::create_dir_all(dir).unwrap();
    fs::write(
        dir.join("plugin.json"),
        json!({"id": id, "type": "panel", "info": {"version": version}}).to_string(),
    )
    .unwrap();
    for (rel, contents) in files {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
}

/// SHA-256 of every regular file under `dir` except the signature manifest
fn hash_tree(dir: &Path) -> BTreeMap<String, String> {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name() != MANIFEST_FILENAME)
        .map(|e| {
            let rel = e
                .path()
                .strip_prefix(dir)
                .unwrap()
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let hash = hex::encode(Sha256::digest(fs::read(e.path()).unwrap()));
            (rel, hash)
        })
        .collect()
}

struct ManifestOptions<'a> {
    manifest_version: &'a str,
    signature_type: &'a str,
    root_urls: Vec<&'a str>,
    key: SigningKey,
    key_id: &'a str,
}

impl Default for ManifestOptions<'_> {
    fn default() -> Self {
        Self {
            manifest_version: "2.0.0",
            signature_type: "grafana",
            root_urls: Vec::new(),
            key: signing_key(),
            key_id: KEY_ID,
        }
    }
}

fn sign_plugin(dir: &Path, id: &str, version: &str, options: ManifestOptions<'_>) {
    let payload = json!({
        "manifestVersion": options.manifest_version,
        "signatureType": options.signature_type,
        "signedByOrg": "acme",
        "signedByOrgName": "Acme Corp",
        "rootUrls": options.root_urls,
        "plugin": id,
        "version": version,
        "keyId": options.key_id,
        "time": 1_700_000_000_000i64,
        "files": hash_tree(dir),
    });
    fs::write(
        dir.join(MANIFEST_FILENAME),
        sign_manifest(&payload.to_string(), &options.key),
    )
    .unwrap();
}

fn signed_plugin(files: &[(&str, &str)]) -> (TempDir, std::path::PathBuf) {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("acme-panel");
    write_plugin(&dir, "acme-panel", "1.0.0", files);
    sign_plugin(&dir, "acme-panel", "1.0.0", ManifestOptions::default());
    (temp, dir)
}

fn calculate(dir: &Path) -> Signature {
    calculator().calculate(&descriptor("acme-panel", "1.0.0"), dir, Class::External)
}

#[test]
fn test_valid_signature() {
    let (_temp, dir) = signed_plugin(&[("module.js", "console.log(1)"), ("img/logo.svg", "<svg/>")]);

    let signature = calculate(&dir);
    assert_eq!(signature, Signature::valid(SignatureType::Grafana, "Acme Corp"));
}

#[test]
fn test_core_plugins_are_internal_without_reading_anything() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("graph");
    write_plugin(&dir, "graph", "1.0.0", &[]);
    fs::write(dir.join(MANIFEST_FILENAME), "garbage that would be invalid").unwrap();

    let signature = calculator().calculate(&descriptor("graph", "1.0.0"), &dir, Class::Core);
    assert_eq!(signature.status, SignatureStatus::Internal);
}

#[test]
fn test_missing_manifest_is_unsigned() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("acme-panel");
    write_plugin(&dir, "acme-panel", "1.0.0", &[("module.js", "x")]);

    assert_eq!(calculate(&dir).status, SignatureStatus::Unsigned);
}

#[test]
fn test_short_manifest_is_unsigned() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("acme-panel");
    write_plugin(&dir, "acme-panel", "1.0.0", &[]);
    fs::write(dir.join(MANIFEST_FILENAME), "short").unwrap();

    assert_eq!(calculate(&dir).status, SignatureStatus::Unsigned);
}

#[test]
fn test_garbage_manifest_is_invalid() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("acme-panel");
    write_plugin(&dir, "acme-panel", "1.0.0", &[]);
    fs::write(dir.join(MANIFEST_FILENAME), "this is definitely not a signed manifest").unwrap();

    assert_eq!(calculate(&dir).status, SignatureStatus::Invalid);
}

#[test]
fn test_untrusted_key_is_invalid() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("acme-panel");
    write_plugin(&dir, "acme-panel", "1.0.0", &[("module.js", "x")]);
    sign_plugin(
        &dir,
        "acme-panel",
        "1.0.0",
        ManifestOptions {
            key: SigningKey::from_bytes(&[1u8; 32]),
            ..Default::default()
        },
    );

    assert_eq!(calculate(&dir).status, SignatureStatus::Invalid);
}

#[test]
fn test_unknown_key_id_is_invalid() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("acme-panel");
    write_plugin(&dir, "acme-panel", "1.0.0", &[("module.js", "x")]);
    sign_plugin(
        &dir,
        "acme-panel",
        "1.0.0",
        ManifestOptions {
            key_id: "somebody-else",
            ..Default::default()
        },
    );

    assert_eq!(calculate(&dir).status, SignatureStatus::Invalid);
}

#[test]
fn test_edited_file_is_modified() {
    let (_temp, dir) = signed_plugin(&[("module.js", "console.log(1)")]);
    fs::write(dir.join("module.js"), "console.log(2)").unwrap();

    assert_eq!(calculate(&dir).status, SignatureStatus::Modified);
}

#[test]
fn test_deleted_file_is_modified() {
    let (_temp, dir) = signed_plugin(&[("module.js", "console.log(1)")]);
    fs::remove_file(dir.join("module.js")).unwrap();

    assert_eq!(calculate(&dir).status, SignatureStatus::Modified);
}

#[test]
fn test_version_mismatch_is_modified() {
    let (_temp, dir) = signed_plugin(&[("module.js", "x")]);

    let signature = calculator().calculate(&descriptor("acme-panel", "2.0.0"), &dir, Class::External);
    assert_eq!(signature.status, SignatureStatus::Modified);
}

#[test]
fn test_plugin_id_mismatch_is_modified() {
    let (_temp, dir) = signed_plugin(&[("module.js", "x")]);

    let signature = calculator().calculate(&descriptor("other-panel", "1.0.0"), &dir, Class::External);
    assert_eq!(signature.status, SignatureStatus::Modified);
}

#[test]
fn test_unlisted_file_is_modified_for_v2_manifests() {
    let (_temp, dir) = signed_plugin(&[("module.js", "x")]);
    fs::write(dir.join("extra.js"), "injected").unwrap();

    assert_eq!(calculate(&dir).status, SignatureStatus::Modified);
}

#[test]
fn test_unlisted_file_is_tolerated_for_v1_manifests() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("acme-panel");
    write_plugin(&dir, "acme-panel", "1.0.0", &[("module.js", "x")]);
    sign_plugin(
        &dir,
        "acme-panel",
        "1.0.0",
        ManifestOptions {
            manifest_version: "1.0.0",
            ..Default::default()
        },
    );
    fs::write(dir.join("README.md"), "added later").unwrap();

    assert_eq!(calculate(&dir).status, SignatureStatus::Valid);
}

#[cfg(unix)]
#[test]
fn test_symlink_escaping_plugin_dir_is_modified() {
    let (temp, dir) = signed_plugin(&[("module.js", "x")]);
    let outside = temp.path().join("secret.txt");
    fs::write(&outside, "outside").unwrap();
    std::os::unix::fs::symlink(&outside, dir.join("link.txt")).unwrap();

    assert_eq!(calculate(&dir).status, SignatureStatus::Modified);
}

#[test]
fn test_private_signature_matching_root_url_is_valid() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("acme-panel");
    write_plugin(&dir, "acme-panel", "1.0.0", &[("module.js", "x")]);
    sign_plugin(
        &dir,
        "acme-panel",
        "1.0.0",
        ManifestOptions {
            signature_type: "private",
            root_urls: vec!["https://grafana.example.com/"],
            ..Default::default()
        },
    );

    let signature = calculate(&dir);
    assert_eq!(signature, Signature::valid(SignatureType::Private, "Acme Corp"));
}

#[test]
fn test_private_signature_for_other_host_is_invalid() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("acme-panel");
    write_plugin(&dir, "acme-panel", "1.0.0", &[("module.js", "x")]);
    sign_plugin(
        &dir,
        "acme-panel",
        "1.0.0",
        ManifestOptions {
            signature_type: "private",
            root_urls: vec!["https://grafana.other.com/", "https://grafana.example.com/other/"],
            ..Default::default()
        },
    );

    assert_eq!(calculate(&dir).status, SignatureStatus::Invalid);
}

#[test]
fn test_private_signature_without_app_url_is_invalid() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("acme-panel");
    write_plugin(&dir, "acme-panel", "1.0.0", &[("module.js", "x")]);
    sign_plugin(
        &dir,
        "acme-panel",
        "1.0.0",
        ManifestOptions {
            signature_type: "private",
            root_urls: vec!["https://grafana.example.com/"],
            ..Default::default()
        },
    );

    let calculator = SignatureCalculator::new(trusted_keys(), None);
    let signature = calculator.calculate(&descriptor("acme-panel", "1.0.0"), &dir, Class::External);
    assert_eq!(signature.status, SignatureStatus::Invalid);
}

#[test]
fn test_calculation_is_deterministic() {
    let (_temp, dir) = signed_plugin(&[("module.js", "x"), ("a/b/c.json", "{}")]);

    let first = calculate(&dir);
    for _ in 0..5 {
        assert_eq!(calculate(&dir), first);
    }
}

#[test]
fn test_crlf_manifest_still_valid() {
    let (_temp, dir) = signed_plugin(&[("module.js", "x")]);
    let text = fs::read_to_string(dir.join(MANIFEST_FILENAME)).unwrap();
    fs::write(dir.join(MANIFEST_FILENAME), text.replace('\n', "\r\n")).unwrap();

    assert_eq!(calculate(&dir).status, SignatureStatus::Valid);
}
