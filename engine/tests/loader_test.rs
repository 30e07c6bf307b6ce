//! Integration tests for the loader: discovery through registration

use ed25519_dalek::SigningKey;
use plugd_engine::loader::{Loader, PluginRoots};
use plugd_engine::registry::Registry;
use plugd_engine::signature::{
    sign_manifest, SignatureCalculator, SignaturePolicy, SignatureValidator, TrustedKeys,
    MANIFEST_FILENAME,
};
use sdk::{Class, PluginError, PluginType, SignatureStatus, SignatureType};
use semver::Version;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

const KEY_ID: &str = "test-key";

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[42u8; 32])
}

/// Temp tree with `core/`, `bundled/` and `external/` roots
struct Fixture {
    temp: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        for root in ["core", "bundled", "external"] {
            fs::create_dir_all(temp.path().join(root)).unwrap();
        }
        Self { temp }
    }

    fn root(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }

    fn roots(&self) -> Vec<PathBuf> {
        vec![self.root("core"), self.root("bundled"), self.root("external")]
    }

    fn loader(&self, policy: SignaturePolicy, registry: Arc<Registry>) -> Loader {
        let mut keys = TrustedKeys::new();
        keys.insert(KEY_ID, signing_key().verifying_key());

        Loader::new(
            PluginRoots::new(
                Some(self.root("core")),
                Some(self.root("bundled")),
                vec![self.root("external")],
            ),
            SignatureCalculator::new(keys, None),
            SignatureValidator::new(policy),
            registry,
        )
    }
}

fn dev_mode() -> SignaturePolicy {
    SignaturePolicy::new(true, Vec::<String>::new())
}

fn write_plugin(dir: &Path, manifest: Value) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("plugin.json"), manifest.to_string()).unwrap();
}

fn plugin_json(id: &str, kind: &str) -> Value {
    json!({"id": id, "type": kind, "name": id, "info": {"version": "1.0.0"}})
}

fn sign_tree(dir: &Path, id: &str) {
    let files: BTreeMap<String, String> = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file() && e.file_name() != MANIFEST_FILENAME)
        .map(|e| {
            let rel = e
                .path()
                .strip_prefix(dir)
                .unwrap()
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            (rel, hex::encode(Sha256::digest(fs::read(e.path()).unwrap())))
        })
        .collect();

    let payload = json!({
        "manifestVersion": "2.0.0",
        "signatureType": "grafana",
        "signedByOrgName": "Acme Corp",
        "plugin": id,
        "version": "1.0.0",
        "keyId": KEY_ID,
        "time": 1_700_000_000_000i64,
        "files": files,
    });
    fs::write(
        dir.join(MANIFEST_FILENAME),
        sign_manifest(&payload.to_string(), &signing_key()),
    )
    .unwrap();
}

#[tokio::test]
async fn test_bad_manifest_does_not_affect_others() {
    let fx = Fixture::new();
    let external = fx.root("external");
    write_plugin(&external.join("good"), plugin_json("good-panel", "panel"));
    fs::create_dir_all(external.join("broken")).unwrap();
    fs::write(external.join("broken/plugin.json"), "{not json").unwrap();
    write_plugin(&external.join("no-id"), json!({"type": "panel"}));
    write_plugin(&external.join("bad-type"), json!({"id": "x", "type": "widget"}));
    write_plugin(
        &external.join("escaping"),
        json!({"id": "escaping-datasource", "type": "datasource", "backend": true, "executable": "/bin/sh"}),
    );

    let registry = Arc::new(Registry::new());
    let loader = fx.loader(dev_mode(), Arc::clone(&registry));
    let report = loader.load(&fx.roots()).await;

    assert_eq!(report.plugins.len(), 1);
    assert!(report.plugin("good-panel").is_some());
    assert_eq!(registry.len(), 1);

    assert_eq!(report.errors.len(), 4);
    assert!(registry.record("escaping-datasource").is_none());
    let broken_key = external.join("broken/plugin.json").display().to_string();
    assert!(matches!(
        report.errors.get(&broken_key),
        Some(PluginError::ManifestInvalid { .. })
    ));
    assert!(report
        .errors
        .values()
        .all(|e| matches!(e, PluginError::ManifestInvalid { .. })));
}

#[tokio::test]
async fn test_classes_follow_roots() {
    let fx = Fixture::new();
    write_plugin(&fx.root("core").join("graph"), plugin_json("graph", "panel"));
    write_plugin(&fx.root("bundled").join("clock"), plugin_json("clock-panel", "panel"));
    write_plugin(&fx.root("external").join("acme"), plugin_json("acme-panel", "panel"));

    let registry = Arc::new(Registry::new());
    let loader = fx.loader(dev_mode(), Arc::clone(&registry));
    let report = loader.load(&fx.roots()).await;

    assert!(report.is_clean());
    let class_of = |id: &str| registry.plugin(id).unwrap().class();
    assert_eq!(class_of("graph"), Class::Core);
    assert_eq!(class_of("clock-panel"), Class::Bundled);
    assert_eq!(class_of("acme-panel"), Class::External);

    assert_eq!(
        registry.plugin("graph").unwrap().signature().status,
        SignatureStatus::Internal
    );
}

#[tokio::test]
async fn test_unsigned_external_rejected_but_recorded() {
    let fx = Fixture::new();
    write_plugin(&fx.root("external").join("acme"), plugin_json("acme-panel", "panel"));
    write_plugin(&fx.root("bundled").join("clock"), plugin_json("clock-panel", "panel"));

    let registry = Arc::new(Registry::new());
    let loader = fx.loader(SignaturePolicy::strict(), Arc::clone(&registry));
    let report = loader.load(&fx.roots()).await;

    // Bundled plugins are operator-installed and load unsigned
    assert!(report.plugin("clock-panel").is_some());

    assert!(report.plugin("acme-panel").is_none());
    assert_eq!(
        report.errors.get("acme-panel"),
        Some(&PluginError::Signature {
            plugin_id: "acme-panel".to_string(),
            status: SignatureStatus::Unsigned,
        })
    );

    let rejected = registry.plugin("acme-panel").unwrap();
    assert!(rejected.is_rejected());
    assert_eq!(rejected.summary().error, Some("signatureMissing"));
}

#[tokio::test]
async fn test_allow_list_admits_unsigned_plugin() {
    let fx = Fixture::new();
    write_plugin(&fx.root("external").join("acme"), plugin_json("acme-panel", "panel"));
    write_plugin(&fx.root("external").join("other"), plugin_json("other-panel", "panel"));

    let registry = Arc::new(Registry::new());
    let policy = SignaturePolicy::new(false, ["acme-panel".to_string()]);
    let report = fx.loader(policy, registry).load(&fx.roots()).await;

    assert!(report.plugin("acme-panel").is_some());
    assert!(report.plugin("other-panel").is_none());
    assert!(report.errors.contains_key("other-panel"));
}

#[tokio::test]
async fn test_signed_plugin_loads_under_strict_policy() {
    let fx = Fixture::new();
    let dir = fx.root("external").join("acme");
    write_plugin(&dir, plugin_json("acme-panel", "panel"));
    fs::write(dir.join("module.js"), "export {}").unwrap();
    sign_tree(&dir, "acme-panel");

    let registry = Arc::new(Registry::new());
    let report = fx.loader(SignaturePolicy::strict(), registry).load(&fx.roots()).await;

    assert!(report.is_clean());
    let plugin = report.plugin("acme-panel").unwrap();
    assert_eq!(plugin.signature().status, SignatureStatus::Valid);
    assert_eq!(plugin.signature().signature_type, Some(SignatureType::Grafana));
    assert_eq!(plugin.signature().org.as_deref(), Some("Acme Corp"));
}

#[tokio::test]
async fn test_nested_plugin_inherits_parent_signature() {
    let fx = Fixture::new();
    let app = fx.root("external").join("acme-app");
    write_plugin(&app, plugin_json("acme-app", "app"));
    write_plugin(&app.join("datasources/inner"), plugin_json("acme-datasource", "datasource"));
    sign_tree(&app, "acme-app");

    let registry = Arc::new(Registry::new());
    let report = fx.loader(SignaturePolicy::strict(), Arc::clone(&registry)).load(&fx.roots()).await;

    assert!(report.is_clean(), "errors: {:?}", report.errors);

    let parent = registry.plugin("acme-app").unwrap();
    let child = registry.plugin("acme-datasource").unwrap();
    assert_eq!(child.parent(), Some("acme-app"));
    assert_eq!(parent.children(), ["acme-datasource".to_string()]);
    assert_eq!(child.signature(), parent.signature());
    assert_eq!(child.signature().status, SignatureStatus::Valid);
}

#[tokio::test]
async fn test_tampered_parent_does_not_shield_child() {
    let fx = Fixture::new();
    let app = fx.root("external").join("acme-app");
    write_plugin(&app, plugin_json("acme-app", "app"));
    fs::write(app.join("module.js"), "original").unwrap();
    write_plugin(&app.join("panels/inner"), plugin_json("acme-inner", "panel"));
    sign_tree(&app, "acme-app");
    fs::write(app.join("module.js"), "tampered").unwrap();

    let registry = Arc::new(Registry::new());
    let policy = dev_mode();
    let report = fx.loader(policy, registry).load(&fx.roots()).await;

    // Dev mode only waives missing signatures, not tampering
    for id in ["acme-app", "acme-inner"] {
        assert_eq!(
            report.errors.get(id).and_then(|e| e.signature_status()),
            Some(SignatureStatus::Modified),
            "{}",
            id
        );
    }
}

#[tokio::test]
async fn test_duplicate_id_keeps_first_and_skips_rest() {
    let fx = Fixture::new();
    write_plugin(&fx.root("external").join("a-first"), plugin_json("dup-panel", "panel"));
    write_plugin(&fx.root("external").join("b-second"), plugin_json("dup-panel", "panel"));

    let registry = Arc::new(Registry::new());
    let loader = fx.loader(dev_mode(), Arc::clone(&registry));
    let report = loader.load(&fx.roots()).await;

    assert!(report.is_clean());
    assert_eq!(registry.len(), 1);
    assert!(registry.plugin("dup-panel").unwrap().dir().ends_with("a-first"));
}

#[tokio::test]
async fn test_loading_twice_registers_nothing_new() {
    let fx = Fixture::new();
    write_plugin(&fx.root("external").join("acme"), plugin_json("acme-panel", "panel"));

    let registry = Arc::new(Registry::new());
    let loader = fx.loader(dev_mode(), Arc::clone(&registry));

    let first = loader.load(&fx.roots()).await;
    let second = loader.load(&fx.roots()).await;

    assert_eq!(first.plugins.len(), 1);
    assert!(second.plugins.is_empty());
    assert!(second.is_clean());
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_incompatible_host_version_not_registered() {
    let fx = Fixture::new();
    let mut manifest = plugin_json("future-panel", "panel");
    manifest["dependencies"] = json!({"grafanaDependency": ">=11.0.0"});
    write_plugin(&fx.root("external").join("future"), manifest);

    let mut manifest = plugin_json("current-panel", "panel");
    manifest["dependencies"] = json!({"grafanaDependency": ">=9.2.0 <11"});
    write_plugin(&fx.root("external").join("current"), manifest);

    let registry = Arc::new(Registry::new());
    let loader = fx
        .loader(dev_mode(), Arc::clone(&registry))
        .with_host_version(Some(Version::new(10, 4, 0)));
    let report = loader.load(&fx.roots()).await;

    assert!(matches!(
        report.errors.get("future-panel"),
        Some(PluginError::IncompatibleHostVersion { .. })
    ));
    assert!(!registry.contains("future-panel"));
    assert!(registry.plugin("current-panel").is_some());
}

#[tokio::test]
async fn test_backend_plugins_get_a_managed_client() {
    let fx = Fixture::new();
    let mut manifest = plugin_json("acme-datasource", "datasource");
    manifest["backend"] = json!(true);
    manifest["executable"] = json!("gpx_acme");
    write_plugin(&fx.root("external").join("ds"), manifest);
    write_plugin(&fx.root("external").join("panel"), plugin_json("acme-panel", "panel"));

    let registry = Arc::new(Registry::new());
    let loader = fx.loader(dev_mode(), Arc::clone(&registry));
    loader.load(&fx.roots()).await;

    assert!(registry.plugin("acme-datasource").unwrap().is_managed());
    assert!(!registry.plugin("acme-panel").unwrap().is_managed());

    let datasources = registry.plugins(&[PluginType::DataSource]);
    assert_eq!(datasources.len(), 1);
}

#[tokio::test]
async fn test_plugin_outside_roots_is_unknown_class() {
    let fx = Fixture::new();
    let elsewhere = fx.temp.path().join("elsewhere");
    write_plugin(&elsewhere.join("stray"), plugin_json("stray-panel", "panel"));

    let registry = Arc::new(Registry::new());
    let loader = fx.loader(SignaturePolicy::strict(), Arc::clone(&registry));
    let report = loader.load(&[elsewhere]).await;

    let stray = registry.plugin("stray-panel").unwrap();
    assert_eq!(stray.class(), Class::Unknown);
    assert!(report.errors.contains_key("stray-panel"));
}

#[tokio::test]
async fn test_missing_root_is_tolerated() {
    let fx = Fixture::new();
    write_plugin(&fx.root("external").join("acme"), plugin_json("acme-panel", "panel"));

    let registry = Arc::new(Registry::new());
    let loader = fx.loader(dev_mode(), registry);
    let mut roots = fx.roots();
    roots.push(fx.temp.path().join("does-not-exist"));

    let report = loader.load(&roots).await;
    assert_eq!(report.plugins.len(), 1);
    assert!(report.is_clean());
}
