use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use expo_updates_server::engine::api::{create_router, ApiState};
use expo_updates_server::engine::config::ServerConfig;
use expo_updates_server::engine::updates::manifest::manifest_id;
use expo_updates_server::engine::updates::{CodeSigner, FsBundleResolver, ProtocolNegotiator};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::Verifier;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower::ServiceExt;

const TEST_KEY: &str = include_str!("fixtures/private-key.pem");
const METADATA: &str = r#"{"version":0,"bundler":"metro","fileMetadata":{"ios":{"bundle":"bundles/ios-abc.js","assets":[{"path":"assets/4f1cb2cac2370cd5050681232e8575a8","ext":"png"}]},"android":{"bundle":"bundles/android-def.js","assets":[]}}}"#;

struct Fixture {
    _root: tempfile::TempDir,
    updates_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let updates_dir = root.path().join("updates");
        std::fs::create_dir_all(&updates_dir).unwrap();
        Self {
            _root: root,
            updates_dir,
        }
    }

    fn publish(&self, runtime_version: &str, name: &str) -> PathBuf {
        let bundle = self.updates_dir.join(runtime_version).join(name);
        std::fs::create_dir_all(bundle.join("bundles")).unwrap();
        std::fs::create_dir_all(bundle.join("assets")).unwrap();
        std::fs::write(bundle.join("metadata.json"), METADATA).unwrap();
        std::fs::write(
            bundle.join("expoConfig.json"),
            r#"{"name":"updates-demo","slug":"updates-demo","runtimeVersion":"1"}"#,
        )
        .unwrap();
        std::fs::write(bundle.join("bundles/ios-abc.js"), b"var launch = 'ios';").unwrap();
        std::fs::write(bundle.join("bundles/android-def.js"), b"var launch = 'android';").unwrap();
        std::fs::write(
            bundle.join("assets/4f1cb2cac2370cd5050681232e8575a8"),
            b"\x89PNG fake image",
        )
        .unwrap();
        bundle
    }

    fn publish_rollback(&self, runtime_version: &str, name: &str) {
        let bundle = self.updates_dir.join(runtime_version).join(name);
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(bundle.join("rollback"), b"").unwrap();
    }

    fn router(&self, signed: bool) -> Router {
        let mut config = ServerConfig {
            updates_dir: self.updates_dir.clone(),
            ..ServerConfig::default()
        };
        config.public_url.port = Some(3000);
        config
            .asset_request_headers
            .insert("test-header".to_string(), "test-header-value".to_string());

        let signer = signed.then(|| Arc::new(CodeSigner::from_pem(TEST_KEY).unwrap()));
        let resolver = Arc::new(FsBundleResolver::new(&self.updates_dir));
        create_router(ApiState {
            negotiator: Arc::new(ProtocolNegotiator::new(resolver, &config, signer)),
        })
    }
}

struct ParsedPart {
    headers: Vec<(String, String)>,
    body: String,
}

impl ParsedPart {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn name(&self) -> &str {
        self.header("content-disposition")
            .and_then(|value| value.split("name=\"").nth(1))
            .and_then(|rest| rest.split('"').next())
            .unwrap_or_default()
    }
}

struct Reply {
    status: StatusCode,
    headers: axum::http::HeaderMap,
    body: Vec<u8>,
}

impl Reply {
    fn header(&self, name: &str) -> &str {
        self.headers.get(name).unwrap().to_str().unwrap()
    }

    fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    fn parts(&self) -> Vec<ParsedPart> {
        let boundary = self
            .header("content-type")
            .strip_prefix("multipart/mixed; boundary=")
            .unwrap()
            .to_string();
        let body = String::from_utf8(self.body.clone()).unwrap();
        body.split(&format!("--{boundary}"))
            .filter(|segment| !segment.is_empty() && !segment.starts_with("--"))
            .map(|segment| {
                let segment = segment.trim_start_matches("\r\n");
                let (head, body) = segment.split_once("\r\n\r\n").unwrap();
                let headers = head
                    .lines()
                    .filter_map(|line| line.split_once(": "))
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                ParsedPart {
                    headers,
                    body: body.strip_suffix("\r\n").unwrap_or(body).to_string(),
                }
            })
            .collect()
    }
}

async fn send(router: Router, uri: &str, headers: &[(&str, &str)]) -> Reply {
    let mut request = Request::builder().uri(uri);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = router
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec();
    Reply {
        status,
        headers,
        body,
    }
}

fn verify(body: &str, signature_header: &str) -> bool {
    let private_key = RsaPrivateKey::from_pkcs8_pem(TEST_KEY).unwrap();
    let verifying_key = VerifyingKey::<Sha256>::new(RsaPublicKey::from(&private_key));
    let sig = signature_header
        .strip_prefix("sig=\"")
        .and_then(|rest| rest.split('"').next())
        .unwrap();
    let raw = STANDARD.decode(sig).unwrap();
    let signature = Signature::try_from(raw.as_slice()).unwrap();
    verifying_key.verify(body.as_bytes(), &signature).is_ok()
}

fn asset_path(url: &str) -> &str {
    url.strip_prefix("http://localhost:3000").unwrap()
}

#[tokio::test]
async fn test_root() {
    let fixture = Fixture::new();
    let reply = send(fixture.router(false), "/", &[]).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["hello"], "world");
}

#[tokio::test]
async fn test_manifest_protocol_0() {
    let fixture = Fixture::new();
    let bundle = fixture.publish("1", "1700000000000");
    fixture.publish("1", "1699999999999");

    let reply = send(
        fixture.router(false),
        "/manifest",
        &[("expo-platform", "ios"), ("expo-runtime-version", "1")],
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("expo-protocol-version"), "0");
    assert_eq!(reply.header("expo-sfv-version"), "0");
    assert_eq!(reply.header("cache-control"), "private, max-age=0");

    let parts = reply.parts();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].name(), "manifest");
    assert_eq!(parts[0].header("content-type"), Some("application/json; charset=utf-8"));
    assert!(parts[0].header("expo-signature").is_none());
    assert_eq!(parts[1].name(), "extensions");
    assert_eq!(parts[1].header("content-type"), Some("application/json"));

    let manifest: serde_json::Value = serde_json::from_str(&parts[0].body).unwrap();
    assert_eq!(manifest["id"], manifest_id(METADATA.as_bytes()));
    assert_eq!(manifest["runtimeVersion"], "1");
    assert_eq!(manifest["metadata"]["updateTimestamp"], "1700000000000");
    assert_eq!(manifest["metadata"]["updateRelativePath"], "updates/1/1700000000000");
    assert_eq!(manifest["extra"]["expoClient"]["slug"], "updates-demo");
    assert_eq!(manifest["launchAsset"]["fileExtension"], ".bundle");
    assert_eq!(manifest["launchAsset"]["contentType"], "application/javascript");
    assert_eq!(manifest["assets"][0]["contentType"], "image/png");
    assert_eq!(
        manifest["launchAsset"]["url"],
        format!(
            "http://localhost:3000/assets?asset={}/bundles/ios-abc.js&runtimeVersion=1&platform=ios",
            bundle.display()
        )
    );

    let extensions: serde_json::Value = serde_json::from_str(&parts[1].body).unwrap();
    let key = manifest["launchAsset"]["key"].as_str().unwrap();
    assert_eq!(
        extensions["assetRequestHeaders"][key]["test-header"],
        "test-header-value"
    );
}

#[tokio::test]
async fn test_manifest_query_fallback() {
    let fixture = Fixture::new();
    fixture.publish("1", "1700000000000");

    let reply = send(
        fixture.router(false),
        "/manifest?platform=android&runtime-version=1",
        &[],
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    let parts = reply.parts();
    let manifest: serde_json::Value = serde_json::from_str(&parts[0].body).unwrap();
    assert_eq!(manifest["assets"].as_array().unwrap().len(), 0);
    assert!(manifest["launchAsset"]["url"]
        .as_str()
        .unwrap()
        .ends_with("bundles/android-def.js&runtimeVersion=1&platform=android"));
}

#[tokio::test]
async fn test_signed_manifest_verifies() {
    let fixture = Fixture::new();
    fixture.publish("1", "1700000000000");

    let reply = send(
        fixture.router(true),
        "/manifest",
        &[
            ("expo-protocol-version", "1"),
            ("expo-platform", "ios"),
            ("expo-runtime-version", "1"),
            ("expo-expect-signature", "sig, keyid=\"main\", alg=\"rsa-v1_5-sha256\""),
        ],
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("expo-protocol-version"), "1");
    let parts = reply.parts();
    let signature = parts[0].header("expo-signature").unwrap();
    assert!(signature.ends_with(", keyid=\"main\""));
    assert!(verify(&parts[0].body, signature));
    assert!(parts[1].header("expo-signature").is_none());
}

#[tokio::test]
async fn test_signature_requested_without_key() {
    let fixture = Fixture::new();
    fixture.publish("1", "1700000000000");

    let reply = send(
        fixture.router(false),
        "/manifest",
        &[
            ("expo-platform", "ios"),
            ("expo-runtime-version", "1"),
            ("expo-expect-signature", "sig"),
        ],
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.json()["msg"],
        "Code signing requested but no key supplied when starting server."
    );
}

#[tokio::test]
async fn test_no_update_available_on_protocol_1() {
    let fixture = Fixture::new();
    fixture.publish("1", "1700000000000");
    let current = manifest_id(METADATA.as_bytes());

    let reply = send(
        fixture.router(true),
        "/manifest",
        &[
            ("expo-protocol-version", "1"),
            ("expo-platform", "ios"),
            ("expo-runtime-version", "1"),
            ("expo-current-update-id", current.as_str()),
            ("expo-expect-signature", "sig"),
        ],
    )
    .await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("expo-protocol-version"), "1");
    let parts = reply.parts();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].name(), "directive");
    assert_eq!(parts[0].body, r#"{"type":"noUpdateAvailable"}"#);
    assert!(verify(&parts[0].body, parts[0].header("expo-signature").unwrap()));
}

#[tokio::test]
async fn test_protocol_0_reserves_manifest_on_match() {
    let fixture = Fixture::new();
    fixture.publish("1", "1700000000000");
    let current = manifest_id(METADATA.as_bytes());

    let reply = send(
        fixture.router(false),
        "/manifest",
        &[
            ("expo-protocol-version", "0"),
            ("expo-platform", "ios"),
            ("expo-runtime-version", "1"),
            ("expo-current-update-id", current.as_str()),
        ],
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.parts()[0].name(), "manifest");
}

#[tokio::test]
async fn test_rollback_flow() {
    let fixture = Fixture::new();
    fixture.publish("1", "1699999999999");
    fixture.publish_rollback("1", "1700000000000");

    let reply = send(
        fixture.router(false),
        "/manifest",
        &[
            ("expo-protocol-version", "1"),
            ("expo-platform", "ios"),
            ("expo-runtime-version", "1"),
            ("expo-embedded-update-id", "embedded-id"),
            ("expo-current-update-id", "some-downloaded-update"),
        ],
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("expo-protocol-version"), "1");
    let directive: serde_json::Value = serde_json::from_str(&reply.parts()[0].body).unwrap();
    assert_eq!(directive["type"], "rollBackToEmbedded");
    assert!(directive["parameters"]["commitTime"].as_str().unwrap().ends_with('Z'));

    // already running the embedded update
    let reply = send(
        fixture.router(false),
        "/manifest",
        &[
            ("expo-protocol-version", "1"),
            ("expo-platform", "ios"),
            ("expo-runtime-version", "1"),
            ("expo-embedded-update-id", "embedded-id"),
            ("expo-current-update-id", "embedded-id"),
        ],
    )
    .await;
    assert_eq!(reply.parts()[0].body, r#"{"type":"noUpdateAvailable"}"#);
}

#[tokio::test]
async fn test_rollback_rejections() {
    let fixture = Fixture::new();
    fixture.publish_rollback("1", "1700000000000");

    let reply = send(
        fixture.router(false),
        "/manifest",
        &[("expo-platform", "ios"), ("expo-runtime-version", "1")],
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["msg"], "Rollbacks not supported on protocol version 0");

    let reply = send(
        fixture.router(false),
        "/manifest",
        &[
            ("expo-protocol-version", "1"),
            ("expo-platform", "ios"),
            ("expo-runtime-version", "1"),
        ],
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.json()["msg"],
        "Invalid Expo-Embedded-Update-ID request header specified."
    );
}

#[tokio::test]
async fn test_manifest_request_errors() {
    let fixture = Fixture::new();
    fixture.publish("1", "1700000000000");

    let reply = send(
        fixture.router(false),
        "/manifest",
        &[("expo-platform", "ios"), ("expo-runtime-version", "2")],
    )
    .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert!(reply.json()["msg"].is_string());

    let reply = send(
        fixture.router(false),
        "/manifest",
        &[("expo-platform", "web"), ("expo-runtime-version", "1")],
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = send(
        fixture.router(false),
        "/manifest",
        &[
            ("expo-protocol-version", "3"),
            ("expo-platform", "ios"),
            ("expo-runtime-version", "1"),
        ],
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_assets_served_from_manifest_urls() {
    let fixture = Fixture::new();
    fixture.publish("1", "1700000000000");

    let reply = send(
        fixture.router(false),
        "/manifest",
        &[("expo-platform", "ios"), ("expo-runtime-version", "1")],
    )
    .await;
    let manifest: serde_json::Value = serde_json::from_str(&reply.parts()[0].body).unwrap();

    let launch_url = manifest["launchAsset"]["url"].as_str().unwrap();
    let reply = send(fixture.router(false), asset_path(launch_url), &[]).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("content-type"), "application/javascript");
    assert_eq!(reply.body, b"var launch = 'ios';");

    let image_url = manifest["assets"][0]["url"].as_str().unwrap();
    let reply = send(fixture.router(false), asset_path(image_url), &[]).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("content-type"), "image/png");
}

#[tokio::test]
async fn test_asset_request_errors() {
    let fixture = Fixture::new();
    let bundle = fixture.publish("1", "1700000000000");

    let reply = send(fixture.router(false), "/assets?runtimeVersion=1&platform=ios", &[]).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["msg"], "No asset name provided.");

    let reply = send(fixture.router(false), "/assets?asset=x&runtimeVersion=1", &[]).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let unlisted = format!(
        "/assets?asset={}&runtimeVersion=1&platform=ios",
        Path::new(&bundle).join("expoConfig.json").display()
    );
    let reply = send(fixture.router(false), &unlisted, &[]).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let reply = send(
        fixture.router(false),
        "/assets?asset=/etc/passwd&runtimeVersion=1&platform=ios",
        &[],
    )
    .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_openapi_document() {
    let fixture = Fixture::new();
    let reply = send(fixture.router(false), "/openapi.json", &[]).await;
    assert_eq!(reply.status, StatusCode::OK);
    let doc = reply.json();
    assert!(doc["paths"]["/manifest"].is_object());
    assert!(doc["paths"]["/assets"].is_object());
}

#[cfg(unix)]
#[tokio::test]
async fn test_dangling_entry_does_not_hide_bundle() {
    let fixture = Fixture::new();
    fixture.publish("1", "1700000000000");
    std::os::unix::fs::symlink(
        "/nonexistent/target",
        fixture.updates_dir.join("1").join("stale-link"),
    )
    .unwrap();

    let reply = send(
        fixture.router(false),
        "/manifest",
        &[("expo-platform", "ios"), ("expo-runtime-version", "1")],
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.parts()[0].name(), "manifest");
}

#[tokio::test]
async fn test_runtime_version_file_is_not_found() {
    let fixture = Fixture::new();
    std::fs::write(fixture.updates_dir.join("7"), b"not a directory").unwrap();

    let reply = send(
        fixture.router(false),
        "/manifest",
        &[("expo-platform", "ios"), ("expo-runtime-version", "7")],
    )
    .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.json()["msg"], "Unsupported runtime version: 7");
}
