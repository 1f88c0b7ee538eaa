//! Multipart Response Framing
//!
//! Wraps a manifest or directive into the `multipart/mixed` body of the
//! Expo Updates protocol, together with the protocol response headers.

use std::collections::BTreeMap;
use uuid::Uuid;

use super::signing::SIGNATURE_HEADER;
use super::ProtocolVersion;

pub const PROTOCOL_VERSION_HEADER: &str = "expo-protocol-version";
pub const SFV_VERSION_HEADER: &str = "expo-sfv-version";

const SIGNED_PART_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const EXTENSIONS_CONTENT_TYPE: &str = "application/json";

/// One named part of a multipart body.
#[derive(Debug, Clone)]
pub struct Part {
    pub name: String,
    pub content_type: String,
    pub signature: Option<String>,
    pub body: String,
}

/// Status, headers and bytes ready to hand to the HTTP layer.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub parts: Vec<Part>,
    pub boundary: String,
    pub body: Vec<u8>,
}

impl WireResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn part(&self, name: &str) -> Option<&Part> {
        self.parts.iter().find(|part| part.name == name)
    }
}

fn generate_boundary() -> String {
    format!("----------------------------{}", Uuid::new_v4().simple())
}

fn encode_parts(boundary: &str, parts: &[Part]) -> Vec<u8> {
    let mut body = String::new();
    for part in parts {
        body.push_str(&format!("--{boundary}\r\n"));
        body.push_str(&format!(
            "content-disposition: form-data; name=\"{}\"\r\n",
            part.name
        ));
        body.push_str(&format!("content-type: {}\r\n", part.content_type));
        if let Some(signature) = &part.signature {
            body.push_str(&format!("{SIGNATURE_HEADER}: {signature}\r\n"));
        }
        body.push_str("\r\n");
        body.push_str(&part.body);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{boundary}--\r\n"));
    body.into_bytes()
}

fn frame(protocol_version: ProtocolVersion, parts: Vec<Part>) -> WireResponse {
    let boundary = generate_boundary();
    let body = encode_parts(&boundary, &parts);
    let headers = vec![
        (
            PROTOCOL_VERSION_HEADER.to_string(),
            protocol_version.as_u8().to_string(),
        ),
        (SFV_VERSION_HEADER.to_string(), "0".to_string()),
        ("cache-control".to_string(), "private, max-age=0".to_string()),
        (
            "content-type".to_string(),
            format!("multipart/mixed; boundary={boundary}"),
        ),
    ];
    WireResponse {
        status: 200,
        headers,
        parts,
        boundary,
        body,
    }
}

/// `extensions` part body: `{"assetRequestHeaders": {<asset key>: {...}}}`.
pub fn extensions_json<'a>(
    asset_keys: impl IntoIterator<Item = &'a str>,
    headers: &BTreeMap<String, String>,
) -> String {
    let request_headers: serde_json::Map<String, serde_json::Value> = asset_keys
        .into_iter()
        .map(|key| (key.to_string(), serde_json::json!(headers)))
        .collect();
    serde_json::json!({ "assetRequestHeaders": request_headers }).to_string()
}

/// `manifest` part (the exact signed JSON) followed by `extensions`.
pub fn frame_manifest(
    protocol_version: ProtocolVersion,
    manifest_json: String,
    signature: Option<String>,
    extensions_json: String,
) -> WireResponse {
    frame(
        protocol_version,
        vec![
            Part {
                name: "manifest".to_string(),
                content_type: SIGNED_PART_CONTENT_TYPE.to_string(),
                signature,
                body: manifest_json,
            },
            Part {
                name: "extensions".to_string(),
                content_type: EXTENSIONS_CONTENT_TYPE.to_string(),
                signature: None,
                body: extensions_json,
            },
        ],
    )
}

/// A lone `directive` part. Directives only exist in protocol version 1.
pub fn frame_directive(directive_json: String, signature: Option<String>) -> WireResponse {
    frame(
        ProtocolVersion::V1,
        vec![Part {
            name: "directive".to_string(),
            content_type: SIGNED_PART_CONTENT_TYPE.to_string(),
            signature,
            body: directive_json,
        }],
    )
}
