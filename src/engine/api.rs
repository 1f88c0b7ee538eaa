//! Updates Server API Module
//! HTTP surface of the Expo Updates protocol with OpenAPI documentation

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use utoipa::OpenApi;

use crate::engine::error::UpdatesError;
use crate::engine::updates::asset::serve_asset;
use crate::engine::updates::multipart::PROTOCOL_VERSION_HEADER;
use crate::engine::updates::{Platform, ProtocolNegotiator, ProtocolVersion, UpdateRequest, WireResponse};

pub const PLATFORM_HEADER: &str = "expo-platform";
pub const RUNTIME_VERSION_HEADER: &str = "expo-runtime-version";
pub const CURRENT_UPDATE_ID_HEADER: &str = "expo-current-update-id";
pub const EMBEDDED_UPDATE_ID_HEADER: &str = "expo-embedded-update-id";
pub const EXPECT_SIGNATURE_HEADER: &str = "expo-expect-signature";

#[derive(Clone)]
pub struct ApiState {
    pub negotiator: Arc<ProtocolNegotiator>,
}

#[derive(OpenApi)]
#[openapi(
    paths(get_manifest, get_asset),
    tags(
        (name = "updates", description = "Expo Updates protocol"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/manifest", get(get_manifest))
        .route("/assets", get(get_asset))
        .route("/openapi.json", get(openapi_json))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for UpdatesError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(json!({ "msg": self.to_string() }))).into_response()
    }
}

fn into_http_response(wire: WireResponse) -> Response {
    let mut builder = Response::builder().status(wire.status);
    for (name, value) in &wire.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(Body::from(wire.body)).unwrap_or_else(|e| {
        error!(error = %e, "invalid multipart response");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "hello": "world" }))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[derive(Debug, Default, Deserialize)]
pub struct ManifestQuery {
    platform: Option<String>,
    #[serde(rename = "runtime-version")]
    runtime_version: Option<String>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Collect the protocol inputs from headers, falling back to the query string.
pub fn update_request_from(
    headers: &HeaderMap,
    query: &ManifestQuery,
) -> Result<UpdateRequest, UpdatesError> {
    if headers.get_all(PROTOCOL_VERSION_HEADER).iter().count() > 1 {
        return Err(UpdatesError::InvalidRequest(
            "Unsupported protocol version. Expected either 0 or 1.".to_string(),
        ));
    }
    let protocol_version =
        ProtocolVersion::from_header(header_str(headers, PROTOCOL_VERSION_HEADER))?;

    let platform: Platform = header_str(headers, PLATFORM_HEADER)
        .or(query.platform.as_deref())
        .unwrap_or_default()
        .parse()?;

    let runtime_version = header_str(headers, RUNTIME_VERSION_HEADER)
        .or(query.runtime_version.as_deref())
        .filter(|rv| !rv.is_empty())
        .ok_or_else(|| UpdatesError::InvalidRequest("No runtimeVersion provided.".to_string()))?;

    Ok(UpdateRequest {
        runtime_version: runtime_version.to_string(),
        platform,
        protocol_version,
        current_update_id: header_str(headers, CURRENT_UPDATE_ID_HEADER).map(str::to_string),
        embedded_update_id: header_str(headers, EMBEDDED_UPDATE_ID_HEADER).map(str::to_string),
        expect_signature: header_str(headers, EXPECT_SIGNATURE_HEADER)
            .is_some_and(|value| !value.is_empty()),
    })
}

#[utoipa::path(
    get,
    path = "/manifest",
    params(
        ("expo-protocol-version" = Option<u8>, Header, description = "Protocol version, 0 or 1"),
        ("expo-platform" = Option<String>, Header, description = "ios or android"),
        ("expo-runtime-version" = Option<String>, Header, description = "Runtime version"),
        ("expo-current-update-id" = Option<String>, Header, description = "Currently running update"),
        ("expo-embedded-update-id" = Option<String>, Header, description = "Update embedded in the build"),
        ("expo-expect-signature" = Option<String>, Header, description = "Request a code signature"),
        ("platform" = Option<String>, Query, description = "Platform fallback"),
        ("runtime-version" = Option<String>, Query, description = "Runtime version fallback"),
    ),
    responses(
        (status = 200, description = "multipart/mixed manifest or directive"),
        (status = 400, description = "Invalid request", body = serde_json::Value),
        (status = 404, description = "No update for this runtime version", body = serde_json::Value),
    ),
    tag = "updates"
)]
async fn get_manifest(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ManifestQuery>,
) -> Result<Response, UpdatesError> {
    let request = update_request_from(&headers, &query)?;
    let wire = state.negotiator.respond(&request).await?;
    Ok(into_http_response(wire))
}

#[derive(Debug, Default, Deserialize)]
pub struct AssetQuery {
    asset: Option<String>,
    #[serde(rename = "runtimeVersion")]
    runtime_version: Option<String>,
    platform: Option<String>,
}

#[utoipa::path(
    get,
    path = "/assets",
    params(
        ("asset" = String, Query, description = "Asset path as listed in the manifest"),
        ("runtimeVersion" = String, Query, description = "Runtime version"),
        ("platform" = String, Query, description = "ios or android"),
    ),
    responses(
        (status = 200, description = "Asset bytes"),
        (status = 400, description = "Invalid request", body = serde_json::Value),
        (status = 404, description = "Asset not found", body = serde_json::Value),
    ),
    tag = "updates"
)]
async fn get_asset(
    State(state): State<ApiState>,
    Query(query): Query<AssetQuery>,
) -> Result<Response, UpdatesError> {
    let asset = query
        .asset
        .as_deref()
        .filter(|asset| !asset.is_empty())
        .ok_or_else(|| UpdatesError::InvalidRequest("No asset name provided.".to_string()))?;

    let platform: Platform = query
        .platform
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|_| {
            UpdatesError::InvalidRequest(
                "No platform provided. Expected \"ios\" or \"android\".".to_string(),
            )
        })?;

    let runtime_version = query
        .runtime_version
        .as_deref()
        .filter(|rv| !rv.is_empty())
        .ok_or_else(|| UpdatesError::InvalidRequest("No runtimeVersion provided.".to_string()))?;

    let served = serve_asset(
        state.negotiator.resolver(),
        asset,
        runtime_version,
        platform,
    )
    .await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, served.content_type)],
        served.bytes,
    )
        .into_response())
}
