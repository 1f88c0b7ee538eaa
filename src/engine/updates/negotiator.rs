//! Protocol Negotiator
//!
//! Chooses between serving a manifest, a rollback directive and a
//! no-update-available directive, then signs and frames the result.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

use super::bundle::{classify_bundle, read_metadata, BundleResolver, Platform, UpdateType};
use super::directive::{build_no_update_available, build_rollback, Directive};
use super::manifest::{build_manifest, Manifest};
use super::multipart::{extensions_json, frame_directive, frame_manifest, WireResponse};
use super::signing::{sign_if_requested, CodeSigner};
use super::ProtocolVersion;
use crate::engine::config::{PublicUrl, ServerConfig};
use crate::engine::error::{Result, UpdatesError};

/// The facts a client declares when asking for an update.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub runtime_version: String,
    pub platform: Platform,
    pub protocol_version: ProtocolVersion,
    /// `expo-current-update-id`
    pub current_update_id: Option<String>,
    /// `expo-embedded-update-id`, consulted for rollbacks only
    pub embedded_update_id: Option<String>,
    /// `expo-expect-signature` was present
    pub expect_signature: bool,
}

/// Terminal state of a negotiation. Rejections are the `Err` side.
#[derive(Debug, Clone)]
pub enum Outcome {
    ServingManifest(Manifest),
    ServingRollback(Directive),
    ServingNoUpdateAvailable(Directive),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ServingManifest(_) => "manifest",
            Self::ServingRollback(_) => "rollback",
            Self::ServingNoUpdateAvailable(_) => "no_update_available",
        }
    }
}

/// What a client would be served for a runtime version and platform.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleReport {
    pub runtime_version: String,
    pub platform: Platform,
    pub bundle: PathBuf,
    #[serde(rename = "type")]
    pub update_type: UpdateType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<UpdateSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    pub id: String,
    pub created_at: String,
    /// Launch asset included
    pub asset_count: usize,
    pub total_bytes: u64,
}

pub struct ProtocolNegotiator {
    resolver: Arc<dyn BundleResolver>,
    public_url: PublicUrl,
    asset_request_headers: BTreeMap<String, String>,
    signer: Option<Arc<CodeSigner>>,
}

impl ProtocolNegotiator {
    pub fn new(
        resolver: Arc<dyn BundleResolver>,
        config: &ServerConfig,
        signer: Option<Arc<CodeSigner>>,
    ) -> Self {
        Self {
            resolver,
            public_url: config.public_url.clone(),
            asset_request_headers: config.asset_request_headers.clone(),
            signer,
        }
    }

    pub fn resolver(&self) -> &dyn BundleResolver {
        self.resolver.as_ref()
    }

    pub async fn decide(&self, request: &UpdateRequest) -> Result<Outcome> {
        let runtime_version = request.runtime_version.as_str();
        let bundle_path = self.resolver.resolve_latest_bundle(runtime_version).await?;
        let update_type = classify_bundle(&bundle_path).await?;
        debug!(?update_type, bundle = %bundle_path.display(), "classified bundle");

        match update_type {
            UpdateType::NormalUpdate => {
                let document = read_metadata(&bundle_path, runtime_version).await?;

                // Protocol 0 has no directives: it always gets the full manifest.
                if request.protocol_version.supports_directives()
                    && request.current_update_id.as_deref() == Some(document.id.as_str())
                {
                    return Ok(Outcome::ServingNoUpdateAvailable(build_no_update_available()));
                }

                let manifest = build_manifest(
                    &bundle_path,
                    &document,
                    runtime_version,
                    request.platform,
                    &self.public_url,
                )
                .await?;
                Ok(Outcome::ServingManifest(manifest))
            }
            UpdateType::Rollback => {
                if !request.protocol_version.supports_directives() {
                    return Err(UpdatesError::RollbackUnsupportedInProtocol0);
                }

                let embedded_update_id = request
                    .embedded_update_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .ok_or(UpdatesError::MissingEmbeddedUpdateIdHeader)?;

                if request.current_update_id.as_deref() == Some(embedded_update_id) {
                    return Ok(Outcome::ServingNoUpdateAvailable(build_no_update_available()));
                }

                Ok(Outcome::ServingRollback(build_rollback(&bundle_path).await?))
            }
        }
    }

    /// Run the same reads a request would, without deciding against client state.
    ///
    /// Fails exactly where `/manifest` would: a missing asset or config file is an error.
    pub async fn inspect(&self, runtime_version: &str, platform: Platform) -> Result<BundleReport> {
        let bundle_path = self.resolver.resolve_latest_bundle(runtime_version).await?;
        let update_type = classify_bundle(&bundle_path).await?;

        let update = match update_type {
            UpdateType::Rollback => {
                build_rollback(&bundle_path).await?;
                None
            }
            UpdateType::NormalUpdate => {
                let document = read_metadata(&bundle_path, runtime_version).await?;
                let manifest = build_manifest(
                    &bundle_path,
                    &document,
                    runtime_version,
                    platform,
                    &self.public_url,
                )
                .await?;

                let platform_metadata = document.metadata.for_platform(platform)?;
                let mut total_bytes = 0;
                for relative in platform_metadata
                    .assets
                    .iter()
                    .map(|asset| asset.path.as_str())
                    .chain(std::iter::once(platform_metadata.bundle.as_str()))
                {
                    let path = bundle_path.join(relative);
                    let metadata = fs::metadata(&path)
                        .await
                        .map_err(|e| UpdatesError::from_asset_read(path.clone(), e))?;
                    total_bytes += metadata.len();
                }

                Some(UpdateSummary {
                    asset_count: manifest.all_assets().count(),
                    id: manifest.id,
                    created_at: manifest.created_at,
                    total_bytes,
                })
            }
        };

        Ok(BundleReport {
            runtime_version: runtime_version.to_string(),
            platform,
            bundle: bundle_path,
            update_type,
            update,
        })
    }

    /// Decide, sign when asked to, and frame the multipart response.
    pub async fn respond(&self, request: &UpdateRequest) -> Result<WireResponse> {
        let outcome = self.decide(request).await?;
        info!(
            runtime_version = %request.runtime_version,
            platform = %request.platform,
            outcome = outcome.label(),
            "serving update response"
        );

        match outcome {
            Outcome::ServingManifest(manifest) => {
                // the signed string is the transmitted string
                let manifest_json = serde_json::to_string(&manifest)?;
                let signature = sign_if_requested(
                    self.signer.as_ref(),
                    request.expect_signature,
                    &manifest_json,
                )
                .await?;
                let extensions = extensions_json(
                    manifest.all_assets().map(|asset| asset.key.as_str()),
                    &self.asset_request_headers,
                );
                Ok(frame_manifest(
                    request.protocol_version,
                    manifest_json,
                    signature,
                    extensions,
                ))
            }
            Outcome::ServingRollback(directive) | Outcome::ServingNoUpdateAvailable(directive) => {
                let directive_json = serde_json::to_string(&directive)?;
                let signature = sign_if_requested(
                    self.signer.as_ref(),
                    request.expect_signature,
                    &directive_json,
                )
                .await?;
                Ok(frame_directive(directive_json, signature))
            }
        }
    }
}
