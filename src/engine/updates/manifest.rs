//! Update Manifest
//!
//! Builds the manifest served to clients that should download a new update.

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use uuid::Uuid;

use super::asset::{build_asset_metadata, AssetContext, AssetMetadata, AssetSource};
use super::bundle::{read_expo_config, MetadataDocument, Platform};
use crate::engine::config::PublicUrl;
use crate::engine::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub id: String,
    pub created_at: String,
    pub runtime_version: String,
    pub assets: Vec<AssetMetadata>,
    pub launch_asset: AssetMetadata,
    pub metadata: ManifestMetadata,
    pub extra: ManifestExtra,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestMetadata {
    pub update_timestamp: String,
    pub update_relative_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestExtra {
    pub expo_client: serde_json::Value,
}

/// Update id derived from the exact bytes of `metadata.json`.
///
/// The first 32 hex digits of the sha256 digest, grouped 8-4-4-4-12.
pub fn manifest_id(metadata_bytes: &[u8]) -> String {
    let digest = Sha256::digest(metadata_bytes);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).hyphenated().to_string()
}

impl Manifest {
    /// Every asset the client downloads, launch asset last.
    pub fn all_assets(&self) -> impl Iterator<Item = &AssetMetadata> {
        self.assets.iter().chain(std::iter::once(&self.launch_asset))
    }
}

fn path_segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

pub async fn build_manifest(
    bundle_path: &Path,
    document: &MetadataDocument,
    runtime_version: &str,
    platform: Platform,
    public_url: &PublicUrl,
) -> Result<Manifest> {
    let expo_client = read_expo_config(bundle_path, runtime_version).await?;
    let platform_metadata = document.metadata.for_platform(platform)?;

    let ctx = AssetContext {
        runtime_version,
        platform,
        public_url,
    };

    let assets = try_join_all(platform_metadata.assets.iter().map(|entry| {
        build_asset_metadata(
            AssetSource {
                bundle_path,
                relative_path: &entry.path,
                ext: entry.ext.as_deref(),
                is_launch_asset: false,
            },
            &ctx,
        )
    }))
    .await?;

    let launch_asset = build_asset_metadata(
        AssetSource {
            bundle_path,
            relative_path: &platform_metadata.bundle,
            ext: None,
            is_launch_asset: true,
        },
        &ctx,
    )
    .await?;

    let segments = path_segments(bundle_path);
    let update_timestamp = segments.last().cloned().unwrap_or_default();
    let update_relative_path = segments[segments.len().saturating_sub(3)..].join("/");

    Ok(Manifest {
        id: document.id.clone(),
        created_at: document.created_at.clone(),
        runtime_version: runtime_version.to_string(),
        assets,
        launch_asset,
        metadata: ManifestMetadata {
            update_timestamp,
            update_relative_path,
        },
        extra: ManifestExtra { expo_client },
    })
}
