//! Asset Metadata and Serving
//!
//! Content-addressed metadata for the files a manifest references, and the
//! byte serving behind the URLs embedded in that metadata.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;

use super::bundle::{read_metadata, BundleResolver, Platform};
use crate::engine::config::PublicUrl;
use crate::engine::error::{Result, UpdatesError};

pub const LAUNCH_ASSET_CONTENT_TYPE: &str = "application/javascript";
const LAUNCH_ASSET_EXTENSION: &str = "bundle";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// One entry of a manifest's `assets` list or its `launchAsset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    pub hash: String,
    pub key: String,
    pub file_extension: String,
    /// `null` when the extension has no known MIME type
    pub content_type: Option<String>,
    pub url: String,
}

/// A file inside a bundle, as referenced by `metadata.json`.
#[derive(Debug, Clone, Copy)]
pub struct AssetSource<'a> {
    pub bundle_path: &'a Path,
    pub relative_path: &'a str,
    pub ext: Option<&'a str>,
    pub is_launch_asset: bool,
}

/// Request-scoped values every asset URL is built from.
#[derive(Debug, Clone, Copy)]
pub struct AssetContext<'a> {
    pub runtime_version: &'a str,
    pub platform: Platform,
    pub public_url: &'a PublicUrl,
}

/// URL-safe, unpadded base64 of the sha256 digest.
pub fn content_hash(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(bytes))
}

/// Hex md5 digest, used by clients as the asset's cache key.
pub fn content_key(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

pub fn content_type_for_extension(ext: Option<&str>) -> Option<String> {
    ext.and_then(|ext| mime_guess::from_ext(ext).first_raw())
        .map(str::to_string)
}

fn asset_url(ctx: &AssetContext<'_>, asset_path: &str) -> String {
    format!(
        "{}/assets?asset={}&runtimeVersion={}&platform={}",
        ctx.public_url.origin(),
        asset_path,
        ctx.runtime_version,
        ctx.platform
    )
}

pub async fn build_asset_metadata(
    source: AssetSource<'_>,
    ctx: &AssetContext<'_>,
) -> Result<AssetMetadata> {
    let file_path = source.bundle_path.join(source.relative_path);
    let bytes = fs::read(&file_path)
        .await
        .map_err(|e| UpdatesError::from_asset_read(file_path, e))?;

    let (hash, key) =
        tokio::task::spawn_blocking(move || (content_hash(&bytes), content_key(&bytes)))
            .await
            .map_err(|e| UpdatesError::Io(std::io::Error::other(e)))?;

    let (file_extension, content_type) = if source.is_launch_asset {
        (
            format!(".{LAUNCH_ASSET_EXTENSION}"),
            Some(LAUNCH_ASSET_CONTENT_TYPE.to_string()),
        )
    } else {
        (
            source.ext.map(|ext| format!(".{ext}")).unwrap_or_default(),
            content_type_for_extension(source.ext),
        )
    };

    let asset_path = format!(
        "{}/{}",
        source.bundle_path.display(),
        source.relative_path
    );

    Ok(AssetMetadata {
        hash,
        key,
        file_extension,
        content_type,
        url: asset_url(ctx, &asset_path),
    })
}

/// Bytes and content type of a served asset.
#[derive(Debug, Clone)]
pub struct ServedAsset {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Serve a file of the latest bundle for `runtime_version`.
///
/// Only the platform's launch bundle and its listed assets are reachable;
/// anything else is `AssetNotFound`.
pub async fn serve_asset(
    resolver: &dyn BundleResolver,
    asset: &str,
    runtime_version: &str,
    platform: Platform,
) -> Result<ServedAsset> {
    let bundle_path = resolver.resolve_latest_bundle(runtime_version).await?;
    let document = read_metadata(&bundle_path, runtime_version).await?;
    let platform_metadata = document.metadata.for_platform(platform)?;

    let prefix = format!("{}/", bundle_path.display());
    let not_found = || UpdatesError::AssetNotFound(asset.to_string());
    let relative = asset.strip_prefix(prefix.as_str()).ok_or_else(not_found)?;

    let is_launch_asset = platform_metadata.bundle == relative;
    let entry = platform_metadata
        .assets
        .iter()
        .find(|entry| entry.path == relative);
    if !is_launch_asset && entry.is_none() {
        return Err(not_found());
    }

    let file_path = bundle_path.join(relative);
    let bytes = fs::read(&file_path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => not_found(),
        _ => UpdatesError::AssetReadFailure {
            path: file_path.clone(),
            source: e,
        },
    })?;

    let content_type = if is_launch_asset {
        LAUNCH_ASSET_CONTENT_TYPE.to_string()
    } else {
        content_type_for_extension(entry.and_then(|entry| entry.ext.as_deref()))
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
    };

    Ok(ServedAsset {
        content_type,
        bytes,
    })
}
