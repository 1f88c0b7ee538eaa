//! Update Bundle Resolution
//!
//! Locates the bundle directory to serve for a runtime version, classifies it,
//! and reads the per-bundle documents (`metadata.json`, `expoConfig.json`).

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;
use tokio::fs;
use tracing::debug;

use super::manifest::manifest_id;
use crate::engine::error::{Result, UpdatesError};

pub const METADATA_FILE: &str = "metadata.json";
pub const EXPO_CONFIG_FILE: &str = "expoConfig.json";
pub const ROLLBACK_MARKER: &str = "rollback";

/// Client platform, as sent in `expo-platform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Android => "android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = UpdatesError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ios" => Ok(Self::Ios),
            "android" => Ok(Self::Android),
            _ => Err(UpdatesError::InvalidRequest(
                "Unsupported platform. Expected either ios or android.".to_string(),
            )),
        }
    }
}

/// Finds the bundle directory to serve for a runtime version.
///
/// Kept narrow so an index-backed lookup can replace the directory scan.
#[async_trait]
pub trait BundleResolver: Send + Sync {
    async fn resolve_latest_bundle(&self, runtime_version: &str) -> Result<PathBuf>;
}

/// Scans `<updates_dir>/<runtimeVersion>/` on every call.
#[derive(Debug, Clone)]
pub struct FsBundleResolver {
    updates_dir: PathBuf,
}

impl FsBundleResolver {
    pub fn new(updates_dir: impl Into<PathBuf>) -> Self {
        Self {
            updates_dir: updates_dir.into(),
        }
    }
}

#[async_trait]
impl BundleResolver for FsBundleResolver {
    async fn resolve_latest_bundle(&self, runtime_version: &str) -> Result<PathBuf> {
        if !is_single_segment(runtime_version) {
            return Err(UpdatesError::UnsupportedRuntimeVersion(
                runtime_version.to_string(),
            ));
        }

        let runtime_dir = self.updates_dir.join(runtime_version);
        if !is_directory(&runtime_dir).await {
            return Err(UpdatesError::UnsupportedRuntimeVersion(
                runtime_version.to_string(),
            ));
        }

        let mut entries = fs::read_dir(&runtime_dir).await?;
        let mut directories = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            // stat rather than the entry's file type so symlinked bundles count
            let path = entry.path();
            match fs::metadata(&path).await {
                Ok(metadata) if metadata.is_dir() => {
                    directories.push(entry.file_name().to_string_lossy().into_owned());
                }
                Ok(_) => {}
                Err(e) => debug!(entry = %path.display(), error = %e, "skipping unreadable entry"),
            }
        }
        directories.sort();

        let latest = select_latest(&directories)
            .ok_or_else(|| UpdatesError::NoPublishedBundle(runtime_version.to_string()))?;
        debug!(runtime_version, bundle = latest, "resolved latest bundle");
        Ok(runtime_dir.join(latest))
    }
}

async fn is_directory(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|metadata| metadata.is_dir())
        .unwrap_or(false)
}

fn is_single_segment(value: &str) -> bool {
    let mut components = Path::new(value).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Digits of a directory name, in order. Empty when it has none.
pub fn bundle_sort_key(name: &str) -> String {
    name.chars().filter(char::is_ascii_digit).collect()
}

/// Numeric comparison of two sort keys of arbitrary length.
fn compare_sort_keys(a: &str, b: &str) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => {
            let a = a.trim_start_matches('0');
            let b = b.trim_start_matches('0');
            a.len().cmp(&b.len()).then_with(|| a.cmp(b))
        }
    }
}

/// Pick the name with the numerically largest sort key; the earliest name wins ties.
pub fn select_latest(names: &[String]) -> Option<&str> {
    let mut best: Option<(&str, String)> = None;
    for name in names {
        let key = bundle_sort_key(name);
        let replace = match &best {
            None => true,
            Some((_, best_key)) => compare_sort_keys(&key, best_key) == Ordering::Greater,
        };
        if replace {
            best = Some((name.as_str(), key));
        }
    }
    best.map(|(name, _)| name)
}

/// Label a resolved bundle as a normal update or a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateType {
    NormalUpdate,
    Rollback,
}

pub async fn classify_bundle(bundle_path: &Path) -> Result<UpdateType> {
    let mut entries = fs::read_dir(bundle_path).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name() == ROLLBACK_MARKER {
            debug!(bundle = %bundle_path.display(), "bundle is a rollback");
            return Ok(UpdateType::Rollback);
        }
    }
    Ok(UpdateType::NormalUpdate)
}

/// `metadata.json` as written by `expo export`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    pub file_metadata: HashMap<String, PlatformFileMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformFileMetadata {
    /// Launch bundle, relative to the bundle directory
    pub bundle: String,
    #[serde(default)]
    pub assets: Vec<AssetEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetEntry {
    pub path: String,
    #[serde(default)]
    pub ext: Option<String>,
}

impl BundleMetadata {
    pub fn for_platform(&self, platform: Platform) -> Result<&PlatformFileMetadata> {
        self.file_metadata
            .get(platform.as_str())
            .ok_or_else(|| UpdatesError::PlatformMetadataMissing(platform.to_string()))
    }
}

/// A parsed `metadata.json` plus the values derived from its bytes.
#[derive(Debug, Clone)]
pub struct MetadataDocument {
    pub metadata: BundleMetadata,
    pub created_at: String,
    /// UUID-formatted sha256 of the exact file bytes
    pub id: String,
}

pub async fn read_metadata(bundle_path: &Path, runtime_version: &str) -> Result<MetadataDocument> {
    let metadata_path = bundle_path.join(METADATA_FILE);
    let not_found = |reason: String| UpdatesError::MetadataNotFound {
        runtime_version: runtime_version.to_string(),
        reason,
    };

    let bytes = fs::read(&metadata_path)
        .await
        .map_err(|e| not_found(e.to_string()))?;
    let metadata: BundleMetadata =
        serde_json::from_slice(&bytes).map_err(|e| not_found(e.to_string()))?;
    let created_at = created_at(&metadata_path)
        .await
        .map_err(|e| not_found(e.to_string()))?;

    Ok(MetadataDocument {
        metadata,
        created_at,
        id: manifest_id(&bytes),
    })
}

/// The exported app config, embedded verbatim under `extra.expoClient`.
pub async fn read_expo_config(
    bundle_path: &Path,
    runtime_version: &str,
) -> Result<serde_json::Value> {
    let not_found = |reason: String| UpdatesError::ExpoConfigNotFound {
        runtime_version: runtime_version.to_string(),
        reason,
    };
    let bytes = fs::read(bundle_path.join(EXPO_CONFIG_FILE))
        .await
        .map_err(|e| not_found(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| not_found(e.to_string()))
}

/// Creation time of a file as millisecond-precision UTC ISO-8601.
///
/// Falls back to the modification time on filesystems without birth time.
pub(crate) async fn created_at(path: &Path) -> io::Result<String> {
    let metadata = fs::metadata(path).await?;
    let time = metadata.created().or_else(|_| metadata.modified())?;
    Ok(iso_timestamp(time))
}

pub(crate) fn iso_timestamp(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true)
}
