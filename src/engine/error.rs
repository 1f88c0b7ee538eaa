//! Updates Error Types

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdatesError {
    #[error("Unsupported runtime version: {0}")]
    UnsupportedRuntimeVersion(String),

    #[error("No published update for runtime version: {0}")]
    NoPublishedBundle(String),

    #[error("No update found with runtime version: {runtime_version}. Error: {reason}")]
    MetadataNotFound {
        runtime_version: String,
        reason: String,
    },

    #[error("No expo config json found with runtime version: {runtime_version}. Error: {reason}")]
    ExpoConfigNotFound {
        runtime_version: String,
        reason: String,
    },

    #[error("Update metadata has no entry for platform: {0}")]
    PlatformMetadataMissing(String),

    #[error("No rollback found in {0}")]
    RollbackMarkerMissing(PathBuf),

    #[error("Invalid Expo-Embedded-Update-ID request header specified.")]
    MissingEmbeddedUpdateIdHeader,

    #[error("Rollbacks not supported on protocol version 0")]
    RollbackUnsupportedInProtocol0,

    #[error("Code signing requested but no key supplied when starting server.")]
    SigningKeyMissing,

    #[error("Code signing failed: {0}")]
    Signing(String),

    #[error("Asset \"{0}\" does not exist.")]
    AssetNotFound(String),

    #[error("Failed to read asset {path}: {source}")]
    AssetReadFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UpdatesError {
    /// HTTP status the error surfaces as at the request boundary.
    pub fn status(&self) -> u16 {
        match self {
            Self::UnsupportedRuntimeVersion(_)
            | Self::NoPublishedBundle(_)
            | Self::MetadataNotFound { .. }
            | Self::ExpoConfigNotFound { .. }
            | Self::PlatformMetadataMissing(_)
            | Self::RollbackMarkerMissing(_)
            | Self::AssetNotFound(_) => 404,
            Self::MissingEmbeddedUpdateIdHeader
            | Self::RollbackUnsupportedInProtocol0
            | Self::SigningKeyMissing
            | Self::InvalidRequest(_) => 400,
            Self::Signing(_) | Self::AssetReadFailure { .. } | Self::Io(_) | Self::Json(_) => 500,
        }
    }

    /// Classify a read failure of a file the bundle metadata points at.
    pub(crate) fn from_asset_read(path: PathBuf, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::AssetNotFound(path.display().to_string())
        } else {
            Self::AssetReadFailure { path, source }
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdatesError>;
