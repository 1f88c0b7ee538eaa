//! Expo Updates Protocol
//!
//! Decides what a client asking for an update receives, and frames it.
//!
//! Components:
//! - `bundle` - Bundle resolution, classification and bundle documents
//! - `asset` - Content-addressed asset metadata and asset serving
//! - `manifest` - Manifest construction
//! - `directive` - Rollback / no-update directives
//! - `signing` - RSA-SHA256 code signing
//! - `multipart` - Multipart response framing
//! - `negotiator` - Protocol state machine tying the above together

pub mod asset;
pub mod bundle;
pub mod directive;
pub mod manifest;
pub mod multipart;
pub mod negotiator;
pub mod signing;

use serde::{Deserialize, Serialize};

use crate::engine::error::{Result, UpdatesError};

pub use bundle::{BundleResolver, FsBundleResolver, Platform, UpdateType};
pub use directive::Directive;
pub use manifest::Manifest;
pub use multipart::WireResponse;
pub use negotiator::{BundleReport, Outcome, ProtocolNegotiator, UpdateRequest, UpdateSummary};
pub use signing::CodeSigner;

/// Wire-compatibility level requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Legacy: manifests only
    #[default]
    V0,
    /// Adds directives (rollback, no update available)
    V1,
}

impl ProtocolVersion {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::V0 => 0,
            Self::V1 => 1,
        }
    }

    pub fn supports_directives(&self) -> bool {
        matches!(self, Self::V1)
    }

    /// Parse the `expo-protocol-version` header; absent means 0.
    pub fn from_header(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None => Ok(Self::V0),
            Some(v) => match v.parse::<u8>() {
                Ok(0) => Ok(Self::V0),
                Ok(1) => Ok(Self::V1),
                _ => Err(UpdatesError::InvalidRequest(
                    "Unsupported protocol version. Expected either 0 or 1.".to_string(),
                )),
            },
        }
    }
}
