//! Protocol Directives
//!
//! Non-update instructions, only meaningful from protocol version 1 on.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::bundle::{created_at, ROLLBACK_MARKER};
use crate::engine::error::{Result, UpdatesError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "parameters", rename_all = "camelCase")]
pub enum Directive {
    #[serde(rename_all = "camelCase")]
    RollBackToEmbedded { commit_time: String },
    NoUpdateAvailable,
}

/// Roll back to the embedded update, committed when the marker was written.
pub async fn build_rollback(bundle_path: &Path) -> Result<Directive> {
    let marker = bundle_path.join(ROLLBACK_MARKER);
    let commit_time = created_at(&marker)
        .await
        .map_err(|_| UpdatesError::RollbackMarkerMissing(bundle_path.to_path_buf()))?;
    Ok(Directive::RollBackToEmbedded { commit_time })
}

pub fn build_no_update_available() -> Directive {
    Directive::NoUpdateAvailable
}
