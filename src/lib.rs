//! Expo Updates Server - Expo Updates protocol server library
//!
//! Resolves published update bundles, builds signed manifests and directives,
//! and frames them as multipart protocol responses.

pub mod engine;
