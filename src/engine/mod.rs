// Expo Updates Server Engine - Core module structure
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod updates;

pub use config::ServerConfig;
pub use error::UpdatesError;
pub use updates::ProtocolNegotiator;
