//! Devgate - a local development server with path-prefix proxying
//!
//! This library provides a small dev server that:
//! - Serves frontend assets from a configured root directory
//! - Forwards requests under configured path prefixes to a backend origin
//! - Optionally rewrites the outbound Host header to match the target
//! - Tunnels WebSocket upgrades for routes that opt in
//! - Applies named plugins (CORS, cache control) to the static pipeline
//! - Uses connection pooling for efficient target communication

pub mod assets;
pub mod config;
pub mod error;
pub mod plugin;
pub mod pool;
pub mod router;
pub mod server;

/// Package name, for the startup banner
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
/// Package version, for the startup banner
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
