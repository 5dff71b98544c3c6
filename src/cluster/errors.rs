//! Parsing utilities for Redis error responses.
//!
//! Redis Cluster uses special error responses for redirects and node state:
//! - `MOVED <slot> <host>:<port>` - Permanent redirect
//! - `ASK <slot> <host>:<port>` - Temporary redirect during migration
//! - `LOADING` - Node is loading its dataset, retry later
//! - `CLUSTERDOWN` - Cluster is unavailable
//!
//! The dispatch engine feeds every error reply through [`parse_redis_error`]
//! so redirects and loading states are classified before retry handling.

use crate::Error;

/// Parses a Redis error message and converts known prefixes to typed errors.
///
/// # Arguments
///
/// * `error_msg` - The error message bytes from Redis (e.g., b"MOVED 3999 127.0.0.1:7000")
///
/// # Returns
///
/// - `Error::Moved` for MOVED redirects
/// - `Error::Ask` for ASK redirects
/// - `Error::Loading` for LOADING errors
/// - `Error::ClusterDown` for CLUSTERDOWN errors
/// - `Error::CrossSlot` for CROSSSLOT errors
/// - `Error::Server` for other errors
pub fn parse_redis_error(error_msg: &[u8]) -> Error {
    let msg = String::from_utf8_lossy(error_msg);
    let msg = msg.trim();

    // Check for MOVED redirect
    if let Some(stripped) = msg.strip_prefix("MOVED ") {
        if let Some((slot, address)) = parse_redirect(stripped) {
            return Error::Moved { slot, address };
        }
    }

    // Check for ASK redirect
    if let Some(stripped) = msg.strip_prefix("ASK ") {
        if let Some((slot, address)) = parse_redirect(stripped) {
            return Error::Ask { slot, address };
        }
    }

    // Check for LOADING
    if msg.starts_with("LOADING") {
        return Error::Loading;
    }

    // Check for CLUSTERDOWN
    if msg.starts_with("CLUSTERDOWN") {
        return Error::ClusterDown;
    }

    // Check for CROSSSLOT
    if msg.contains("CROSSSLOT") {
        return Error::CrossSlot;
    }

    // Default: generic server error
    Error::Server {
        message: msg.to_string(),
    }
}

/// Parses redirect arguments: "<slot> <host>:<port>"
fn parse_redirect(args: &str) -> Option<(u16, String)> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    if parts.len() != 2 {
        return None;
    }

    let slot: u16 = parts[0].parse().ok()?;
    let address = parts[1].to_string();

    Some((slot, address))
}
