//! Request/response surface for contact identity resolution.
//!
//! Wraps `contact_core` in the envelope an HTTP or RPC layer exposes, so any
//! transport can serve `identify` without touching resolution internals.

mod api;
mod config;

pub use api::{
    contact_cluster, core_version, identify, identify_json, identify_with, init_logging, ping,
    IdentifyEnvelope, IdentifyRequest, IdentifyResponse, IdentifyStatus,
};
pub use config::{configure_db_path, resolve_db_path, DB_FILE_NAME, DB_PATH_ENV};
