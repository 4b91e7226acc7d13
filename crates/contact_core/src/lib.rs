//! Core domain logic for contact identity resolution.
//! This crate is the single source of truth for clustering invariants.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use logging::{default_log_level, init_logging, logging_status};
pub use model::contact::{
    Contact, ContactId, ContactValidationError, LinkPrecedence, NewContact, Observation,
};
pub use repo::contact_repo::{
    ContactStore, MatchLookup, RepoError, RepoResult, SqliteContactStore,
};
pub use repo::memory_repo::MemoryContactStore;
pub use service::identify_service::{identify_atomic, IdentifyError, IdentifyService};
pub use service::identity_resolver::{
    resolve, ContactProjection, Resolution, ResolutionKind, ResolveError, StoreMutation,
};

/// Minimal health-check API.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
