//! Use-case API for identify calls.
//!
//! # Responsibility
//! - Parse identify requests and map results to a stable response envelope.
//! - Open the configured database and run resolution atomically.
//!
//! # Invariants
//! - Exported functions never panic; every failure becomes an envelope.
//! - Error envelopes carry a zeroed contact payload.
//! - Infrastructure faults are logged once here and never retried.

use crate::config::resolve_db_path;
use contact_core::db::open_db;
use contact_core::logging::LogTarget;
use contact_core::{
    core_version as core_version_inner, identify_atomic, ping as ping_inner, ContactId,
    ContactProjection, IdentifyError, IdentifyService, Observation, SqliteContactStore,
};
use log::{error, warn};
use rusqlite::Connection;
use serde::{Deserialize, Deserializer, Serialize};

/// Minimal health-check API.
pub fn ping() -> String {
    ping_inner().to_owned()
}

/// Core crate version.
pub fn core_version() -> String {
    core_version_inner().to_owned()
}

/// Initializes core logging once per process.
///
/// `log_dir = None` logs to stderr. Returns an empty string on success and
/// the error message otherwise.
pub fn init_logging(level: &str, log_dir: Option<&str>) -> String {
    let result = match log_dir {
        Some(dir) => contact_core::init_logging(level, dir),
        None => contact_core::logging::init_logging_with(level, LogTarget::Stderr),
    };
    match result {
        Ok(()) => String::new(),
        Err(err) => err.to_string(),
    }
}

/// Identify request body.
///
/// `phoneNumber` accepts JSON strings and numbers; numbers are rendered in
/// decimal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default, deserialize_with = "deserialize_identifier")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_identifier")]
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    pub fn new(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
        }
    }

    fn observation(&self) -> Observation {
        Observation::new(self.email.clone(), self.phone_number.clone())
    }
}

/// Outcome class of an identify call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifyStatus {
    Ok,
    /// Client error: no identifier, malformed body, unknown contact.
    InvalidInput,
    /// Server error: the contact store failed.
    InfrastructureError,
}

impl IdentifyStatus {
    /// HTTP status code a transport layer should answer with.
    pub fn http_status(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::InvalidInput => 400,
            Self::InfrastructureError => 500,
        }
    }
}

/// Response body: `{ "contact": { ... } }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ContactProjection,
}

/// Response body plus status signal and diagnostics message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyEnvelope {
    pub status: IdentifyStatus,
    pub response: IdentifyResponse,
    /// Human-readable message; empty on success.
    pub message: String,
}

impl IdentifyEnvelope {
    fn success(contact: ContactProjection) -> Self {
        Self {
            status: IdentifyStatus::Ok,
            response: IdentifyResponse { contact },
            message: String::new(),
        }
    }

    fn failure(status: IdentifyStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            response: IdentifyResponse::default(),
            message: message.into(),
        }
    }

    fn from_error(operation: &str, err: IdentifyError) -> Self {
        match err {
            IdentifyError::InvalidInput | IdentifyError::ContactNotFound(_) => {
                Self::failure(IdentifyStatus::InvalidInput, format!("{operation}: {err}"))
            }
            IdentifyError::Infrastructure(_) => {
                error!(
                    "event={operation} module=api status=error error_code=infrastructure error={err}"
                );
                Self::failure(
                    IdentifyStatus::InfrastructureError,
                    format!("{operation} failed: {err}"),
                )
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == IdentifyStatus::Ok
    }

    /// Serialized response body.
    pub fn body_json(&self) -> String {
        serde_json::to_string(&self.response)
            .unwrap_or_else(|_| r#"{"contact":{"primaryContactId":0,"emails":[],"phoneNumbers":[],"secondaryContactIds":[]}}"#.to_string())
    }
}

/// Identifies a contact against the configured database.
pub fn identify(request: &IdentifyRequest) -> IdentifyEnvelope {
    let observation = request.observation();
    if !observation.has_identifier() {
        return IdentifyEnvelope::from_error("identify", IdentifyError::InvalidInput);
    }

    match open_db(resolve_db_path()) {
        Ok(mut conn) => run_identify(&mut conn, &observation),
        Err(err) => IdentifyEnvelope::from_error("identify", IdentifyError::Infrastructure(err.into())),
    }
}

/// Identifies a contact on a caller-owned connection.
pub fn identify_with(conn: &mut Connection, request: &IdentifyRequest) -> IdentifyEnvelope {
    run_identify(conn, &request.observation())
}

/// Parses a JSON request body and identifies against the configured database.
pub fn identify_json(body: &str) -> IdentifyEnvelope {
    match serde_json::from_str::<IdentifyRequest>(body) {
        Ok(request) => identify(&request),
        Err(err) => {
            warn!("event=identify module=api status=rejected error_code=malformed_body");
            IdentifyEnvelope::failure(
                IdentifyStatus::InvalidInput,
                format!("identify: malformed request body: {err}"),
            )
        }
    }
}

/// Read-only merged identity of the cluster containing `contact_id`.
pub fn contact_cluster(conn: &Connection, contact_id: ContactId) -> IdentifyEnvelope {
    let outcome = SqliteContactStore::try_new(conn)
        .map_err(IdentifyError::from)
        .and_then(|store| IdentifyService::new(store).cluster_of(contact_id));
    match outcome {
        Ok(projection) => IdentifyEnvelope::success(projection),
        Err(err) => IdentifyEnvelope::from_error("contact_cluster", err),
    }
}

fn run_identify(conn: &mut Connection, observation: &Observation) -> IdentifyEnvelope {
    match identify_atomic(conn, observation) {
        Ok(projection) => IdentifyEnvelope::success(projection),
        Err(err) => IdentifyEnvelope::from_error("identify", err),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIdentifier {
    Text(String),
    Number(serde_json::Number),
}

fn deserialize_identifier<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawIdentifier>::deserialize(deserializer)?;
    Ok(raw.map(|value| match value {
        RawIdentifier::Text(text) => text,
        RawIdentifier::Number(number) => number.to_string(),
    }))
}
