//! Identify use-case service.
//!
//! # Responsibility
//! - Run identity resolution against a contact store.
//! - Apply the planned mutations in order and return the final projection.
//! - Provide a SQLite entry point that makes read-then-write atomic.
//!
//! # Invariants
//! - The service never decides cluster state itself; it only executes what
//!   `identity_resolver::resolve` planned.
//! - `identify_atomic` either commits every planned mutation or none.

use crate::model::contact::{ContactId, LinkPrecedence, Observation};
use crate::repo::contact_repo::{ContactStore, RepoError, SqliteContactStore};
use crate::service::identity_resolver::{
    expand_cluster, project_cluster, resolve, ContactProjection, ResolveError, StoreMutation,
};
use log::{error, info, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Errors surfaced to identify callers.
#[derive(Debug)]
pub enum IdentifyError {
    /// Neither email nor phone number supplied.
    InvalidInput,
    /// Contact not found for read-only cluster views.
    ContactNotFound(ContactId),
    /// Contact store read/write failure.
    Infrastructure(RepoError),
}

impl Display for IdentifyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "either email or phoneNumber must be provided"),
            Self::ContactNotFound(id) => write!(f, "contact not found: {id}"),
            Self::Infrastructure(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IdentifyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Infrastructure(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResolveError> for IdentifyError {
    fn from(value: ResolveError) -> Self {
        match value {
            ResolveError::InvalidInput => Self::InvalidInput,
            ResolveError::Infrastructure(err) => Self::Infrastructure(err),
        }
    }
}

impl From<RepoError> for IdentifyError {
    fn from(value: RepoError) -> Self {
        Self::Infrastructure(value)
    }
}

impl From<rusqlite::Error> for IdentifyError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Infrastructure(value.into())
    }
}

/// Identify service facade over contact store implementations.
pub struct IdentifyService<S: ContactStore> {
    store: S,
}

impl<S: ContactStore> IdentifyService<S> {
    /// Creates a service using the provided store implementation.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Resolves one observation and applies the resulting writes.
    ///
    /// Atomicity is the store's concern: pass a transaction-scoped store (see
    /// [`identify_atomic`]) when concurrent writers are possible.
    pub fn identify(&self, observation: &Observation) -> Result<ContactProjection, IdentifyError> {
        let started_at = Instant::now();
        let resolution = match resolve(observation, &self.store) {
            Ok(resolution) => resolution,
            Err(ResolveError::InvalidInput) => {
                warn!("event=identify module=service status=rejected error_code=invalid_input");
                return Err(IdentifyError::InvalidInput);
            }
            Err(err) => return Err(err.into()),
        };

        let mut created_id = None;
        for mutation in resolution.mutations() {
            match mutation {
                StoreMutation::Demote { ids, primary_id }
                | StoreMutation::Relink { ids, primary_id } => {
                    let changed =
                        self.store
                            .update_many(ids, LinkPrecedence::Secondary, Some(*primary_id))?;
                    if changed != ids.len() {
                        return Err(RepoError::InvalidData(format!(
                            "expected to relink {} contacts, store changed {changed}",
                            ids.len()
                        ))
                        .into());
                    }
                }
                StoreMutation::Create(fields) => {
                    created_id = Some(self.store.create(fields)?.id);
                }
            }
        }

        let kind = resolution.kind();
        let demoted = resolution.demoted_count();
        let projection = resolution.finalize(created_id)?;
        info!(
            "event=identify module=service status=ok outcome={} primary_id={} created={} demoted={} secondaries={} duration_ms={}",
            kind.as_str(),
            projection.primary_contact_id,
            created_id.is_some(),
            demoted,
            projection.secondary_contact_ids.len(),
            started_at.elapsed().as_millis()
        );
        Ok(projection)
    }

    /// Read-only merged identity of the cluster containing `contact_id`.
    pub fn cluster_of(&self, contact_id: ContactId) -> Result<ContactProjection, IdentifyError> {
        let contact = self
            .store
            .get_contact(contact_id, false)?
            .ok_or(IdentifyError::ContactNotFound(contact_id))?;
        let members = expand_cluster(std::slice::from_ref(&contact), &self.store)?;
        Ok(project_cluster(&members)?)
    }
}

/// Identifies one observation inside a single `IMMEDIATE` SQLite transaction.
///
/// The write lock is taken before the first lookup, so concurrent callers on
/// the same database serialize and never race to create competing primaries.
///
/// # Errors
/// - Any failure rolls back every mutation of this call.
pub fn identify_atomic(
    conn: &mut Connection,
    observation: &Observation,
) -> Result<ContactProjection, IdentifyError> {
    if !observation.has_identifier() {
        return Err(IdentifyError::InvalidInput);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let outcome = {
        let store = SqliteContactStore::try_new(&tx)?;
        IdentifyService::new(store).identify(observation)
    };

    match outcome {
        Ok(projection) => {
            tx.commit()?;
            Ok(projection)
        }
        Err(err) => {
            if let IdentifyError::Infrastructure(source) = &err {
                error!(
                    "event=identify module=service status=error error_code=store_failure error={}",
                    source
                );
            }
            // Dropping the transaction rolls it back.
            drop(tx);
            Err(err)
        }
    }
}
