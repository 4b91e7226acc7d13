//! Contact domain model.
//!
//! # Responsibility
//! - Define the canonical touch-point record clustered by identity resolution.
//! - Define the observation shape accepted by the resolver.
//!
//! # Invariants
//! - `id` is store-assigned, monotonically increasing and never reused.
//! - A primary contact has no `linked_id`.
//! - A secondary contact links directly to its cluster primary.
//! - `deleted_at` is the source of truth for tombstone state.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Store-assigned contact identifier.
pub type ContactId = i64;

/// Role of a contact inside its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPrecedence {
    /// Canonical record of the cluster.
    Primary,
    /// Subordinate record pointing at the cluster primary.
    Secondary,
}

impl LinkPrecedence {
    /// Storage/wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    /// Parses a storage label, returning `None` for unknown values.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

/// Record-level invariant violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactValidationError {
    /// Neither email nor phone number is set.
    MissingIdentifier,
    /// Primary contact carries a link.
    PrimaryWithLink { id: ContactId, linked_id: ContactId },
    /// Secondary contact has no link.
    SecondaryWithoutLink(ContactId),
    /// Secondary contact links to itself.
    SelfLink(ContactId),
}

impl Display for ContactValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingIdentifier => {
                write!(f, "contact requires at least one of email or phone_number")
            }
            Self::PrimaryWithLink { id, linked_id } => write!(
                f,
                "primary contact {id} must not link to another contact (linked_id={linked_id})"
            ),
            Self::SecondaryWithoutLink(id) => {
                write!(f, "secondary contact {id} must link to a primary")
            }
            Self::SelfLink(id) => write!(f, "contact {id} must not link to itself"),
        }
    }
}

impl Error for ContactValidationError {}

/// Persisted contact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link_precedence: LinkPrecedence,
    /// Cluster primary id. Meaningful only for secondaries.
    pub linked_id: Option<ContactId>,
    /// Unix epoch milliseconds, immutable.
    pub created_at: i64,
    /// Unix epoch milliseconds, bumped on precedence/link changes.
    pub updated_at: i64,
    /// Unix epoch milliseconds when tombstoned.
    pub deleted_at: Option<i64>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Returns whether this contact takes part in matching and projection.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Id of the cluster primary this contact belongs to.
    ///
    /// Secondaries without a link (invalid state) report themselves.
    pub fn effective_primary_id(&self) -> ContactId {
        match self.link_precedence {
            LinkPrecedence::Primary => self.id,
            LinkPrecedence::Secondary => self.linked_id.unwrap_or(self.id),
        }
    }

    /// Ordering key used for primary election and first-seen ordering.
    pub fn seniority(&self) -> (i64, ContactId) {
        (self.created_at, self.id)
    }

    /// Checks record-level invariants.
    pub fn validate(&self) -> Result<(), ContactValidationError> {
        if self.email.is_none() && self.phone_number.is_none() {
            return Err(ContactValidationError::MissingIdentifier);
        }
        match (self.link_precedence, self.linked_id) {
            (LinkPrecedence::Primary, Some(linked_id)) => {
                Err(ContactValidationError::PrimaryWithLink {
                    id: self.id,
                    linked_id,
                })
            }
            (LinkPrecedence::Secondary, None) => {
                Err(ContactValidationError::SecondaryWithoutLink(self.id))
            }
            (LinkPrecedence::Secondary, Some(linked_id)) if linked_id == self.id => {
                Err(ContactValidationError::SelfLink(self.id))
            }
            _ => Ok(()),
        }
    }
}

/// Field set for a contact that the store has not created yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link_precedence: LinkPrecedence,
    pub linked_id: Option<ContactId>,
}

impl NewContact {
    /// New cluster anchor built from an observation.
    pub fn primary(observation: &Observation) -> Self {
        Self {
            email: observation.email.clone(),
            phone_number: observation.phone_number.clone(),
            link_precedence: LinkPrecedence::Primary,
            linked_id: None,
        }
    }

    /// New member of an existing cluster built from an observation.
    pub fn secondary(observation: &Observation, primary_id: ContactId) -> Self {
        Self {
            email: observation.email.clone(),
            phone_number: observation.phone_number.clone(),
            link_precedence: LinkPrecedence::Secondary,
            linked_id: Some(primary_id),
        }
    }

    /// Checks invariants that do not depend on the assigned id.
    pub fn validate(&self) -> Result<(), ContactValidationError> {
        if self.email.is_none() && self.phone_number.is_none() {
            return Err(ContactValidationError::MissingIdentifier);
        }
        match (self.link_precedence, self.linked_id) {
            (LinkPrecedence::Primary, Some(linked_id)) => {
                Err(ContactValidationError::PrimaryWithLink { id: 0, linked_id })
            }
            (LinkPrecedence::Secondary, None) => {
                Err(ContactValidationError::SecondaryWithoutLink(0))
            }
            _ => Ok(()),
        }
    }
}

/// One `(email, phone_number)` sighting to resolve.
///
/// Empty strings are normalized to `None`; everything else, whitespace
/// included, is kept verbatim because matching is exact-string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

impl Observation {
    pub fn new(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email: email.filter(|value| !value.is_empty()),
            phone_number: phone_number.filter(|value| !value.is_empty()),
        }
    }

    pub fn email(value: impl Into<String>) -> Self {
        Self::new(Some(value.into()), None)
    }

    pub fn phone(value: impl Into<String>) -> Self {
        Self::new(None, Some(value.into()))
    }

    pub fn both(email: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self::new(Some(email.into()), Some(phone_number.into()))
    }

    /// Returns whether at least one identifier is present.
    pub fn has_identifier(&self) -> bool {
        self.email.is_some() || self.phone_number.is_some()
    }
}
