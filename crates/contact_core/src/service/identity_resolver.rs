//! Contact clustering and primary/secondary reconciliation.
//!
//! # Responsibility
//! - Decide, for one observation, which cluster it joins, which clusters
//!   merge, which contact stays primary, and whether a record is created.
//! - Materialize the merged identity projection for the resulting cluster.
//!
//! # Invariants
//! - Resolution only reads through `MatchLookup`; every write it decides on
//!   is returned as a `StoreMutation` for the caller to apply atomically.
//! - The oldest primary (`created_at`, then smallest id) wins elections.
//! - Precedence only ever moves primary -> secondary.
//! - Planned mutations keep every link single-hop: members of a merged
//!   cluster are re-pointed at the elected primary.

use crate::model::contact::{Contact, ContactId, LinkPrecedence, NewContact, Observation};
use crate::repo::contact_repo::{MatchLookup, RepoError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Write the caller must apply to make the resolution durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreMutation {
    /// Former primaries that lost an election become secondaries of `primary_id`.
    Demote {
        ids: Vec<ContactId>,
        primary_id: ContactId,
    },
    /// Secondaries still pointing at a demoted contact move to `primary_id`.
    Relink {
        ids: Vec<ContactId>,
        primary_id: ContactId,
    },
    /// New contact; at most one per resolution.
    Create(NewContact),
}

/// Merged identity view of one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactProjection {
    pub primary_contact_id: ContactId,
    /// Primary's email first, then first-seen order.
    pub emails: Vec<String>,
    /// Primary's phone number first, then first-seen order.
    pub phone_numbers: Vec<String>,
    /// Ascending.
    pub secondary_contact_ids: Vec<ContactId>,
}

/// What a resolution did to the cluster landscape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
    /// No contact matched; a new primary anchors a new cluster.
    NewCluster,
    /// Matched clusters were merged under the oldest primary.
    Merged,
    /// One cluster matched and gained a secondary.
    Extended,
    /// Every identifier was known; stale links were re-pointed at the primary.
    Relinked,
    /// Every identifier was already known; nothing to write.
    Unchanged,
}

impl ResolutionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewCluster => "new_cluster",
            Self::Merged => "merged",
            Self::Extended => "extended",
            Self::Relinked => "relinked",
            Self::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug)]
pub enum ResolveError {
    /// Observation carries neither an email nor a phone number.
    InvalidInput,
    /// Lookup failed or returned state the resolver cannot reason over.
    Infrastructure(RepoError),
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "either email or phone_number must be provided"),
            Self::Infrastructure(err) => write!(f, "contact store failure: {err}"),
        }
    }
}

impl Error for ResolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidInput => None,
            Self::Infrastructure(err) => Some(err),
        }
    }
}

impl From<RepoError> for ResolveError {
    fn from(value: RepoError) -> Self {
        Self::Infrastructure(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrimarySlot {
    Existing(ContactId),
    Created,
}

/// Decision produced by [`resolve`].
///
/// The projection is only complete once the store has assigned an id to the
/// planned contact (if any); see [`Resolution::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    kind: ResolutionKind,
    mutations: Vec<StoreMutation>,
    primary: PrimarySlot,
    emails: Vec<String>,
    phone_numbers: Vec<String>,
    secondary_contact_ids: Vec<ContactId>,
}

impl Resolution {
    pub fn kind(&self) -> ResolutionKind {
        self.kind
    }

    /// Writes in application order: demotions, relinks, then creation.
    pub fn mutations(&self) -> &[StoreMutation] {
        &self.mutations
    }

    /// Fields of the contact this resolution creates, if any.
    pub fn planned_contact(&self) -> Option<&NewContact> {
        self.mutations.iter().find_map(|mutation| match mutation {
            StoreMutation::Create(fields) => Some(fields),
            _ => None,
        })
    }

    /// Elected primary id, unless the primary is the contact being created.
    pub fn primary_id(&self) -> Option<ContactId> {
        match self.primary {
            PrimarySlot::Existing(id) => Some(id),
            PrimarySlot::Created => None,
        }
    }

    /// Number of former primaries this resolution demotes.
    pub fn demoted_count(&self) -> usize {
        self.mutations
            .iter()
            .map(|mutation| match mutation {
                StoreMutation::Demote { ids, .. } => ids.len(),
                _ => 0,
            })
            .sum()
    }

    /// Completes the projection with the id the store assigned on creation.
    ///
    /// # Errors
    /// - `Infrastructure(InvalidData)` when a creation was planned but no id
    ///   is supplied.
    pub fn finalize(self, created_id: Option<ContactId>) -> Result<ContactProjection, ResolveError> {
        let created_id = match (self.planned_contact().is_some(), created_id) {
            (true, Some(id)) => Some(id),
            (true, None) => {
                return Err(RepoError::InvalidData(
                    "resolution planned a contact but none was created".to_string(),
                )
                .into())
            }
            (false, _) => None,
        };

        let mut secondary_contact_ids = self.secondary_contact_ids;
        let primary_contact_id = match (self.primary, created_id) {
            (PrimarySlot::Existing(id), Some(created)) => {
                secondary_contact_ids.push(created);
                id
            }
            (PrimarySlot::Existing(id), None) => id,
            (PrimarySlot::Created, Some(created)) => created,
            (PrimarySlot::Created, None) => {
                return Err(RepoError::InvalidData(
                    "new cluster resolution is missing its primary id".to_string(),
                )
                .into())
            }
        };
        secondary_contact_ids.sort_unstable();
        secondary_contact_ids.dedup();

        Ok(ContactProjection {
            primary_contact_id,
            emails: self.emails,
            phone_numbers: self.phone_numbers,
            secondary_contact_ids,
        })
    }
}

/// Resolves one observation against the current store snapshot.
///
/// # Errors
/// - `InvalidInput` when the observation has no identifier.
/// - `Infrastructure` when a lookup fails or the matched cluster has no
///   primary at all.
pub fn resolve(
    observation: &Observation,
    lookup: &impl MatchLookup,
) -> Result<Resolution, ResolveError> {
    if !observation.has_identifier() {
        return Err(ResolveError::InvalidInput);
    }

    let direct_matches = lookup.find_by_identifier(
        observation.email.as_deref(),
        observation.phone_number.as_deref(),
    )?;
    if direct_matches.is_empty() {
        return Ok(new_cluster(observation));
    }

    let cluster = expand_cluster(&direct_matches, lookup)?;
    reconcile(observation, cluster)
}

/// Merged identity of an already-consistent cluster, without planning writes.
///
/// Used for read-only views; the elected primary is the oldest primary member.
pub fn project_cluster(members: &[Contact]) -> Result<ContactProjection, ResolveError> {
    let chosen = elect_primary(members)?;
    let mut ordered = members.to_vec();
    ordered.sort_by_key(Contact::seniority);
    let (emails, phone_numbers) = collect_identifiers(chosen, &ordered, None);

    let mut secondary_contact_ids = ordered
        .iter()
        .filter(|member| member.id != chosen.id)
        .map(|member| member.id)
        .collect::<Vec<_>>();
    secondary_contact_ids.sort_unstable();

    Ok(ContactProjection {
        primary_contact_id: chosen.id,
        emails,
        phone_numbers,
        secondary_contact_ids,
    })
}

/// Loads the full membership of every cluster touched by `direct_matches`.
///
/// Expansion repeats until no fetched member reveals a new anchor, which
/// closes over two-hop chains left in older data.
pub fn expand_cluster(
    direct_matches: &[Contact],
    lookup: &impl MatchLookup,
) -> Result<Vec<Contact>, ResolveError> {
    let mut anchors = direct_matches
        .iter()
        .map(Contact::effective_primary_id)
        .collect::<BTreeSet<_>>();

    loop {
        let members = lookup.find_by_cluster_anchors(&anchors)?;
        let before = anchors.len();
        for member in &members {
            anchors.insert(member.id);
            if let Some(linked_id) = member.linked_id {
                anchors.insert(linked_id);
            }
        }
        if anchors.len() == before {
            return Ok(members);
        }
    }
}

fn new_cluster(observation: &Observation) -> Resolution {
    Resolution {
        kind: ResolutionKind::NewCluster,
        mutations: vec![StoreMutation::Create(NewContact::primary(observation))],
        primary: PrimarySlot::Created,
        emails: observation.email.iter().cloned().collect(),
        phone_numbers: observation.phone_number.iter().cloned().collect(),
        secondary_contact_ids: Vec::new(),
    }
}

fn reconcile(observation: &Observation, mut cluster: Vec<Contact>) -> Result<Resolution, ResolveError> {
    cluster.sort_by_key(Contact::seniority);
    let chosen_id = elect_primary(&cluster)?.id;

    let mut demoted = Vec::new();
    let mut relinked = Vec::new();
    for member in cluster.iter_mut().filter(|member| member.id != chosen_id) {
        match member.link_precedence {
            LinkPrecedence::Primary => demoted.push(member.id),
            LinkPrecedence::Secondary if member.linked_id != Some(chosen_id) => {
                relinked.push(member.id)
            }
            LinkPrecedence::Secondary => continue,
        }
        member.link_precedence = LinkPrecedence::Secondary;
        member.linked_id = Some(chosen_id);
    }

    let mut mutations = Vec::new();
    if !demoted.is_empty() {
        mutations.push(StoreMutation::Demote {
            ids: demoted.clone(),
            primary_id: chosen_id,
        });
    }
    let has_relinks = !relinked.is_empty();
    if has_relinks {
        mutations.push(StoreMutation::Relink {
            ids: relinked,
            primary_id: chosen_id,
        });
    }

    let known_email = |value: &str| cluster.iter().any(|c| c.email.as_deref() == Some(value));
    let known_phone =
        |value: &str| cluster.iter().any(|c| c.phone_number.as_deref() == Some(value));
    let brings_new_email = observation.email.as_deref().is_some_and(|e| !known_email(e));
    let brings_new_phone = observation
        .phone_number
        .as_deref()
        .is_some_and(|p| !known_phone(p));

    let extension = if brings_new_email || brings_new_phone {
        let fields = NewContact::secondary(observation, chosen_id);
        mutations.push(StoreMutation::Create(fields.clone()));
        Some(fields)
    } else {
        None
    };

    let kind = match (demoted.is_empty(), extension.is_some(), has_relinks) {
        (false, _, _) => ResolutionKind::Merged,
        (true, true, _) => ResolutionKind::Extended,
        (true, false, true) => ResolutionKind::Relinked,
        (true, false, false) => ResolutionKind::Unchanged,
    };

    let chosen = cluster
        .iter()
        .find(|member| member.id == chosen_id)
        .ok_or_else(|| RepoError::InvalidData(format!("elected primary {chosen_id} vanished")))?;
    let (emails, phone_numbers) = collect_identifiers(chosen, &cluster, extension.as_ref());
    let secondary_contact_ids = cluster
        .iter()
        .filter(|member| member.id != chosen_id)
        .map(|member| member.id)
        .collect();

    Ok(Resolution {
        kind,
        mutations,
        primary: PrimarySlot::Existing(chosen_id),
        emails,
        phone_numbers,
        secondary_contact_ids,
    })
}

fn elect_primary(cluster: &[Contact]) -> Result<&Contact, ResolveError> {
    cluster
        .iter()
        .filter(|member| member.is_primary())
        .min_by_key(|member| member.seniority())
        .ok_or_else(|| {
            let ids = cluster.iter().map(|member| member.id).collect::<Vec<_>>();
            RepoError::InvalidData(format!("cluster {ids:?} has no primary contact")).into()
        })
}

/// Distinct emails and phone numbers, chosen primary's values first.
///
/// `ordered` must already be sorted by seniority.
fn collect_identifiers(
    chosen: &Contact,
    ordered: &[Contact],
    extension: Option<&NewContact>,
) -> (Vec<String>, Vec<String>) {
    let mut emails = Vec::new();
    let mut phone_numbers = Vec::new();

    let sources = std::iter::once((chosen.email.as_deref(), chosen.phone_number.as_deref()))
        .chain(
            ordered
                .iter()
                .map(|member| (member.email.as_deref(), member.phone_number.as_deref())),
        )
        .chain(
            extension
                .into_iter()
                .map(|fields| (fields.email.as_deref(), fields.phone_number.as_deref())),
        );

    for (email, phone_number) in sources {
        push_distinct(&mut emails, email);
        push_distinct(&mut phone_numbers, phone_number);
    }

    (emails, phone_numbers)
}

fn push_distinct(values: &mut Vec<String>, candidate: Option<&str>) {
    if let Some(candidate) = candidate {
        if !values.iter().any(|value| value == candidate) {
            values.push(candidate.to_string());
        }
    }
}
