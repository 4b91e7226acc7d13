//! In-memory contact store.
//!
//! # Responsibility
//! - Provide a deterministic `ContactStore` for resolver and service tests.
//! - Mirror SQLite store semantics (ordering, tombstones, id assignment).
//!
//! # Invariants
//! - Ids are assigned from a monotonically increasing counter.
//! - Timestamps come from a logical clock that advances by one per write.

use crate::model::contact::{Contact, ContactId, ContactValidationError, LinkPrecedence, NewContact};
use crate::repo::contact_repo::{ContactStore, MatchLookup, RepoError, RepoResult};
use std::cell::RefCell;
use std::collections::BTreeSet;

#[derive(Debug)]
struct MemoryState {
    contacts: Vec<Contact>,
    next_id: ContactId,
    clock: i64,
}

impl MemoryState {
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }
}

/// Vector-backed contact store.
#[derive(Debug)]
pub struct MemoryContactStore {
    state: RefCell<MemoryState>,
}

impl Default for MemoryContactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryContactStore {
    /// Empty store; the first created contact gets id `1`.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(MemoryState {
                contacts: Vec::new(),
                next_id: 1,
                clock: 0,
            }),
        }
    }

    /// Inserts a fully-specified record, bypassing id/timestamp assignment.
    ///
    /// Used to stage pre-existing (including legacy or tombstoned) state.
    pub fn seed(&self, contact: Contact) -> RepoResult<()> {
        contact.validate()?;
        let mut state = self.state.borrow_mut();
        if state.contacts.iter().any(|existing| existing.id == contact.id) {
            return Err(RepoError::InvalidData(format!(
                "duplicate contact id {} in seed",
                contact.id
            )));
        }
        state.next_id = state.next_id.max(contact.id + 1);
        state.clock = state.clock.max(contact.updated_at);
        state.contacts.push(contact);
        Ok(())
    }

    /// Snapshot of every record, tombstones included, in id order.
    pub fn all(&self) -> Vec<Contact> {
        let mut contacts = self.state.borrow().contacts.clone();
        contacts.sort_by_key(|contact| contact.id);
        contacts
    }

    fn select(&self, predicate: impl Fn(&Contact) -> bool) -> Vec<Contact> {
        let mut matched = self
            .state
            .borrow()
            .contacts
            .iter()
            .filter(|contact| contact.is_active() && predicate(contact))
            .cloned()
            .collect::<Vec<_>>();
        matched.sort_by_key(Contact::seniority);
        matched
    }
}

impl MatchLookup for MemoryContactStore {
    fn find_by_identifier(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        Ok(self.select(|contact| {
            let email_hit = email.is_some() && contact.email.as_deref() == email;
            let phone_hit = phone_number.is_some() && contact.phone_number.as_deref() == phone_number;
            email_hit || phone_hit
        }))
    }

    fn find_by_cluster_anchors(&self, anchors: &BTreeSet<ContactId>) -> RepoResult<Vec<Contact>> {
        Ok(self.select(|contact| {
            anchors.contains(&contact.id)
                || contact
                    .linked_id
                    .is_some_and(|linked_id| anchors.contains(&linked_id))
        }))
    }
}

impl ContactStore for MemoryContactStore {
    fn create(&self, fields: &NewContact) -> RepoResult<Contact> {
        fields.validate()?;
        let mut state = self.state.borrow_mut();
        let now = state.tick();
        let contact = Contact {
            id: state.next_id,
            email: fields.email.clone(),
            phone_number: fields.phone_number.clone(),
            link_precedence: fields.link_precedence,
            linked_id: fields.linked_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        contact.validate()?;
        state.next_id += 1;
        state.contacts.push(contact.clone());
        Ok(contact)
    }

    fn update_many(
        &self,
        ids: &[ContactId],
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<usize> {
        if let Some(target) = linked_id {
            if ids.contains(&target) {
                return Err(ContactValidationError::SelfLink(target).into());
            }
        }

        let mut state = self.state.borrow_mut();
        let now = state.tick();
        let mut changed = 0;
        for contact in state
            .contacts
            .iter_mut()
            .filter(|contact| contact.is_active() && ids.contains(&contact.id))
        {
            contact.link_precedence = precedence;
            contact.linked_id = linked_id;
            contact.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }

    fn get_contact(&self, id: ContactId, include_deleted: bool) -> RepoResult<Option<Contact>> {
        Ok(self
            .state
            .borrow()
            .contacts
            .iter()
            .find(|contact| contact.id == id && (include_deleted || contact.is_active()))
            .cloned())
    }

    fn soft_delete_contact(&self, id: ContactId) -> RepoResult<()> {
        let mut state = self.state.borrow_mut();
        let now = state.tick();
        let contact = state
            .contacts
            .iter_mut()
            .find(|contact| contact.id == id)
            .ok_or(RepoError::NotFound(id))?;
        if contact.deleted_at.is_none() {
            contact.deleted_at = Some(now);
        }
        contact.updated_at = now;
        Ok(())
    }
}
