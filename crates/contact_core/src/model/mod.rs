//! Contact identity domain model.
//!
//! # Responsibility
//! - Define canonical data structures used by identity resolution.
//!
//! # Invariants
//! - Every contact is identified by a store-assigned `ContactId`.
//! - Deletion is represented by tombstones, not hard delete.

pub mod contact;
