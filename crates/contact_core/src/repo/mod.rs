//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the contact store contract identity resolution talks through.
//! - Isolate SQLite query details from service/business orchestration.
//!
//! # Invariants
//! - Repository writes must enforce `Contact` validation before persistence.
//! - Repository APIs return semantic errors (`NotFound`) in addition to DB
//!   transport errors.

pub mod contact_repo;
pub mod memory_repo;
