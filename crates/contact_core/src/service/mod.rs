//! Core use-case services.
//!
//! # Responsibility
//! - Hold the identity resolution decision logic.
//! - Orchestrate store calls into the identify use-case.

pub mod identify_service;
pub mod identity_resolver;
