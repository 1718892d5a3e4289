//! Domain records for the crowngrid store.
//!
//! # Responsibility
//! - Define canonical data structures used by the batch pipeline.
//! - Keep identity, provenance, and validation rules in one place.
//!
//! # Invariants
//! - Every stored record is identified by a stable UUID (trees keep their
//!   caller-assigned `tree_id` string).
//! - Write paths validate cross-field rules; read paths surface rows as
//!   stored so batch operations can skip damaged rows individually.

pub mod level;
pub mod observation;
pub mod survey;
