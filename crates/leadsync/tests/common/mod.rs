//! Shared fixtures for leadsync integration tests.
//!
//! - `harness`: engine construction, fixture builders and seeding helpers
//! - `doubles`: a failure-injecting store wrapper and a recording trigger

pub mod doubles;
pub mod harness;

pub use doubles::*;
pub use harness::*;
