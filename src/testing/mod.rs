//! Testing utilities
//!
//! In-memory stand-ins for the database boundary, shared by unit tests,
//! integration tests and benchmarks.

pub mod mocks;

pub use mocks::{MockCall, MockDatabase, MockDatabaseBuilder};
