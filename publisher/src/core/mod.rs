//! Deterministic, pure logic shared by the publisher.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod naming;
pub mod revision;
pub mod types;
