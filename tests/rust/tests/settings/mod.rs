//! Settings model integration tests
//!
//! Parsing, validation messages, file loading and the fingerprint properties
//! the pool relies on.

mod fingerprint;
