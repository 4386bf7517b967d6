//! cmld-test-harness: Test utilities for cmld.
//!
//! This crate provides [`MockTransport`] for deterministic unit testing of
//! the command dispatcher, the status cache, and log ingestion without a
//! Chameleon Mini attached.

pub mod mock_serial;

pub use mock_serial::MockTransport;
