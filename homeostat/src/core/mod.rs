//! Deterministic, pure logic for the control loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! records and take time and randomness as inputs, so every decision is
//! reproducible in tests.

pub mod backoff;
pub mod consolidation;
pub mod criticality;
pub mod experience;
pub mod exploration;
pub mod matcher;
pub mod registry;
pub mod types;
