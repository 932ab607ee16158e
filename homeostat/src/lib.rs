//! Homeostatic control loop for a self-maintaining agent.
//!
//! Each scheduled cycle observes host health, estimates how close the system
//! is to the edge of chaos, and delegates one unit of work to an external
//! reasoner. Outcomes feed an adaptive capability registry whose confidence
//! scores steer later cycles between exploiting known skills and exploring
//! new ones. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (criticality, backoff, exploration,
//!   registry updates, consolidation merges). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, locking, telemetry probes,
//!   reasoner processes). Behind traits where tests need fakes.
//!
//! Orchestration modules ([`cycle`], [`consolidate`], [`improve`], [`status`]) coordinate
//! core logic with I/O to implement CLI commands.

pub mod consolidate;
pub mod core;
pub mod cycle;
pub mod exit_codes;
pub mod improve;
pub mod io;
pub mod logging;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
