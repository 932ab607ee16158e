//! I/O helpers for homeostat commands.

pub mod atomic;
pub mod backlog;
pub mod config;
pub mod cycle_log;
pub mod experience_store;
pub mod git;
pub mod init;
pub mod lock;
pub mod process;
pub mod prompt;
pub mod reasoner;
pub mod registry_store;
pub mod state_store;
pub mod telemetry;
