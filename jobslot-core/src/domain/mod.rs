//! Core domain types
//!
//! These types represent the persisted job record. They are shared between
//! the engine (which stores and executes jobs) and the CLI (which displays them).

pub mod job;
