//! Data Transfer Objects
//!
//! Requests and updates passed between callers, the queue and the job store.

pub mod job;
