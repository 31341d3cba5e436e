//! Jobslot Core
//!
//! Core types shared by the Jobslot queue engine and its command-line surface.
//!
//! This crate contains:
//! - Domain types: the persisted `Job` record and its status machine
//! - DTOs: submission requests, per-field updates and store queries

pub mod domain;
pub mod dto;
