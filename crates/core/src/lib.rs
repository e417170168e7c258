//! Metaphysics Alliance Core - Shared checkout types.
//!
//! This crate provides the types shared by every checkout component:
//! - `checkout` - Guest checkout engine and HTTP service
//! - `cli` - Operator tooling (migrations, sweeps, support lookups)
//!
//! # Architecture
//!
//! The core crate contains only types and validation - no I/O, no database
//! access, no HTTP clients. Database encoding is opt-in via the `postgres`
//! feature.
//!
//! # Modules
//!
//! - [`types`] - Typed IDs, emails, dual-currency money, cart input, statuses, link tokens

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
