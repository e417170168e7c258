//! Metaphysics Alliance checkout engine.
//!
//! Guest orders, resume and magic links, account provisioning, and the
//! outbox that keeps the entitlement system in step. The server binary and
//! `ma-cli` are thin shells over this library.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
