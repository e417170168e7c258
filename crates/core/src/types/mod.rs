//! Core types for the checkout engine.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod cart;
pub mod catalog;
pub mod email;
pub mod id;
pub mod money;
pub mod status;
pub mod token;

pub use cart::{Cart, CartItem, GuestContact, ValidationError};
pub use catalog::{BlankIdentifier, PlanCode, ServiceId};
pub use email::{Email, EmailError};
pub use id::*;
pub use money::{Currency, DualPrice};
pub use status::*;
pub use token::LinkToken;
