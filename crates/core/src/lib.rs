//! Pocketshop Core - Shared domain types.
//!
//! This crate provides the types shared by the storefront client and its tests:
//! - `client` - Session manager, cart store and cart synchronization engine
//! - `integration-tests` - Mock commerce backend and end-to-end scenarios
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no storage
//! access, no HTTP clients. Cart invariants (positive quantities, one line per
//! product) are enforced by construction here so every layer above can rely
//! on them.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, emails, prices, roles, carts and the product catalog

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
