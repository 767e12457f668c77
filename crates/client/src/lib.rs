//! Pocketshop client library.
//!
//! The session and cart core of the storefront app, as a library the UI
//! layer drives. Screens, navigation and theming live elsewhere; this crate
//! owns who is logged in and what is in the cart.
//!
//! # Architecture
//!
//! - [`api`] - Commerce API contract and its `reqwest` implementation
//! - [`storage`] - Durable key-value storage contract, file and memory stores
//! - [`session`] - Session manager: token, identity, login/logout/register
//! - [`cart`] - Cart store and the cart synchronization engine
//! - [`refresh`] - One-shot app refresh signal that forces a UI remount
//! - [`events`] - Session event channel connecting the pieces
//! - [`shop`] - Facade wiring everything together for the UI
//!
//! Data flows one way: UI actions call engine operations, the engine calls
//! the API (authenticated) or mutates local state (guest), results replace
//! the cart store wholesale, and the store persists itself. Session changes
//! reach the cart store as events, never through shared globals.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod cart;
pub mod config;
pub mod error;
pub mod events;
pub mod refresh;
pub mod session;
pub mod shop;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
mod fake;

pub use config::{ClientConfig, VerifyPolicy};
pub use error::{Result, ShopError};
pub use shop::{MountOutcome, Shop};
