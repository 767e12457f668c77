//! Core types for pocketshop.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod cart;
pub mod catalog;
pub mod email;
pub mod id;
pub mod price;
pub mod role;

pub use cart::{Cart, CartLine, OwnerMode, Quantity, QuantityError};
pub use catalog::{Catalog, CatalogEntry, CatalogError};
pub use email::{Email, EmailError};
pub use id::*;
pub use price::{Price, PriceError};
pub use role::Role;
