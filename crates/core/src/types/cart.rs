//! Cart value types.
//!
//! A [`Cart`] is an ordered list of [`CartLine`]s with two invariants that
//! hold for every value of the type:
//!
//! - every line has a quantity of at least one ([`Quantity`] cannot be zero)
//! - at most one line exists per product
//!
//! Mutations either upsert or delete whole lines. Removal is the only way a
//! line reaches zero. Data coming from the wire or from storage goes through
//! [`Cart::from_raw`] / the `Deserialize` impl, which drop non-positive lines
//! (keeping the rest) and merge duplicates, so the invariants cannot be
//! broken from outside.

use core::fmt;
use core::num::NonZeroU32;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use super::catalog::Catalog;
use super::id::ProductId;

/// Errors that can occur when constructing a [`Quantity`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityError {
    /// Quantities must be at least one.
    #[error("quantity must be at least 1 (got {0})")]
    NotPositive(i64),
    /// Quantity does not fit in 32 bits.
    #[error("quantity {0} is too large")]
    TooLarge(i64),
}

/// A strictly positive line quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(NonZeroU32);

impl Quantity {
    /// A quantity of one.
    pub const ONE: Self = Self(NonZeroU32::MIN);

    /// Create a quantity.
    ///
    /// # Errors
    ///
    /// Returns `QuantityError::NotPositive` for zero.
    pub fn new(value: u32) -> Result<Self, QuantityError> {
        NonZeroU32::new(value)
            .map(Self)
            .ok_or(QuantityError::NotPositive(0))
    }

    /// The quantity as a plain integer.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// Add two quantities, saturating at `u32::MAX`.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0.get()))
    }
}

impl TryFrom<i64> for Quantity {
    type Error = QuantityError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value <= 0 {
            return Err(QuantityError::NotPositive(value));
        }
        let value = u32::try_from(value).map_err(|_| QuantityError::TooLarge(value))?;
        Self::new(value)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One product in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    /// Product in the external catalog.
    pub product_id: ProductId,
    /// Units of the product.
    pub quantity: Quantity,
}

impl CartLine {
    /// Create a cart line.
    #[must_use]
    pub const fn new(product_id: ProductId, quantity: Quantity) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Which backing store is authoritative for the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OwnerMode {
    /// No token: the cart lives in local storage only.
    #[default]
    Guest,
    /// Token present: the server cart is authoritative, the local copy is a cache.
    Authenticated,
}

/// A shopping cart.
///
/// Serialized as a plain JSON array of lines, which is the format of the
/// persisted `cartItems` key.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(into = "Vec<CartLine>")]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    /// An empty cart.
    #[must_use]
    pub const fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Build a cart from lines, merging duplicate products.
    #[must_use]
    pub fn from_lines(lines: impl IntoIterator<Item = CartLine>) -> Self {
        let mut cart = Self::new();
        for line in lines {
            cart.add(line.product_id, line.quantity);
        }
        cart
    }

    /// Build a cart from untrusted `(product, quantity)` pairs.
    ///
    /// Pairs with a quantity of zero or less are dropped, duplicates are
    /// merged by addition.
    #[must_use]
    pub fn from_raw(pairs: impl IntoIterator<Item = (ProductId, i64)>) -> Self {
        Self::from_lines(pairs.into_iter().filter_map(|(product_id, quantity)| {
            Quantity::try_from(quantity)
                .ok()
                .map(|quantity| CartLine::new(product_id, quantity))
        }))
    }

    /// The lines in insertion order.
    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Number of distinct products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Quantity of a product, if it is in the cart.
    #[must_use]
    pub fn quantity_of(&self, product_id: &ProductId) -> Option<Quantity> {
        self.lines
            .iter()
            .find(|line| &line.product_id == product_id)
            .map(|line| line.quantity)
    }

    /// Add units of a product, creating the line if needed.
    pub fn add(&mut self, product_id: ProductId, quantity: Quantity) {
        match self
            .lines
            .iter_mut()
            .find(|line| line.product_id == product_id)
        {
            Some(line) => line.quantity = line.quantity.saturating_add(quantity),
            None => self.lines.push(CartLine::new(product_id, quantity)),
        }
    }

    /// Add a single unit of a product.
    pub fn add_one(&mut self, product_id: ProductId) {
        self.add(product_id, Quantity::ONE);
    }

    /// Set the quantity of a product. Zero removes the line.
    pub fn set_quantity(&mut self, product_id: ProductId, quantity: u32) {
        let Ok(quantity) = Quantity::new(quantity) else {
            self.remove(&product_id);
            return;
        };
        match self
            .lines
            .iter_mut()
            .find(|line| line.product_id == product_id)
        {
            Some(line) => line.quantity = quantity,
            None => self.lines.push(CartLine::new(product_id, quantity)),
        }
    }

    /// Remove a product's line. Returns whether a line was removed.
    pub fn remove(&mut self, product_id: &ProductId) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| &line.product_id != product_id);
        self.lines.len() != before
    }

    /// Remove every line.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn total_items(&self) -> u64 {
        self.lines
            .iter()
            .map(|line| u64::from(line.quantity.get()))
            .sum()
    }

    /// Total price of the cart against a catalog.
    ///
    /// A line whose product is missing from the catalog contributes zero but
    /// stays in the cart: it cannot be priced yet, which is not the same as
    /// not existing.
    #[must_use]
    pub fn total_amount(&self, catalog: &Catalog) -> Decimal {
        self.lines
            .iter()
            .filter_map(|line| {
                catalog
                    .get(&line.product_id)
                    .map(|entry| entry.price().times(line.quantity.get()))
            })
            .sum()
    }
}

impl From<Vec<CartLine>> for Cart {
    fn from(lines: Vec<CartLine>) -> Self {
        Self::from_lines(lines)
    }
}

/// A persisted line before its quantity is checked.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLine {
    product_id: ProductId,
    #[serde(default)]
    quantity: i64,
}

impl<'de> Deserialize<'de> for Cart {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let lines = Vec::<RawLine>::deserialize(deserializer)?;
        Ok(Self::from_raw(
            lines
                .into_iter()
                .map(|line| (line.product_id, line.quantity)),
        ))
    }
}

impl From<Cart> for Vec<CartLine> {
    fn from(cart: Cart) -> Self {
        cart.lines
    }
}
