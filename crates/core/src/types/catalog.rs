//! Normalized product catalog entries.
//!
//! Product documents from the backend are not uniform: depending on when a
//! product was created its price lives under `new_price`, `price` or
//! `offer_price`, and its image may be a string, a list, or `image_url`.
//! All of that is resolved once, when a document is ingested, into a
//! [`CatalogEntry`] with one canonical price and image. Readers never look at
//! the raw document again.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::ProductId;
use super::price::{Price, PriceError};

/// Price fields, in order of preference.
const PRICE_FIELDS: &[&str] = &["new_price", "newPrice", "price", "offer_price", "old_price"];

/// Image fields, in order of preference.
const IMAGE_FIELDS: &[&str] = &["image", "images", "image_url", "imageUrl", "thumbnail"];

/// Identifier fields, in order of preference.
const ID_FIELDS: &[&str] = &["id", "_id", "productId"];

/// Errors that can occur when normalizing a product document.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The document is not a JSON object.
    #[error("product document is not an object")]
    NotAnObject,
    /// No usable identifier field.
    #[error("product document has no id")]
    MissingId,
    /// No usable price field.
    #[error("product {0} has no price")]
    MissingPrice(ProductId),
    /// A price field was present but invalid.
    #[error("product {id} has an invalid price: {source}")]
    InvalidPrice {
        /// Product whose price failed to parse.
        id: ProductId,
        /// Underlying parse failure.
        source: PriceError,
    },
}

/// A product as the cart sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    id: ProductId,
    name: String,
    price: Price,
    image: Option<String>,
}

impl CatalogEntry {
    /// Create an entry from already-normalized parts.
    #[must_use]
    pub const fn new(id: ProductId, name: String, price: Price, image: Option<String>) -> Self {
        Self {
            id,
            name,
            price,
            image,
        }
    }

    /// Normalize a raw product document.
    ///
    /// # Errors
    ///
    /// Returns a `CatalogError` if the document has no id or no valid price.
    pub fn from_json(document: &Value) -> Result<Self, CatalogError> {
        let object = document.as_object().ok_or(CatalogError::NotAnObject)?;

        let id = ID_FIELDS
            .iter()
            .filter_map(|field| object.get(*field))
            .find_map(|value| match value {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .map(ProductId::new)
            .ok_or(CatalogError::MissingId)?;

        let raw_price = PRICE_FIELDS
            .iter()
            .filter_map(|field| object.get(*field))
            .find(|value| !value.is_null())
            .ok_or_else(|| CatalogError::MissingPrice(id.clone()))?;
        let price = Price::from_json(raw_price).map_err(|source| CatalogError::InvalidPrice {
            id: id.clone(),
            source,
        })?;

        let image = IMAGE_FIELDS
            .iter()
            .filter_map(|field| object.get(*field))
            .find_map(first_image);

        let name = ["name", "title"]
            .iter()
            .filter_map(|field| object.get(*field))
            .find_map(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        Ok(Self {
            id,
            name,
            price,
            image,
        })
    }

    /// Product identifier.
    #[must_use]
    pub const fn id(&self) -> &ProductId {
        &self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical unit price.
    #[must_use]
    pub const fn price(&self) -> Price {
        self.price
    }

    /// Canonical image URL.
    #[must_use]
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }
}

fn first_image(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(first_image),
        Value::Object(obj) => obj.get("url").and_then(first_image),
        _ => None,
    }
}

/// The product catalog supplied by the browsing screens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: HashMap<ProductId, CatalogEntry>,
}

impl Catalog {
    /// Build a catalog from normalized entries.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.id.clone(), entry))
                .collect(),
        }
    }

    /// Ingest a product listing response.
    ///
    /// Accepts either a bare array of product documents or an object with a
    /// `products` array. Documents that cannot be normalized are skipped;
    /// use [`Catalog::try_ingest`] to see why.
    #[must_use]
    pub fn ingest(listing: &Value) -> Self {
        let (catalog, _rejected) = Self::try_ingest(listing);
        catalog
    }

    /// Ingest a product listing, returning the rejected documents' errors.
    #[must_use]
    pub fn try_ingest(listing: &Value) -> (Self, Vec<CatalogError>) {
        let documents = match listing {
            Value::Array(items) => items.as_slice(),
            Value::Object(obj) => obj
                .get("products")
                .and_then(Value::as_array)
                .map_or(&[][..], Vec::as_slice),
            _ => &[],
        };

        let mut rejected = Vec::new();
        let entries: Vec<CatalogEntry> = documents
            .iter()
            .filter_map(|doc| {
                CatalogEntry::from_json(doc)
                    .map_err(|e| rejected.push(e))
                    .ok()
            })
            .collect();

        (Self::new(entries), rejected)
    }

    /// Look up a product.
    #[must_use]
    pub fn get(&self, id: &ProductId) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    /// Number of products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
