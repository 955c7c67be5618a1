//! SKU mappings for sellable product options.
//!
//! A [`SkuMapping`] says how many units of each SKU make up one "set" of a
//! product option. A single-SKU option maps one SKU to a quantity of one; a
//! bundle maps two or more distinct SKUs to positive per-set quantities.
//!
//! Entries are held in a `BTreeMap`, so iteration is always in lexicographic
//! SKU order. Lock acquisition relies on that ordering.

use crate::quantity::{Quantity, QuantityError};
use crate::types::SkuId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised when building a [`SkuMapping`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SkuMappingError {
    /// No entries were supplied.
    #[error("SKU mapping must contain at least one SKU")]
    Empty,

    /// A bundle was built with fewer than two distinct SKUs.
    #[error("bundle must contain at least 2 distinct SKUs, got {0}")]
    BundleTooSmall(usize),

    /// The same SKU appeared more than once.
    #[error("duplicate SKU in mapping: {0}")]
    DuplicateSku(SkuId),

    /// A per-set quantity was zero.
    #[error("quantity for SKU {0} must be greater than zero")]
    NonPositiveQuantity(SkuId),
}

/// Mapping from SKU to required quantity per set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SkuMappingRecord")]
pub struct SkuMapping {
    entries: BTreeMap<SkuId, Quantity>,
}

#[derive(Deserialize)]
struct SkuMappingRecord {
    entries: BTreeMap<SkuId, Quantity>,
}

impl TryFrom<SkuMappingRecord> for SkuMapping {
    type Error = SkuMappingError;

    fn try_from(record: SkuMappingRecord) -> Result<Self, Self::Error> {
        Self::new(record.entries)
    }
}

impl SkuMapping {
    /// A single SKU, one unit per set.
    #[must_use]
    pub fn single(sku_id: SkuId) -> Self {
        Self {
            entries: BTreeMap::from([(sku_id, Quantity::new(1))]),
        }
    }

    /// A bundle of at least two distinct SKUs.
    ///
    /// # Errors
    ///
    /// Fails on fewer than two entries, duplicates, or zero quantities.
    pub fn bundle(
        entries: impl IntoIterator<Item = (SkuId, Quantity)>,
    ) -> Result<Self, SkuMappingError> {
        let mapping = Self::new(entries)?;
        if mapping.entries.len() < 2 {
            return Err(SkuMappingError::BundleTooSmall(mapping.entries.len()));
        }
        Ok(mapping)
    }

    /// Any non-empty mapping of distinct SKUs to positive quantities.
    ///
    /// # Errors
    ///
    /// Fails on no entries, duplicates, or zero quantities.
    pub fn new(
        entries: impl IntoIterator<Item = (SkuId, Quantity)>,
    ) -> Result<Self, SkuMappingError> {
        let mut map = BTreeMap::new();
        for (sku_id, quantity) in entries {
            if quantity.is_zero() {
                return Err(SkuMappingError::NonPositiveQuantity(sku_id));
            }
            if map.contains_key(&sku_id) {
                return Err(SkuMappingError::DuplicateSku(sku_id));
            }
            map.insert(sku_id, quantity);
        }
        if map.is_empty() {
            return Err(SkuMappingError::Empty);
        }
        Ok(Self { entries: map })
    }

    /// `true` when more than one SKU is involved.
    #[must_use]
    pub fn is_bundle(&self) -> bool {
        self.entries.len() > 1
    }

    /// The only SKU, if this is not a bundle.
    #[must_use]
    pub fn single_sku_id(&self) -> Option<&SkuId> {
        if self.is_bundle() {
            return None;
        }
        self.entries.keys().next()
    }

    /// Per-set quantity for `sku_id`, zero when the SKU is not part of the mapping.
    #[must_use]
    pub fn quantity_for(&self, sku_id: &SkuId) -> Quantity {
        self.entries.get(sku_id).copied().unwrap_or_default()
    }

    /// SKUs in lexicographic order.
    pub fn sku_ids(&self) -> impl Iterator<Item = &SkuId> {
        self.entries.keys()
    }

    /// `(sku, per-set quantity)` pairs in lexicographic SKU order.
    pub fn iter(&self) -> impl Iterator<Item = (&SkuId, Quantity)> {
        self.entries.iter().map(|(sku, qty)| (sku, *qty))
    }

    /// Number of distinct SKUs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false` for a constructed mapping.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total quantity per SKU needed for `sets` sets.
    ///
    /// # Errors
    ///
    /// Returns [`QuantityError::Overflow`] if any product overflows.
    pub fn required_quantities(
        &self,
        sets: u32,
    ) -> Result<BTreeMap<SkuId, Quantity>, QuantityError> {
        self.entries
            .iter()
            .map(|(sku, per_set)| Ok((sku.clone(), per_set.times(sets)?)))
            .collect()
    }

    /// Sorted SKU ids joined by `:`, used to build composite lock keys.
    #[must_use]
    pub fn joined_sku_ids(&self) -> String {
        self.entries
            .keys()
            .map(SkuId::as_str)
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// A sellable option of a product, backed by one or more SKUs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductOption {
    name: String,
    mapping: SkuMapping,
}

impl ProductOption {
    /// Creates an option with an explicit mapping.
    #[must_use]
    pub fn new(name: impl Into<String>, mapping: SkuMapping) -> Self {
        Self {
            name: name.into(),
            mapping,
        }
    }

    /// Creates a single-SKU option.
    #[must_use]
    pub fn single(name: impl Into<String>, sku_id: SkuId) -> Self {
        Self::new(name, SkuMapping::single(sku_id))
    }

    /// Option name, unique within its product.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Underlying SKU mapping.
    #[must_use]
    pub const fn mapping(&self) -> &SkuMapping {
        &self.mapping
    }

    /// Shorthand for `self.mapping().is_bundle()`.
    #[must_use]
    pub fn is_bundle(&self) -> bool {
        self.mapping.is_bundle()
    }
}
