//! The Inventory aggregate: on-hand and reserved stock for one SKU.
//!
//! The aggregate enforces `reserved ≤ total` on every mutation but provides no
//! concurrency control of its own. Callers mutate it only while holding
//! exclusive access to the persisted row (a distributed lock, a pessimistic row
//! lock, or an optimistic version check on save).

use crate::quantity::{Quantity, QuantityError};
use crate::types::{ReservationId, SkuId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by [`Inventory`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// Requested quantity exceeds what is available for reservation.
    #[error("Insufficient stock for SKU {sku_id}: available {available}, requested {requested}")]
    InsufficientStock {
        /// SKU that is short.
        sku_id: SkuId,
        /// Quantity currently available.
        available: Quantity,
        /// Quantity that was requested.
        requested: Quantity,
    },

    /// A direct deduction exceeds the total on-hand quantity.
    #[error("Insufficient stock for SKU {sku_id}: total {total}, requested {requested}")]
    InsufficientTotal {
        /// SKU that is short.
        sku_id: SkuId,
        /// Total on-hand quantity.
        total: Quantity,
        /// Quantity that was requested.
        requested: Quantity,
    },

    /// The operation would break the aggregate's bookkeeping.
    #[error("Invalid inventory for SKU {sku_id}: {reason}")]
    InvalidInventory {
        /// SKU whose inventory rejected the operation.
        sku_id: SkuId,
        /// Human-readable reason.
        reason: String,
    },

    /// Arithmetic failure while updating quantities.
    #[error("Quantity error: {0}")]
    Quantity(#[from] QuantityError),
}

/// Stock bookkeeping for a single SKU.
///
/// # Example
///
/// ```
/// use stockpile_core::inventory::Inventory;
/// use stockpile_core::quantity::Quantity;
/// use stockpile_core::types::SkuId;
///
/// let mut inventory = Inventory::with_initial_stock(SkuId::new("SKU001").unwrap(), Quantity::new(100));
/// inventory.reserve(Quantity::new(30)).unwrap();
/// assert_eq!(inventory.available_quantity(), Quantity::new(70));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "InventoryRecord")]
pub struct Inventory {
    sku_id: SkuId,
    total_quantity: Quantity,
    reserved_quantity: Quantity,
    version: u64,
}

/// Wire shape of [`Inventory`]; validated through [`Inventory::restore`].
#[derive(Deserialize)]
struct InventoryRecord {
    sku_id: SkuId,
    total_quantity: Quantity,
    reserved_quantity: Quantity,
    #[serde(default)]
    version: u64,
}

impl TryFrom<InventoryRecord> for Inventory {
    type Error = InventoryError;

    fn try_from(record: InventoryRecord) -> Result<Self, Self::Error> {
        Self::restore(
            record.sku_id,
            record.total_quantity,
            record.reserved_quantity,
            record.version,
        )
    }
}

impl Inventory {
    /// Creates an empty inventory (`total = reserved = 0`).
    #[must_use]
    pub const fn empty(sku_id: SkuId) -> Self {
        Self {
            sku_id,
            total_quantity: Quantity::zero(),
            reserved_quantity: Quantity::zero(),
            version: 0,
        }
    }

    /// Creates an inventory holding `initial` units with nothing reserved.
    #[must_use]
    pub const fn with_initial_stock(sku_id: SkuId, initial: Quantity) -> Self {
        Self {
            sku_id,
            total_quantity: initial,
            reserved_quantity: Quantity::zero(),
            version: 0,
        }
    }

    /// Rebuilds an inventory from persisted state.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::InvalidInventory`] if `reserved > total`.
    pub fn restore(
        sku_id: SkuId,
        total_quantity: Quantity,
        reserved_quantity: Quantity,
        version: u64,
    ) -> Result<Self, InventoryError> {
        if reserved_quantity > total_quantity {
            return Err(InventoryError::InvalidInventory {
                reason: format!(
                    "reserved quantity {reserved_quantity} exceeds total quantity {total_quantity}"
                ),
                sku_id,
            });
        }
        Ok(Self {
            sku_id,
            total_quantity,
            reserved_quantity,
            version,
        })
    }

    /// The SKU this inventory tracks.
    #[must_use]
    pub const fn sku_id(&self) -> &SkuId {
        &self.sku_id
    }

    /// Total on-hand quantity.
    #[must_use]
    pub const fn total_quantity(&self) -> Quantity {
        self.total_quantity
    }

    /// Quantity held by outstanding reservations.
    #[must_use]
    pub const fn reserved_quantity(&self) -> Quantity {
        self.reserved_quantity
    }

    /// Optimistic concurrency version of the persisted row this was loaded from.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns a copy stamped with a new persisted version.
    ///
    /// Persistence adapters call this after a successful write.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// `total - reserved`, never negative.
    #[must_use]
    pub fn available_quantity(&self) -> Quantity {
        self.total_quantity
            .subtract(self.reserved_quantity)
            .unwrap_or_default()
    }

    /// Returns `true` if `quantity` can be reserved right now.
    #[must_use]
    pub fn can_reserve(&self, quantity: Quantity) -> bool {
        self.available_quantity().is_at_least(quantity)
    }

    /// Returns `true` when both quantities are zero.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total_quantity.is_zero() && self.reserved_quantity.is_zero()
    }

    /// Adds received stock to the total.
    ///
    /// # Errors
    ///
    /// Fails if `quantity` is zero or the total would overflow.
    pub fn receive(&mut self, quantity: Quantity, reference: &str) -> Result<(), InventoryError> {
        self.require_positive(quantity, "received quantity must be greater than zero")?;
        self.total_quantity = self.total_quantity.add(quantity)?;
        tracing::debug!(
            sku_id = %self.sku_id,
            quantity = quantity.value(),
            reference,
            "Stock received"
        );
        Ok(())
    }

    /// Reserves `quantity` and returns the id the caller should persist a
    /// reservation under.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::InvalidInventory`] if `quantity` is zero
    /// - [`InventoryError::InsufficientStock`] if `quantity > available`
    pub fn reserve(&mut self, quantity: Quantity) -> Result<ReservationId, InventoryError> {
        self.require_positive(quantity, "reserved quantity must be greater than zero")?;
        if !self.can_reserve(quantity) {
            return Err(InventoryError::InsufficientStock {
                sku_id: self.sku_id.clone(),
                available: self.available_quantity(),
                requested: quantity,
            });
        }
        self.reserved_quantity = self.reserved_quantity.add(quantity)?;
        Ok(ReservationId::new())
    }

    /// Returns reserved quantity to the available pool.
    ///
    /// # Errors
    ///
    /// Fails with [`InventoryError::InvalidInventory`] if `quantity` is zero or
    /// exceeds the currently reserved amount (a double release).
    pub fn release_reserved_quantity(&mut self, quantity: Quantity) -> Result<(), InventoryError> {
        self.require_positive(quantity, "released quantity must be greater than zero")?;
        self.require_reserved(quantity, "release")?;
        self.reserved_quantity = self.reserved_quantity.subtract(quantity)?;
        Ok(())
    }

    /// Releases the quantity held by a specific reservation.
    ///
    /// # Errors
    ///
    /// Same as [`Inventory::release_reserved_quantity`].
    pub fn release_reservation(
        &mut self,
        _reservation_id: &ReservationId,
        quantity: Quantity,
    ) -> Result<(), InventoryError> {
        self.release_reserved_quantity(quantity)
    }

    /// Converts a reservation into an actual stock deduction:
    /// both `total` and `reserved` drop by `quantity`.
    ///
    /// # Errors
    ///
    /// Fails with [`InventoryError::InvalidInventory`] if `quantity` is zero or
    /// exceeds the currently reserved amount.
    pub fn confirm_reservation(
        &mut self,
        _reservation_id: &ReservationId,
        quantity: Quantity,
    ) -> Result<(), InventoryError> {
        self.require_positive(quantity, "confirmed quantity must be greater than zero")?;
        self.require_reserved(quantity, "confirm")?;
        self.total_quantity = self.total_quantity.subtract(quantity)?;
        self.reserved_quantity = self.reserved_quantity.subtract(quantity)?;
        Ok(())
    }

    /// Removes stock from the total directly, bypassing reservations.
    ///
    /// # Errors
    ///
    /// Fails with [`InventoryError::InsufficientTotal`] if `quantity > total`,
    /// or [`InventoryError::InvalidInventory`] if the deduction would leave
    /// less on hand than is already reserved.
    pub fn deduct(&mut self, quantity: Quantity, reference: &str) -> Result<(), InventoryError> {
        if quantity > self.total_quantity {
            return Err(InventoryError::InsufficientTotal {
                sku_id: self.sku_id.clone(),
                total: self.total_quantity,
                requested: quantity,
            });
        }
        let remaining = self.total_quantity.subtract(quantity)?;
        if remaining < self.reserved_quantity {
            return Err(InventoryError::InvalidInventory {
                sku_id: self.sku_id.clone(),
                reason: format!(
                    "deducting {quantity} ({reference}) would leave {remaining} on hand with {} reserved",
                    self.reserved_quantity
                ),
            });
        }
        self.total_quantity = remaining;
        tracing::debug!(
            sku_id = %self.sku_id,
            quantity = quantity.value(),
            reference,
            "Stock deducted"
        );
        Ok(())
    }

    fn require_positive(&self, quantity: Quantity, reason: &str) -> Result<(), InventoryError> {
        if quantity.is_zero() {
            return Err(InventoryError::InvalidInventory {
                sku_id: self.sku_id.clone(),
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    fn require_reserved(&self, quantity: Quantity, action: &str) -> Result<(), InventoryError> {
        if self.reserved_quantity < quantity {
            return Err(InventoryError::InvalidInventory {
                sku_id: self.sku_id.clone(),
                reason: format!(
                    "cannot {action} {quantity}: only {} reserved",
                    self.reserved_quantity
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    fn sku() -> SkuId {
        SkuId::new("SKU001").unwrap()
    }

    #[test]
    fn reserve_then_release_restores_availability() {
        let mut inventory = Inventory::with_initial_stock(sku(), Quantity::new(100));

        inventory.reserve(Quantity::new(30)).unwrap();
        assert_eq!(inventory.available_quantity(), Quantity::new(70));

        inventory.release_reserved_quantity(Quantity::new(30)).unwrap();
        assert_eq!(inventory.available_quantity(), Quantity::new(100));
        assert_eq!(inventory.reserved_quantity(), Quantity::zero());
    }

    #[test]
    fn reserve_beyond_available_is_insufficient() {
        let mut inventory = Inventory::with_initial_stock(sku(), Quantity::new(10));
        inventory.reserve(Quantity::new(8)).unwrap();

        let err = inventory.reserve(Quantity::new(3)).unwrap_err();
        assert_eq!(
            err,
            InventoryError::InsufficientStock {
                sku_id: sku(),
                available: Quantity::new(2),
                requested: Quantity::new(3),
            }
        );
        assert_eq!(inventory.reserved_quantity(), Quantity::new(8));
    }

    #[test]
    fn zero_quantity_operations_are_rejected() {
        let mut inventory = Inventory::with_initial_stock(sku(), Quantity::new(10));
        assert!(matches!(
            inventory.reserve(Quantity::zero()),
            Err(InventoryError::InvalidInventory { .. })
        ));
        assert!(matches!(
            inventory.receive(Quantity::zero(), "PO-1"),
            Err(InventoryError::InvalidInventory { .. })
        ));
        assert!(matches!(
            inventory.release_reserved_quantity(Quantity::zero()),
            Err(InventoryError::InvalidInventory { .. })
        ));
    }

    #[test]
    fn double_release_is_rejected() {
        let mut inventory = Inventory::with_initial_stock(sku(), Quantity::new(10));
        let id = inventory.reserve(Quantity::new(5)).unwrap();

        inventory.release_reservation(&id, Quantity::new(5)).unwrap();
        let err = inventory.release_reservation(&id, Quantity::new(5)).unwrap_err();
        assert!(matches!(err, InventoryError::InvalidInventory { .. }));
    }

    #[test]
    fn confirm_deducts_total_and_reserved() {
        let mut inventory = Inventory::with_initial_stock(sku(), Quantity::new(50));
        let id = inventory.reserve(Quantity::new(20)).unwrap();

        inventory.confirm_reservation(&id, Quantity::new(20)).unwrap();
        assert_eq!(inventory.total_quantity(), Quantity::new(30));
        assert_eq!(inventory.reserved_quantity(), Quantity::zero());
        assert_eq!(inventory.available_quantity(), Quantity::new(30));
    }

    #[test]
    fn confirm_more_than_reserved_fails() {
        let mut inventory = Inventory::with_initial_stock(sku(), Quantity::new(50));
        let id = inventory.reserve(Quantity::new(5)).unwrap();
        assert!(inventory.confirm_reservation(&id, Quantity::new(6)).is_err());
        assert_eq!(inventory.total_quantity(), Quantity::new(50));
    }

    #[test]
    fn deduct_checks_total() {
        let mut inventory = Inventory::with_initial_stock(sku(), Quantity::new(10));
        assert_eq!(
            inventory.deduct(Quantity::new(11), "damaged").unwrap_err(),
            InventoryError::InsufficientTotal {
                sku_id: sku(),
                total: Quantity::new(10),
                requested: Quantity::new(11),
            }
        );
        inventory.deduct(Quantity::new(4), "damaged").unwrap();
        assert_eq!(inventory.total_quantity(), Quantity::new(6));
    }

    #[test]
    fn deduct_cannot_undercut_reservations() {
        let mut inventory = Inventory::with_initial_stock(sku(), Quantity::new(10));
        inventory.reserve(Quantity::new(8)).unwrap();
        assert!(matches!(
            inventory.deduct(Quantity::new(5), "audit"),
            Err(InventoryError::InvalidInventory { .. })
        ));
    }

    #[test]
    fn restore_rejects_reserved_above_total() {
        assert!(Inventory::restore(sku(), Quantity::new(5), Quantity::new(6), 1).is_err());
        let restored = Inventory::restore(sku(), Quantity::new(5), Quantity::new(5), 3).unwrap();
        assert_eq!(restored.version(), 3);
        assert_eq!(restored.available_quantity(), Quantity::zero());
    }

    #[test]
    fn empty_inventory() {
        let mut inventory = Inventory::empty(sku());
        assert!(inventory.is_empty());
        inventory.receive(Quantity::new(3), "PO-7").unwrap();
        assert!(!inventory.is_empty());
    }

    #[test]
    fn deserialization_enforces_reserved_within_total() {
        let mut inventory = Inventory::with_initial_stock(sku(), Quantity::new(10));
        inventory.reserve(Quantity::new(4)).unwrap();
        let json = serde_json::to_string(&inventory.clone().with_version(2)).unwrap();
        let decoded: Inventory = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, inventory.with_version(2));

        let corrupt = r#"{"sku_id":"A","total_quantity":5,"reserved_quantity":10,"version":0}"#;
        let err = serde_json::from_str::<Inventory>(corrupt).unwrap_err();
        assert!(err.to_string().contains("exceeds total quantity"));
    }
}
