//! Stock movements: the append-only ledger of changes to on-hand stock.
//!
//! Every change to an inventory's total (a receipt, a confirmed sale, a
//! manual adjustment) is recorded as one [`StockMovement`], written in the
//! same transaction as the inventory it describes.

use crate::quantity::Quantity;
use crate::types::{IdentifierError, SkuId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised when building a [`StockMovement`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StockMovementError {
    /// The moved quantity was zero.
    #[error("movement quantity for SKU {0} must be greater than zero")]
    ZeroQuantity(SkuId),

    /// The reference was empty or whitespace.
    #[error("movement reference for SKU {0} must not be blank")]
    BlankReference(SkuId),
}

/// Unique identifier for a stock movement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MovementId(Uuid);

impl MovementId {
    /// Creates a new random `MovementId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MovementId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for MovementId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| IdentifierError::Malformed {
                kind: "movement id",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for MovementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction and cause of a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    /// Stock received against a purchase order.
    Receive,
    /// Stock announced but not yet on hand.
    Inbound,
    /// Stock leaving the warehouse, e.g. a confirmed reservation.
    Outbound,
    /// Manual correction.
    Adjustment,
}

impl MovementType {
    /// `true` for movements that add to on-hand stock.
    #[must_use]
    pub const fn is_inbound(self) -> bool {
        matches!(self, Self::Receive | Self::Inbound)
    }

    /// `true` for movements that remove on-hand stock.
    #[must_use]
    pub const fn is_outbound(self) -> bool {
        matches!(self, Self::Outbound)
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Receive => "RECEIVE",
            Self::Inbound => "INBOUND",
            Self::Outbound => "OUTBOUND",
            Self::Adjustment => "ADJUSTMENT",
        };
        f.write_str(s)
    }
}

/// One recorded change to a SKU's on-hand stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StockMovementRecord")]
pub struct StockMovement {
    id: MovementId,
    sku_id: SkuId,
    movement_type: MovementType,
    quantity: Quantity,
    reference: String,
    timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct StockMovementRecord {
    id: MovementId,
    sku_id: SkuId,
    movement_type: MovementType,
    quantity: Quantity,
    reference: String,
    timestamp: DateTime<Utc>,
}

impl TryFrom<StockMovementRecord> for StockMovement {
    type Error = StockMovementError;

    fn try_from(record: StockMovementRecord) -> Result<Self, Self::Error> {
        Self::restore(
            record.id,
            record.sku_id,
            record.movement_type,
            record.quantity,
            record.reference,
            record.timestamp,
        )
    }
}

impl StockMovement {
    /// Records a new movement with a fresh id.
    ///
    /// # Errors
    ///
    /// Fails if `quantity` is zero or `reference` is blank.
    pub fn create(
        sku_id: SkuId,
        movement_type: MovementType,
        quantity: Quantity,
        reference: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, StockMovementError> {
        Self::restore(
            MovementId::new(),
            sku_id,
            movement_type,
            quantity,
            reference,
            timestamp,
        )
    }

    /// Rebuilds a persisted movement.
    ///
    /// # Errors
    ///
    /// Same as [`StockMovement::create`].
    pub fn restore(
        id: MovementId,
        sku_id: SkuId,
        movement_type: MovementType,
        quantity: Quantity,
        reference: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, StockMovementError> {
        if quantity.is_zero() {
            return Err(StockMovementError::ZeroQuantity(sku_id));
        }
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(StockMovementError::BlankReference(sku_id));
        }
        Ok(Self {
            id,
            sku_id,
            movement_type,
            quantity,
            reference,
            timestamp,
        })
    }

    /// Movement id.
    #[must_use]
    pub const fn id(&self) -> &MovementId {
        &self.id
    }

    /// SKU whose stock moved.
    #[must_use]
    pub const fn sku_id(&self) -> &SkuId {
        &self.sku_id
    }

    /// Kind of movement.
    #[must_use]
    pub const fn movement_type(&self) -> MovementType {
        self.movement_type
    }

    /// Units moved.
    #[must_use]
    pub const fn quantity(&self) -> Quantity {
        self.quantity
    }

    /// External reference (purchase order, order id, audit note).
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// When the movement happened.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sku() -> SkuId {
        SkuId::new("SKU001").unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn create_validates_quantity_and_reference() {
        let movement =
            StockMovement::create(sku(), MovementType::Receive, Quantity::new(5), "PO-1", t0())
                .unwrap();
        assert_eq!(movement.quantity(), Quantity::new(5));
        assert_eq!(movement.reference(), "PO-1");
        assert!(movement.movement_type().is_inbound());

        assert_eq!(
            StockMovement::create(sku(), MovementType::Receive, Quantity::zero(), "PO-1", t0()),
            Err(StockMovementError::ZeroQuantity(sku()))
        );
        assert_eq!(
            StockMovement::create(sku(), MovementType::Outbound, Quantity::new(1), "  ", t0()),
            Err(StockMovementError::BlankReference(sku()))
        );
    }

    #[test]
    fn deserialization_goes_through_validation() {
        let movement =
            StockMovement::create(sku(), MovementType::Outbound, Quantity::new(2), "ORDER-1", t0())
                .unwrap();
        let json = serde_json::to_string(&movement).unwrap();
        assert_eq!(serde_json::from_str::<StockMovement>(&json).unwrap(), movement);

        let zero = json.replace("\"quantity\":2", "\"quantity\":0");
        assert!(serde_json::from_str::<StockMovement>(&zero).is_err());
    }
}
