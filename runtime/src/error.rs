//! Error taxonomy for the reservation services.
//!
//! Errors fall into four groups:
//!
//! - **Validation**: malformed input, never retried
//! - **Business**: insufficient stock, invalid state, corrupt bookkeeping
//! - **Not found**: missing SKUs, reservations, or inventories
//! - **Infrastructure**: lock store or persistence faults, possibly transient

use std::fmt::Write as _;
use stockpile_core::inventory::InventoryError;
use stockpile_core::lock::LockError;
use stockpile_core::movement::StockMovementError;
use stockpile_core::quantity::{Quantity, QuantityError};
use stockpile_core::repository::RepositoryError;
use stockpile_core::reservation::ReservationError;
use stockpile_core::sku_mapping::SkuMappingError;
use stockpile_core::types::{IdentifierError, SkuId};
use thiserror::Error;

/// Result type for the reservation services.
pub type Result<T> = std::result::Result<T, StockError>;

/// Errors returned by the reservation services.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StockError {
    /// Input failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Not enough stock to satisfy the request.
    #[error("Insufficient stock for SKU {sku_id}: available {available}, requested {requested}")]
    InsufficientStock {
        /// SKU that is short.
        sku_id: SkuId,
        /// Quantity available.
        available: Quantity,
        /// Quantity requested.
        requested: Quantity,
    },

    /// One or more requested SKUs have no inventory.
    #[error("{}", describe_missing(.missing, .remaining))]
    SkuNotFound {
        /// The first missing SKU ids, sorted.
        missing: Vec<SkuId>,
        /// How many more were missing beyond those listed.
        remaining: usize,
    },

    /// No reservation exists with the given id.
    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    /// Inventory bookkeeping is missing or inconsistent.
    #[error("Invalid inventory: {0}")]
    InvalidInventory(String),

    /// A reservation state transition was rejected.
    #[error("Invalid reservation state: {0}")]
    InvalidState(String),

    /// The lock could not be acquired before the wait timeout.
    #[error("Lock not acquired within timeout: {key}")]
    LockUnavailable {
        /// Lock key that was contended.
        key: String,
    },

    /// The lock store failed.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The persistence layer failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl StockError {
    /// Concurrency and infrastructure faults a caller may retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockUnavailable { .. }
                | Self::Lock(_)
                | Self::Repository(RepositoryError::ConcurrencyConflict { .. } | RepositoryError::Database(_))
        )
    }

    /// Expected business outcomes rather than faults.
    #[must_use]
    pub const fn is_business_failure(&self) -> bool {
        matches!(
            self,
            Self::InsufficientStock { .. }
                | Self::SkuNotFound { .. }
                | Self::InvalidInventory(_)
                | Self::InvalidState(_)
        )
    }

    /// Builds a [`StockError::SkuNotFound`] listing at most `limit` ids.
    #[must_use]
    pub fn sku_not_found(mut missing: Vec<SkuId>, limit: usize) -> Self {
        missing.sort();
        let remaining = missing.len().saturating_sub(limit);
        missing.truncate(limit);
        Self::SkuNotFound { missing, remaining }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn describe_missing(missing: &[SkuId], remaining: &usize) -> String {
    let mut message = String::from("SKUs not found: ");
    let ids: Vec<&str> = missing.iter().map(SkuId::as_str).collect();
    message.push_str(&ids.join(", "));
    if *remaining > 0 {
        let _ = write!(message, " and {remaining} more");
    }
    message
}

impl From<InventoryError> for StockError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::InsufficientStock {
                sku_id,
                available,
                requested,
            } => Self::InsufficientStock {
                sku_id,
                available,
                requested,
            },
            InventoryError::InsufficientTotal {
                sku_id,
                total,
                requested,
            } => Self::InsufficientStock {
                sku_id,
                available: total,
                requested,
            },
            InventoryError::InvalidInventory { .. } | InventoryError::Quantity(_) => {
                Self::InvalidInventory(err.to_string())
            }
        }
    }
}

impl From<ReservationError> for StockError {
    fn from(err: ReservationError) -> Self {
        match err {
            ReservationError::Invalid(reason) => Self::Validation(reason),
            ReservationError::InvalidState(reason) => Self::InvalidState(reason),
        }
    }
}

impl From<IdentifierError> for StockError {
    fn from(err: IdentifierError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<SkuMappingError> for StockError {
    fn from(err: SkuMappingError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<StockMovementError> for StockError {
    fn from(err: StockMovementError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<QuantityError> for StockError {
    fn from(err: QuantityError) -> Self {
        Self::Validation(err.to_string())
    }
}
