//! Releasing a single reservation back to available stock.
//!
//! Works the same whether the reservation is inside its TTL or already
//! expired; expiry only blocks confirmation.

use crate::environment::StockEnvironment;
use crate::error::{Result, StockError};
use crate::metrics::ReservationMetrics;
use serde::{Deserialize, Serialize};
use stockpile_core::repository::Transaction;
use stockpile_core::reservation::Reservation;
use stockpile_core::types::{IdentifierError, ReservationId};

/// Request to release one reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseReservationCommand {
    /// Reservation id as supplied by the caller.
    pub reservation_id: String,
}

/// Releases reservations and returns their quantity to the inventory.
#[derive(Debug, Clone)]
pub struct ReleaseReservationService {
    env: StockEnvironment,
}

impl ReleaseReservationService {
    /// Create the service.
    #[must_use]
    pub const fn new(env: StockEnvironment) -> Self {
        Self { env }
    }

    /// Release the reservation named by `command`.
    ///
    /// # Errors
    ///
    /// - [`StockError::Validation`] for a blank id
    /// - [`StockError::ReservationNotFound`] if no such reservation exists
    /// - [`StockError::InvalidState`] if it is already released or confirmed
    /// - [`StockError::InvalidInventory`] if its inventory is missing or holds
    ///   less reserved stock than the reservation
    /// - [`StockError::Repository`] on persistence faults
    pub async fn release(&self, command: ReleaseReservationCommand) -> Result<Reservation> {
        let reservation_id = parse_reservation_id(&command.reservation_id)?;

        let tx = self.env.unit_of_work.begin().await?;
        let reservation = release_in_transaction(tx.as_ref(), &reservation_id).await?;
        tx.commit().await?;

        ReservationMetrics::record_release();
        tracing::info!(
            reservation_id = %reservation_id,
            sku_id = %reservation.sku_id(),
            quantity = reservation.quantity().value(),
            "Reservation released"
        );
        Ok(reservation)
    }
}

/// Parses a caller-supplied reservation id. A well-formed id that cannot exist
/// is reported as not found.
pub(crate) fn parse_reservation_id(raw: &str) -> Result<ReservationId> {
    raw.parse().map_err(|e| match e {
        IdentifierError::Blank(_) => StockError::Validation(e.to_string()),
        IdentifierError::Malformed { .. } => StockError::ReservationNotFound(raw.to_string()),
    })
}

/// Releases `reservation_id` and its inventory quantity within `tx`.
///
/// The caller commits. The reservation's state machine is checked before the
/// inventory is touched.
pub(crate) async fn release_in_transaction(
    tx: &dyn Transaction,
    reservation_id: &ReservationId,
) -> Result<Reservation> {
    let mut reservation = tx
        .reservations()
        .find_by_id(reservation_id)
        .await?
        .ok_or_else(|| StockError::ReservationNotFound(reservation_id.to_string()))?;

    reservation.release()?;

    let mut inventory = tx
        .inventories()
        .load(reservation.sku_id())
        .await?
        .ok_or_else(|| {
            StockError::InvalidInventory(format!(
                "inventory not found for SKU {}",
                reservation.sku_id()
            ))
        })?;

    inventory.release_reservation(reservation.id(), reservation.quantity())?;

    tx.inventories().save(&inventory).await?;
    tx.reservations().save(&reservation).await?;
    Ok(reservation)
}
