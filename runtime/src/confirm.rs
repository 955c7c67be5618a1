//! Confirming a reservation into an actual stock deduction.

use crate::environment::StockEnvironment;
use crate::error::{Result, StockError};
use crate::metrics::ReservationMetrics;
use crate::release::parse_reservation_id;
use serde::{Deserialize, Serialize};
use stockpile_core::movement::{MovementType, StockMovement};
use stockpile_core::reservation::Reservation;

/// Request to confirm one reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmReservationCommand {
    /// Reservation id as supplied by the caller.
    pub reservation_id: String,
}

/// Converts active reservations into deductions from on-hand stock.
#[derive(Debug, Clone)]
pub struct ConfirmReservationService {
    env: StockEnvironment,
}

impl ConfirmReservationService {
    /// Create the service.
    #[must_use]
    pub const fn new(env: StockEnvironment) -> Self {
        Self { env }
    }

    /// Confirm the reservation named by `command`, recording an `OUTBOUND`
    /// movement against the order.
    ///
    /// # Errors
    ///
    /// - [`StockError::ReservationNotFound`] if no such reservation exists
    /// - [`StockError::InvalidState`] if it is expired, released, or already confirmed
    /// - [`StockError::InvalidInventory`] if its inventory is missing or inconsistent
    /// - [`StockError::Repository`] on persistence faults
    pub async fn confirm(&self, command: ConfirmReservationCommand) -> Result<Reservation> {
        let reservation_id = parse_reservation_id(&command.reservation_id)?;
        let now = self.env.clock.now();

        let tx = self.env.unit_of_work.begin().await?;
        let mut reservation = tx
            .reservations()
            .find_by_id(&reservation_id)
            .await?
            .ok_or_else(|| StockError::ReservationNotFound(reservation_id.to_string()))?;

        reservation.confirm(now)?;

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
        inventory.confirm_reservation(reservation.id(), reservation.quantity())?;
        let movement = StockMovement::create(
            reservation.sku_id().clone(),
            MovementType::Outbound,
            reservation.quantity(),
            reservation.order_id().to_string(),
            now,
        )?;

        tx.inventories().save(&inventory).await?;
        tx.reservations().save(&reservation).await?;
        tx.movements().save(&movement).await?;
        tx.commit().await?;

        ReservationMetrics::record_confirm();
        tracing::info!(
            reservation_id = %reservation_id,
            sku_id = %reservation.sku_id(),
            quantity = reservation.quantity().value(),
            "Reservation confirmed"
        );
        Ok(reservation)
    }
}
