//! Receiving stock into an inventory.

use crate::environment::StockEnvironment;
use crate::error::{Result, StockError};
use serde::{Deserialize, Serialize};
use stockpile_core::inventory::Inventory;
use stockpile_core::movement::{MovementType, StockMovement};
use stockpile_core::quantity::Quantity;
use stockpile_core::types::SkuId;

/// Request to add received stock to a SKU.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveStockCommand {
    /// SKU receiving stock.
    pub sku_id: String,
    /// Units received; must be positive.
    pub quantity: i64,
    /// External reference, e.g. a purchase order number.
    pub reference: String,
}

/// Adds received stock, creating the inventory on first receipt.
#[derive(Debug, Clone)]
pub struct ReceiveStockService {
    env: StockEnvironment,
}

impl ReceiveStockService {
    /// Create the service.
    #[must_use]
    pub const fn new(env: StockEnvironment) -> Self {
        Self { env }
    }

    /// Apply `command` and return the updated inventory. A `RECEIVE`
    /// movement is written in the same transaction.
    ///
    /// # Errors
    ///
    /// - [`StockError::Validation`] for a blank SKU, blank reference, or non-positive quantity
    /// - [`StockError::Repository`] on persistence faults
    pub async fn receive(&self, command: ReceiveStockCommand) -> Result<Inventory> {
        let sku_id = SkuId::new(command.sku_id)?;
        let quantity = Quantity::try_from(command.quantity)?;
        if quantity.is_zero() {
            return Err(StockError::Validation(
                "received quantity must be greater than zero".to_string(),
            ));
        }

        let movement = StockMovement::create(
            sku_id.clone(),
            MovementType::Receive,
            quantity,
            command.reference.as_str(),
            self.env.clock.now(),
        )?;

        let tx = self.env.unit_of_work.begin().await?;
        let mut inventory = tx
            .inventories()
            .load(&sku_id)
            .await?
            .unwrap_or_else(|| Inventory::empty(sku_id.clone()));
        inventory.receive(quantity, &command.reference)?;
        tx.inventories().save(&inventory).await?;
        tx.movements().save(&movement).await?;
        tx.commit().await?;

        tracing::info!(
            sku_id = %sku_id,
            quantity = quantity.value(),
            movement_id = %movement.id(),
            reference = %command.reference,
            total = inventory.total_quantity().value(),
            "Stock received"
        );
        Ok(inventory)
    }
}
