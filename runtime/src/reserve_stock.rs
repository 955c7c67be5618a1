//! Batch reservation of independent order line items.
//!
//! Demand is aggregated per SKU before any inventory is touched, so a SKU
//! listed on two lines is checked against its combined quantity. The batch
//! is all-or-nothing: every check runs before the first write and all
//! writes share one transaction.

use crate::config::Config;
use crate::environment::StockEnvironment;
use crate::error::{Result, StockError};
use crate::metrics::ReservationMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use stockpile_core::inventory::Inventory;
use stockpile_core::quantity::Quantity;
use stockpile_core::reservation::Reservation;
use stockpile_core::types::{OrderId, ReservationId, SkuId};

/// One order line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveStockItem {
    /// SKU to reserve.
    pub sku_id: String,
    /// Units to reserve; must be positive.
    pub quantity: i64,
}

/// Request to reserve every line of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveStockCommand {
    /// Order the reservations belong to.
    pub order_id: String,
    /// Lines to reserve.
    pub items: Vec<ReserveStockItem>,
    /// Reservation TTL override in seconds.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// Reservation made for one order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemReservation {
    /// Index of the line in the command.
    pub line: usize,
    /// Reserved SKU.
    pub sku_id: SkuId,
    /// New reservation.
    pub reservation_id: ReservationId,
    /// Units reserved.
    pub quantity: Quantity,
    /// When the reservation lapses unless confirmed.
    pub expires_at: DateTime<Utc>,
}

/// Reservations made for an order, one per line in command order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStockResponse {
    /// Order the reservations belong to.
    pub order_id: OrderId,
    /// One entry per line item.
    pub reservations: Vec<LineItemReservation>,
}

struct Line {
    sku_id: SkuId,
    quantity: Quantity,
}

/// Reserves all lines of an order or none of them.
#[derive(Debug, Clone)]
pub struct ReserveStockService {
    env: StockEnvironment,
    config: Config,
}

impl ReserveStockService {
    /// Create the service.
    #[must_use]
    pub const fn new(env: StockEnvironment, config: Config) -> Self {
        Self { env, config }
    }

    /// Reserve every line of `command`.
    ///
    /// # Errors
    ///
    /// - [`StockError::Validation`] for a blank order id, no lines, a blank
    ///   SKU, a non-positive quantity, or an invalid TTL
    /// - [`StockError::SkuNotFound`] listing the first missing SKUs
    /// - [`StockError::InsufficientStock`] for the first SKU whose combined
    ///   demand exceeds what is available
    /// - [`StockError::Repository`] on persistence faults
    ///
    /// Nothing is written when an error is returned.
    pub async fn execute(&self, command: ReserveStockCommand) -> Result<ReserveStockResponse> {
        let order_id = OrderId::new(command.order_id)?;
        let lines = validate_lines(&command.items)?;
        let ttl = self.config.reservation.resolve_ttl(command.ttl_secs)?;
        let demand = aggregate(&lines)?;
        let now = self.env.clock.now();

        let tx = self.env.unit_of_work.begin().await?;

        let sku_ids: Vec<SkuId> = demand.keys().cloned().collect();
        let mut inventories: HashMap<SkuId, Inventory> = HashMap::with_capacity(sku_ids.len());
        for chunk in sku_ids.chunks(self.config.reservation.batch_size.max(1)) {
            inventories.extend(tx.inventories().load_by_sku_ids_with_lock(chunk).await?);
        }

        let missing: Vec<SkuId> = sku_ids
            .iter()
            .filter(|sku_id| !inventories.contains_key(*sku_id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            tracing::warn!(
                order_id = %order_id,
                missing = missing.len(),
                "Batch reservation rejected: unknown SKUs"
            );
            ReservationMetrics::record_outcome("failed");
            return Err(StockError::sku_not_found(
                missing,
                self.config.reservation.missing_sku_report_limit,
            ));
        }

        for (sku_id, requested) in &demand {
            let Some(inventory) = inventories.get(sku_id) else {
                continue;
            };
            let available = inventory.available_quantity();
            if !available.is_at_least(*requested) {
                tracing::warn!(
                    order_id = %order_id,
                    sku_id = %sku_id,
                    available = available.value(),
                    requested = requested.value(),
                    "Batch reservation rejected: insufficient stock"
                );
                ReservationMetrics::record_outcome("insufficient");
                return Err(StockError::InsufficientStock {
                    sku_id: sku_id.clone(),
                    available,
                    requested: *requested,
                });
            }
        }

        let mut reservations = Vec::with_capacity(lines.len());
        let mut created = Vec::with_capacity(lines.len());
        for (line, item) in lines.iter().enumerate() {
            let inventory = inventories.get_mut(&item.sku_id).ok_or_else(|| {
                StockError::InvalidInventory(format!("inventory not loaded for SKU {}", item.sku_id))
            })?;
            let reservation_id = inventory.reserve(item.quantity)?;
            let reservation = Reservation::create_with_ttl(
                reservation_id,
                item.sku_id.clone(),
                item.quantity,
                order_id.clone(),
                ttl,
                now,
            )?;
            created.push(LineItemReservation {
                line,
                sku_id: item.sku_id.clone(),
                reservation_id,
                quantity: item.quantity,
                expires_at: reservation.expires_at(),
            });
            reservations.push(reservation);
        }

        let touched: Vec<Inventory> = sku_ids
            .iter()
            .filter_map(|sku_id| inventories.remove(sku_id))
            .collect();
        tx.inventories().save_all(&touched).await?;
        tx.reservations().save_all(&reservations).await?;
        tx.commit().await?;

        ReservationMetrics::record_outcome("reserved");
        ReservationMetrics::record_items(created.len());
        tracing::info!(
            order_id = %order_id,
            lines = created.len(),
            skus = sku_ids.len(),
            "Batch reservation committed"
        );
        Ok(ReserveStockResponse {
            order_id,
            reservations: created,
        })
    }
}

fn validate_lines(items: &[ReserveStockItem]) -> Result<Vec<Line>> {
    if items.is_empty() {
        return Err(StockError::Validation(
            "order must contain at least one item".to_string(),
        ));
    }
    items
        .iter()
        .map(|item| {
            let sku_id = SkuId::new(item.sku_id.as_str())?;
            let quantity = Quantity::try_from(item.quantity)?;
            if quantity.is_zero() {
                return Err(StockError::Validation(format!(
                    "quantity for SKU {sku_id} must be greater than zero"
                )));
            }
            Ok(Line { sku_id, quantity })
        })
        .collect()
}

fn aggregate(lines: &[Line]) -> Result<BTreeMap<SkuId, Quantity>> {
    let mut demand: BTreeMap<SkuId, Quantity> = BTreeMap::new();
    for line in lines {
        let entry = demand.entry(line.sku_id.clone()).or_default();
        *entry = entry.add(line.quantity)?;
    }
    Ok(demand)
}
