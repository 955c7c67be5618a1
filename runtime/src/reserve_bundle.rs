//! Bundle reservation inside one transaction.
//!
//! Each bundle line expands into per-SKU requests (`mapping quantity ×
//! line quantity`). Demand is summed per SKU and checked against a single
//! batch read before any inventory is mutated. Business failures come back
//! as a `Failed` response and the transaction is dropped, so nothing from a
//! failed attempt is persisted.

use crate::config::Config;
use crate::environment::StockEnvironment;
use crate::error::{Result, StockError};
use crate::metrics::ReservationMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use stockpile_core::inventory::Inventory;
use stockpile_core::quantity::Quantity;
use stockpile_core::repository::Transaction;
use stockpile_core::reservation::Reservation;
use stockpile_core::types::{OrderId, ReservationId, SkuId};

/// SKU and quantity consumed by one unit of a bundle line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleSkuMapping {
    /// Component SKU.
    pub sku_id: String,
    /// Units of the SKU per bundle unit.
    pub quantity: i64,
}

/// One bundle line of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleItem {
    /// Product option the line was ordered as.
    pub product_option_id: String,
    /// Component SKUs.
    pub sku_mappings: Vec<BundleSkuMapping>,
    /// Bundle units ordered.
    pub quantity: i64,
}

/// Request to reserve every bundle line of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveBundleStockCommand {
    /// Caller's saga id, echoed in the response.
    pub saga_id: String,
    /// Order the reservations belong to.
    pub order_id: String,
    /// Bundle lines.
    pub bundle_items: Vec<BundleItem>,
    /// Reservation TTL override in seconds.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

/// Final status of a bundle reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BundleReservationStatus {
    /// Every request was reserved.
    Completed,
    /// Nothing was reserved.
    Failed,
}

impl fmt::Display for BundleReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Reservation made for one SKU request of a bundle line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuReservation {
    /// Reserved SKU.
    pub sku_id: SkuId,
    /// New reservation.
    pub reservation_id: ReservationId,
    /// Units reserved.
    pub quantity: Quantity,
    /// When the reservation lapses unless confirmed.
    pub expires_at: DateTime<Utc>,
    /// Reservation status at creation.
    pub status: stockpile_core::reservation::ReservationStatus,
}

/// Result of a bundle reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleReservationResponse {
    /// Caller's saga id.
    pub saga_id: String,
    /// Order the reservations belong to.
    pub order_id: OrderId,
    /// Final status.
    pub status: BundleReservationStatus,
    /// Reservations made; empty on failure.
    pub sku_reservations: Vec<SkuReservation>,
    /// Why nothing was reserved.
    pub failure_reason: Option<String>,
}

impl BundleReservationResponse {
    /// Whether every request was reserved.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == BundleReservationStatus::Completed
    }
}

#[derive(Debug, Clone, Copy)]
struct RawRequest<'a> {
    sku_id: &'a str,
    per_unit: u32,
    units: u32,
}

struct SkuRequest {
    sku_id: SkuId,
    quantity: Quantity,
}

/// Reserves all bundle lines of an order in one transaction.
#[derive(Debug, Clone)]
pub struct ReserveBundleStockService {
    env: StockEnvironment,
    config: Config,
}

impl ReserveBundleStockService {
    /// Create the service.
    #[must_use]
    pub const fn new(env: StockEnvironment, config: Config) -> Self {
        Self { env, config }
    }

    /// Reserve every bundle line of `command`.
    ///
    /// Insufficient stock, unknown SKUs, and quantity overflow produce a
    /// `Failed` response rather than an error.
    ///
    /// # Errors
    ///
    /// - [`StockError::Validation`] for malformed commands
    /// - [`StockError::Repository`] on persistence faults
    pub async fn execute(
        &self,
        command: ReserveBundleStockCommand,
    ) -> Result<BundleReservationResponse> {
        let saga_id = command.saga_id.trim().to_string();
        if saga_id.is_empty() {
            return Err(StockError::Validation("saga id must not be blank".to_string()));
        }
        let order_id = OrderId::new(command.order_id.as_str())?;
        let raw = validate_items(&command.bundle_items)?;
        let ttl = self.config.reservation.resolve_ttl(command.ttl_secs)?;

        match self.reserve_all(&raw, &order_id, ttl).await {
            Ok(sku_reservations) => {
                ReservationMetrics::record_outcome("reserved");
                ReservationMetrics::record_items(sku_reservations.len());
                tracing::info!(
                    saga_id = %saga_id,
                    order_id = %order_id,
                    reservations = sku_reservations.len(),
                    "Bundle reservation completed"
                );
                Ok(BundleReservationResponse {
                    saga_id,
                    order_id,
                    status: BundleReservationStatus::Completed,
                    sku_reservations,
                    failure_reason: None,
                })
            }
            Err(e @ (StockError::Repository(_) | StockError::Lock(_))) => {
                ReservationMetrics::record_outcome("failed");
                Err(e)
            }
            Err(e) => {
                ReservationMetrics::record_outcome(
                    if matches!(e, StockError::InsufficientStock { .. }) {
                        "insufficient"
                    } else {
                        "failed"
                    },
                );
                tracing::warn!(
                    saga_id = %saga_id,
                    order_id = %order_id,
                    error = %e,
                    "Bundle reservation failed"
                );
                Ok(BundleReservationResponse {
                    saga_id,
                    order_id,
                    status: BundleReservationStatus::Failed,
                    sku_reservations: Vec::new(),
                    failure_reason: Some(e.to_string()),
                })
            }
        }
    }

    async fn reserve_all(
        &self,
        raw: &[RawRequest<'_>],
        order_id: &OrderId,
        ttl: chrono::Duration,
    ) -> Result<Vec<SkuReservation>> {
        let requests = expand(raw)?;
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let demand = total_demand(&requests)?;
        let now = self.env.clock.now();

        let tx = self.env.unit_of_work.begin().await?;
        let mut inventories = load_and_validate(tx.as_ref(), &demand).await?;

        let mut reservations = Vec::with_capacity(requests.len());
        for request in &requests {
            let inventory = inventories.get_mut(&request.sku_id).ok_or_else(|| {
                StockError::InvalidInventory(format!(
                    "inventory not found for SKU {}",
                    request.sku_id
                ))
            })?;
            let reservation_id = inventory.reserve(request.quantity)?;
            reservations.push(Reservation::create_with_ttl(
                reservation_id,
                request.sku_id.clone(),
                request.quantity,
                order_id.clone(),
                ttl,
                now,
            )?);
        }

        let touched: Vec<Inventory> = demand
            .keys()
            .filter_map(|sku_id| inventories.remove(sku_id))
            .collect();
        tx.reservations().save_all(&reservations).await?;
        tx.inventories().save_all(&touched).await?;
        tx.commit().await?;

        Ok(reservations
            .iter()
            .map(|reservation| SkuReservation {
                sku_id: reservation.sku_id().clone(),
                reservation_id: *reservation.id(),
                quantity: reservation.quantity(),
                expires_at: reservation.expires_at(),
                status: reservation.status(),
            })
            .collect())
    }
}

/// Loads every demanded SKU in one read and checks it can cover its total.
async fn load_and_validate(
    tx: &dyn Transaction,
    demand: &BTreeMap<SkuId, Quantity>,
) -> Result<HashMap<SkuId, Inventory>> {
    let sku_ids: Vec<SkuId> = demand.keys().cloned().collect();
    let inventories = tx.inventories().load_all_by_ids(&sku_ids).await?;

    let missing: Vec<&str> = sku_ids
        .iter()
        .filter(|sku_id| !inventories.contains_key(*sku_id))
        .map(SkuId::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(StockError::InvalidInventory(format!(
            "inventory not found for SKUs: {}",
            missing.join(", ")
        )));
    }

    for (sku_id, requested) in demand {
        if let Some(inventory) = inventories.get(sku_id) {
            if !inventory.can_reserve(*requested) {
                return Err(StockError::InsufficientStock {
                    sku_id: sku_id.clone(),
                    available: inventory.available_quantity(),
                    requested: *requested,
                });
            }
        }
    }
    Ok(inventories)
}

fn validate_items(items: &[BundleItem]) -> Result<Vec<RawRequest<'_>>> {
    if items.is_empty() {
        return Err(StockError::Validation(
            "at least one bundle item is required".to_string(),
        ));
    }
    let mut raw = Vec::new();
    for item in items {
        if item.product_option_id.trim().is_empty() {
            return Err(StockError::Validation(
                "product option id must not be blank".to_string(),
            ));
        }
        if item.sku_mappings.is_empty() {
            return Err(StockError::Validation(format!(
                "bundle item {} has no SKU mappings",
                item.product_option_id
            )));
        }
        let units = positive(item.quantity, "bundle quantity")?;
        for mapping in &item.sku_mappings {
            if mapping.sku_id.trim().is_empty() {
                return Err(StockError::Validation("SKU id must not be blank".to_string()));
            }
            raw.push(RawRequest {
                sku_id: &mapping.sku_id,
                per_unit: positive(mapping.quantity, "SKU mapping quantity")?,
                units,
            });
        }
    }
    Ok(raw)
}

fn positive(value: i64, what: &str) -> Result<u32> {
    if value <= 0 {
        return Err(StockError::Validation(format!(
            "{what} must be greater than zero, got {value}"
        )));
    }
    u32::try_from(value)
        .map_err(|_| StockError::Validation(format!("{what} {value} is too large")))
}

/// Per-SKU requests in line order; multiplication overflow is a business failure.
fn expand(raw: &[RawRequest<'_>]) -> Result<Vec<SkuRequest>> {
    raw.iter()
        .map(|r| {
            Ok(SkuRequest {
                sku_id: SkuId::new(r.sku_id)?,
                quantity: Quantity::new(r.per_unit).times(r.units).map_err(|e| {
                    StockError::InvalidInventory(format!("requested quantity for SKU {}: {e}", r.sku_id))
                })?,
            })
        })
        .collect()
}

fn total_demand(requests: &[SkuRequest]) -> Result<BTreeMap<SkuId, Quantity>> {
    let mut demand: BTreeMap<SkuId, Quantity> = BTreeMap::new();
    for request in requests {
        let entry = demand.entry(request.sku_id.clone()).or_default();
        *entry = entry.add(request.quantity).map_err(|e| {
            StockError::InvalidInventory(format!(
                "total requested quantity for SKU {}: {e}",
                request.sku_id
            ))
        })?;
    }
    Ok(demand)
}
