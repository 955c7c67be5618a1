//! Stock availability checks and lock-guarded reservations.
//!
//! Reads without a lock are advisory. Every mutation runs inside the
//! per-SKU distributed lock and re-reads the inventory after acquiring it;
//! bundle operations take their locks in sorted key order.

use crate::config::Config;
use crate::environment::StockEnvironment;
use crate::error::{Result, StockError};
use crate::lock::LockManager;
use crate::metrics::ReservationMetrics;
use crate::release::release_in_transaction;
use crate::saga::{BundleReservationSaga, CompensatingAction, SagaStatus};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use stockpile_core::lock::DistributedLock;
use stockpile_core::quantity::Quantity;
use stockpile_core::reservation::Reservation;
use stockpile_core::sku_mapping::{ProductOption, SkuMapping};
use stockpile_core::types::{OrderId, ReservationId, SkuId};

/// Availability of one SKU within a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkuAvailability {
    /// SKU.
    pub sku_id: SkuId,
    /// Units of this SKU one bundle set consumes.
    pub required_per_set: Quantity,
    /// Units currently available; zero when the SKU is untracked.
    pub available_quantity: Quantity,
    /// Whole sets this SKU alone could supply.
    pub available_sets: u32,
}

/// Result of a bundle availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleAvailabilityResult {
    /// Whole sets the bundle can supply: the minimum over its SKUs.
    pub available_sets: u32,
    /// Per-SKU breakdown in SKU order.
    pub details: Vec<SkuAvailability>,
}

impl BundleAvailabilityResult {
    /// At least one set can be supplied.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.available_sets > 0
    }

    /// `sets` bundle sets can be supplied.
    #[must_use]
    pub const fn can_fulfil(&self, sets: u32) -> bool {
        self.available_sets >= sets
    }

    fn compute(mapping: &SkuMapping, available: &HashMap<SkuId, Quantity>) -> Self {
        let details: Vec<SkuAvailability> = mapping
            .iter()
            .map(|(sku_id, required_per_set)| {
                let available_quantity = available.get(sku_id).copied().unwrap_or_default();
                SkuAvailability {
                    sku_id: sku_id.clone(),
                    required_per_set,
                    available_quantity,
                    available_sets: available_quantity.whole_multiples_of(required_per_set),
                }
            })
            .collect();
        let available_sets = details.iter().map(|d| d.available_sets).min().unwrap_or(0);
        Self {
            available_sets,
            details,
        }
    }
}

/// How much of a product option can be sold right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityResult {
    /// Anything can be sold.
    pub available: bool,
    /// Units (single SKU) or sets (bundle) available.
    pub quantity: u32,
}

/// A reservation made by one of the lock-guarded paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedStock {
    /// Reserved SKU.
    pub sku_id: SkuId,
    /// New reservation.
    pub reservation_id: ReservationId,
    /// Units reserved.
    pub quantity: Quantity,
    /// When the reservation lapses unless confirmed.
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a lock-guarded reservation attempt.
///
/// Only [`ReservationOutcome::Reserved`] changed any stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReservationOutcome {
    /// Stock was reserved.
    Reserved {
        /// Reservations made, one per SKU.
        reservations: Vec<ReservedStock>,
    },
    /// A SKU could not cover the request; nothing was reserved.
    InsufficientStock {
        /// SKU that is short.
        sku_id: SkuId,
        /// Units available under the lock.
        available: Quantity,
        /// Units requested.
        requested: Quantity,
    },
    /// A lock was not acquired before the wait timeout; nothing was touched.
    LockUnavailable {
        /// Contended lock key.
        key: String,
    },
    /// A bundle step failed after earlier steps succeeded; those were released.
    Compensated {
        /// Failure that triggered compensation.
        reason: String,
    },
}

impl ReservationOutcome {
    /// Whether stock was reserved.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        matches!(self, Self::Reserved { .. })
    }

    const fn metric_label(&self) -> &'static str {
        match self {
            Self::Reserved { .. } => "reserved",
            Self::InsufficientStock { .. } => "insufficient",
            Self::LockUnavailable { .. } => "lock_unavailable",
            Self::Compensated { .. } => "failed",
        }
    }
}

/// A bundle reservation outcome together with its saga record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleReservationOutcome {
    /// Step-by-step record of the attempt.
    pub saga: BundleReservationSaga,
    /// What happened.
    pub outcome: ReservationOutcome,
}

impl BundleReservationOutcome {
    /// Whether every SKU of the bundle was reserved.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        self.outcome.is_reserved()
    }
}

/// Availability queries and lock-guarded reservations for single SKUs and bundles.
#[derive(Debug, Clone)]
pub struct StockAvailabilityService {
    env: StockEnvironment,
    locks: LockManager,
    config: Config,
}

impl StockAvailabilityService {
    /// Create the service.
    #[must_use]
    pub const fn new(env: StockEnvironment, locks: LockManager, config: Config) -> Self {
        Self { env, locks, config }
    }

    /// Units of `sku_id` available right now; zero if untracked. Advisory.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::Repository`] if the read fails.
    pub async fn available_quantity(&self, sku_id: &SkuId) -> Result<Quantity> {
        Ok(self
            .env
            .inventories
            .load(sku_id)
            .await?
            .map(|inventory| inventory.available_quantity())
            .unwrap_or_default())
    }

    /// Whether `quantity` units of `sku_id` are available. Advisory, no lock.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::Repository`] if the read fails.
    pub async fn check_single_option(&self, sku_id: &SkuId, quantity: Quantity) -> Result<bool> {
        Ok(self.available_quantity(sku_id).await?.is_at_least(quantity))
    }

    /// Whether `sets` of `option` are available. Advisory, no lock.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::Repository`] if the read fails.
    pub async fn check_bundle_option(&self, option: &ProductOption, sets: u32) -> Result<bool> {
        let result = self.compute_bundle(option.mapping()).await?;
        Ok(result.is_available() && result.can_fulfil(sets))
    }

    /// Bundle availability computed under the composite lock for `mapping`.
    ///
    /// # Errors
    ///
    /// - [`StockError::LockUnavailable`] if the composite lock times out
    /// - [`StockError::Lock`] or [`StockError::Repository`] on infrastructure faults
    pub async fn check_bundle_availability(
        &self,
        mapping: &SkuMapping,
    ) -> Result<BundleAvailabilityResult> {
        let key = self.config.lock.bundle_check_key(mapping);
        let lock = self.lock_or_unavailable(&key).await?;
        let result = self.compute_bundle(mapping).await;
        self.unlock(lock).await;

        let result = result?;
        tracing::debug!(
            key = %key,
            available_sets = result.available_sets,
            "Bundle availability checked"
        );
        Ok(result)
    }

    /// Available units of every SKU in `option`. Advisory.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::Repository`] if the read fails.
    pub async fn bundle_available_quantities(
        &self,
        option: &ProductOption,
    ) -> Result<BTreeMap<SkuId, Quantity>> {
        let available = self.load_available(option.mapping()).await?;
        Ok(option
            .mapping()
            .sku_ids()
            .map(|sku_id| {
                (
                    sku_id.clone(),
                    available.get(sku_id).copied().unwrap_or_default(),
                )
            })
            .collect())
    }

    /// Checks several options concurrently against requested quantities,
    /// keyed by option name. Options without a requested quantity are unavailable.
    ///
    /// # Errors
    ///
    /// Returns the first [`StockError`] raised by any check.
    pub async fn check_multiple_options(
        &self,
        options: &[ProductOption],
        quantities: &HashMap<String, u32>,
    ) -> Result<HashMap<String, bool>> {
        let checks = options
            .iter()
            .map(|option| self.check_requested(option, quantities.get(option.name()).copied()));
        Ok(try_join_all(checks).await?.into_iter().collect())
    }

    async fn check_requested(
        &self,
        option: &ProductOption,
        requested: Option<u32>,
    ) -> Result<(String, bool)> {
        let available = match (requested, option.mapping().single_sku_id()) {
            (None, _) => false,
            (Some(quantity), Some(sku_id)) => {
                self.check_single_option(sku_id, Quantity::new(quantity))
                    .await?
            }
            (Some(sets), None) => self.check_bundle_option(option, sets).await?,
        };
        Ok((option.name().to_string(), available))
    }

    /// What can be sold of `option` right now. Advisory.
    ///
    /// # Errors
    ///
    /// Returns [`StockError::Repository`] if the read fails.
    pub async fn option_availability(&self, option: &ProductOption) -> Result<AvailabilityResult> {
        let quantity = match option.mapping().single_sku_id() {
            Some(sku_id) => self.available_quantity(sku_id).await?.value(),
            None => self.compute_bundle(option.mapping()).await?.available_sets,
        };
        Ok(AvailabilityResult {
            available: quantity > 0,
            quantity,
        })
    }

    /// Reserve `quantity` of `sku_id` for `order_id` under the SKU's lock.
    ///
    /// Insufficient stock and lock timeouts are outcomes, not errors; the
    /// lock is released on every path.
    ///
    /// # Errors
    ///
    /// - [`StockError::Validation`] for a zero quantity
    /// - [`StockError::Lock`] or [`StockError::Repository`] on infrastructure faults
    pub async fn reserve_stock(
        &self,
        sku_id: &SkuId,
        quantity: Quantity,
        order_id: &OrderId,
    ) -> Result<ReservationOutcome> {
        if quantity.is_zero() {
            return Err(StockError::Validation(
                "reservation quantity must be greater than zero".to_string(),
            ));
        }

        let key = self.config.lock.sku_key(sku_id);
        let Some(lock) = self
            .locks
            .acquire(&key, self.config.lock.lease(), self.config.lock.wait_timeout())
            .await?
        else {
            let outcome = ReservationOutcome::LockUnavailable { key };
            ReservationMetrics::record_outcome(outcome.metric_label());
            return Ok(outcome);
        };

        let result = self.reserve_locked(sku_id, quantity, order_id).await;
        self.unlock(lock).await;

        let outcome = match result {
            Ok(reserved) => ReservationOutcome::Reserved {
                reservations: vec![reserved],
            },
            Err(StockError::InsufficientStock {
                sku_id,
                available,
                requested,
            }) => {
                tracing::warn!(
                    sku_id = %sku_id,
                    available = available.value(),
                    requested = requested.value(),
                    "Insufficient stock"
                );
                ReservationOutcome::InsufficientStock {
                    sku_id,
                    available,
                    requested,
                }
            }
            Err(e) => {
                ReservationMetrics::record_outcome("failed");
                return Err(e);
            }
        };
        ReservationMetrics::record_outcome(outcome.metric_label());
        Ok(outcome)
    }

    /// Reserve `sets` of a bundle for `order_id`.
    ///
    /// Locks every SKU in sorted order, re-validates the full demand, then
    /// reserves SKU by SKU. A failing step releases the earlier reservations
    /// in reverse before the locks are given up.
    ///
    /// # Errors
    ///
    /// - [`StockError::Validation`] for zero sets or an overflowing demand
    /// - [`StockError::Lock`] or [`StockError::Repository`] if locking or the
    ///   pre-reservation read fails
    pub async fn reserve_bundle_stock(
        &self,
        option: &ProductOption,
        sets: u32,
        order_id: &OrderId,
    ) -> Result<BundleReservationOutcome> {
        if sets == 0 {
            return Err(StockError::Validation(
                "bundle sets must be greater than zero".to_string(),
            ));
        }
        let required = option.mapping().required_quantities(sets)?;
        let mut saga =
            BundleReservationSaga::new(order_id.clone(), &required, sets, self.env.clock.now());

        let keys: Vec<String> = required
            .keys()
            .map(|sku_id| self.config.lock.sku_key(sku_id))
            .collect();
        let locks = match self
            .locks
            .acquire_all(&keys, self.config.lock.lease(), self.config.lock.wait_timeout())
            .await
        {
            Ok(locks) => locks,
            Err(StockError::LockUnavailable { key }) => {
                saga.fail(format!("lock not acquired: {key}"), self.env.clock.now());
                let outcome = ReservationOutcome::LockUnavailable { key };
                ReservationMetrics::record_outcome(outcome.metric_label());
                return Ok(BundleReservationOutcome { saga, outcome });
            }
            Err(e) => return Err(e),
        };

        let result = self.run_bundle_saga(&mut saga, &required, order_id).await;
        self.locks.release_all(locks).await;

        match result {
            Ok(outcome) => {
                ReservationMetrics::record_outcome(outcome.metric_label());
                tracing::info!(
                    saga_id = %saga.saga_id(),
                    order_id = %order_id,
                    option = option.name(),
                    sets,
                    status = ?saga.status(),
                    "Bundle reservation finished"
                );
                Ok(BundleReservationOutcome { saga, outcome })
            }
            Err(e) => {
                ReservationMetrics::record_outcome("failed");
                Err(e)
            }
        }
    }

    /// Release a reservation under its SKU's lock.
    ///
    /// # Errors
    ///
    /// - [`StockError::ReservationNotFound`] if no such reservation exists
    /// - [`StockError::InvalidState`] if it is already released or confirmed
    /// - [`StockError::LockUnavailable`] if the SKU lock times out
    /// - [`StockError::Lock`] or [`StockError::Repository`] on infrastructure faults
    pub async fn release_reservation(&self, reservation_id: &ReservationId) -> Result<Reservation> {
        let sku_id = self
            .env
            .reservations
            .find_by_id(reservation_id)
            .await?
            .ok_or_else(|| StockError::ReservationNotFound(reservation_id.to_string()))?
            .sku_id()
            .clone();

        let key = self.config.lock.sku_key(&sku_id);
        let lock = self.lock_or_unavailable(&key).await?;
        let result = self.release_locked(reservation_id).await;
        self.unlock(lock).await;

        let reservation = result?;
        ReservationMetrics::record_release();
        tracing::info!(
            reservation_id = %reservation_id,
            sku_id = %sku_id,
            quantity = reservation.quantity().value(),
            "Reservation released"
        );
        Ok(reservation)
    }

    async fn run_bundle_saga(
        &self,
        saga: &mut BundleReservationSaga,
        required: &BTreeMap<SkuId, Quantity>,
        order_id: &OrderId,
    ) -> Result<ReservationOutcome> {
        saga.start();

        // Nothing is mutated until every SKU covers its full demand.
        let skus: Vec<SkuId> = required.keys().cloned().collect();
        let inventories = self.env.inventories.load_all_by_ids(&skus).await?;
        for (sku_id, requested) in required {
            let available = inventories
                .get(sku_id)
                .map(stockpile_core::inventory::Inventory::available_quantity)
                .unwrap_or_default();
            if !available.is_at_least(*requested) {
                let reason = format!(
                    "insufficient stock for SKU {sku_id}: available {available}, requested {requested}"
                );
                tracing::warn!(saga_id = %saga.saga_id(), %reason, "Bundle reservation rejected");
                saga.fail(reason, self.env.clock.now());
                return Ok(ReservationOutcome::InsufficientStock {
                    sku_id: sku_id.clone(),
                    available,
                    requested: *requested,
                });
            }
        }

        let mut reservations = Vec::with_capacity(required.len());
        for (sku_id, quantity) in required {
            match self.reserve_locked(sku_id, *quantity, order_id).await {
                Ok(reserved) => {
                    saga.record_step_success(sku_id, reserved.reservation_id, self.env.clock.now());
                    reservations.push(reserved);
                }
                Err(e) => {
                    let reason = e.to_string();
                    tracing::warn!(
                        saga_id = %saga.saga_id(),
                        sku_id = %sku_id,
                        error = %e,
                        "Bundle step failed, compensating"
                    );
                    saga.record_step_failure(sku_id, reason.clone());
                    self.compensate(saga).await;
                    return Ok(ReservationOutcome::Compensated { reason });
                }
            }
        }
        Ok(ReservationOutcome::Reserved { reservations })
    }

    /// Walks the saga's undo actions, newest first. Runs while the per-SKU
    /// locks are still held.
    async fn compensate(&self, saga: &mut BundleReservationSaga) {
        for action in saga.compensation_plan() {
            let CompensatingAction::ReleaseReservation {
                sku_id,
                reservation_id,
            } = action;
            match self.release_locked(&reservation_id).await {
                Ok(_) => {
                    tracing::debug!(
                        saga_id = %saga.saga_id(),
                        sku_id = %sku_id,
                        reservation_id = %reservation_id,
                        "Compensating release applied"
                    );
                    saga.record_compensation(&sku_id, self.env.clock.now());
                }
                Err(e) => {
                    tracing::error!(
                        saga_id = %saga.saga_id(),
                        sku_id = %sku_id,
                        reservation_id = %reservation_id,
                        error = %e,
                        "Compensating release failed"
                    );
                    saga.record_compensation_failure(&sku_id, e.to_string());
                }
            }
        }
        saga.finish_compensation(self.env.clock.now());
        ReservationMetrics::record_compensation(if saga.status() == SagaStatus::Compensated {
            "compensated"
        } else {
            "failed"
        });
    }

    /// Reserves within one transaction. The caller holds the SKU lock.
    async fn reserve_locked(
        &self,
        sku_id: &SkuId,
        quantity: Quantity,
        order_id: &OrderId,
    ) -> Result<ReservedStock> {
        let now = self.env.clock.now();
        let tx = self.env.unit_of_work.begin().await?;

        let Some(mut inventory) = tx.inventories().load(sku_id).await? else {
            return Err(StockError::InsufficientStock {
                sku_id: sku_id.clone(),
                available: Quantity::zero(),
                requested: quantity,
            });
        };
        let reservation_id = inventory.reserve(quantity)?;
        let reservation = Reservation::create_with_ttl(
            reservation_id,
            sku_id.clone(),
            quantity,
            order_id.clone(),
            self.config.reservation.ttl(),
            now,
        )?;

        tx.inventories().save(&inventory).await?;
        tx.reservations().save(&reservation).await?;
        tx.commit().await?;

        tracing::info!(
            sku_id = %sku_id,
            order_id = %order_id,
            reservation_id = %reservation_id,
            quantity = quantity.value(),
            available = inventory.available_quantity().value(),
            "Stock reserved"
        );
        Ok(ReservedStock {
            sku_id: sku_id.clone(),
            reservation_id,
            quantity,
            expires_at: reservation.expires_at(),
        })
    }

    async fn release_locked(&self, reservation_id: &ReservationId) -> Result<Reservation> {
        let tx = self.env.unit_of_work.begin().await?;
        let reservation = release_in_transaction(tx.as_ref(), reservation_id).await?;
        tx.commit().await?;
        Ok(reservation)
    }

    async fn compute_bundle(&self, mapping: &SkuMapping) -> Result<BundleAvailabilityResult> {
        let available = self.load_available(mapping).await?;
        Ok(BundleAvailabilityResult::compute(mapping, &available))
    }

    async fn load_available(&self, mapping: &SkuMapping) -> Result<HashMap<SkuId, Quantity>> {
        let skus: Vec<SkuId> = mapping.sku_ids().cloned().collect();
        Ok(self
            .env
            .inventories
            .load_all_by_ids(&skus)
            .await?
            .into_iter()
            .map(|(sku_id, inventory)| (sku_id, inventory.available_quantity()))
            .collect())
    }

    async fn lock_or_unavailable(&self, key: &str) -> Result<DistributedLock> {
        self.locks
            .acquire(key, self.config.lock.lease(), self.config.lock.wait_timeout())
            .await?
            .ok_or_else(|| StockError::LockUnavailable {
                key: key.to_string(),
            })
    }

    async fn unlock(&self, lock: DistributedLock) {
        self.locks.release_all(vec![lock]).await;
    }
}
