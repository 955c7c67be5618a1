//! Persistence ports for inventories, reservations, and stock movements.
//!
//! Implementations live outside this crate. Saves enforce optimistic
//! versioning: writing a row whose `version` no longer matches the stored
//! version fails with [`RepositoryError::ConcurrencyConflict`], and a
//! successful write bumps the stored version by one.
//!
//! Batch orchestration runs inside a [`Transaction`] obtained from a
//! [`UnitOfWork`]. Everything written through the transaction's repositories
//! becomes visible together on [`Transaction::commit`]; dropping the
//! transaction without committing discards it.

use crate::inventory::Inventory;
use crate::movement::StockMovement;
use crate::reservation::Reservation;
use crate::types::{ReservationId, SkuId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during persistence operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Optimistic concurrency conflict: the row changed since it was loaded.
    #[error("Concurrency conflict on {entity} {id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// Kind of row (`inventory` or `reservation`).
        entity: &'static str,
        /// Row identifier.
        id: String,
        /// Version the writer loaded.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored row could not be mapped back into the domain.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Inventory persistence port.
pub trait InventoryRepository: Send + Sync {
    /// Loads one inventory.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the store fails.
    fn load(
        &self,
        sku_id: &SkuId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Inventory>, RepositoryError>> + Send + '_>>;

    /// Loads many inventories in one read. Missing SKUs are simply absent from the map.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the store fails.
    fn load_all_by_ids(
        &self,
        sku_ids: &[SkuId],
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<SkuId, Inventory>, RepositoryError>> + Send + '_>>;

    /// Loads many inventories taking pessimistic row locks.
    ///
    /// The locks last until the surrounding transaction ends; outside a
    /// transaction this behaves like [`InventoryRepository::load_all_by_ids`].
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the store fails.
    fn load_by_sku_ids_with_lock(
        &self,
        sku_ids: &[SkuId],
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<SkuId, Inventory>, RepositoryError>> + Send + '_>>;

    /// Inserts or updates one inventory.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::ConcurrencyConflict`] on a stale version.
    fn save(
        &self,
        inventory: &Inventory,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>>;

    /// Inserts or updates many inventories.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::ConcurrencyConflict`] on a stale version.
    fn save_all(
        &self,
        inventories: &[Inventory],
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>>;
}

/// Reservation persistence port.
pub trait ReservationRepository: Send + Sync {
    /// Finds a reservation by id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the store fails.
    fn find_by_id(
        &self,
        id: &ReservationId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Reservation>, RepositoryError>> + Send + '_>>;

    /// Inserts or updates one reservation.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::ConcurrencyConflict`] on a stale version.
    fn save(
        &self,
        reservation: &Reservation,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>>;

    /// Inserts or updates many reservations.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::ConcurrencyConflict`] on a stale version.
    fn save_all(
        &self,
        reservations: &[Reservation],
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>>;
}

/// Stock movement ledger port. Movements are append-only.
pub trait StockMovementRepository: Send + Sync {
    /// Appends one movement.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the store fails.
    fn save(
        &self,
        movement: &StockMovement,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send + '_>>;

    /// Movements for one SKU, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the store fails.
    fn find_by_sku_id(
        &self,
        sku_id: &SkuId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StockMovement>, RepositoryError>> + Send + '_>>;
}

/// An open transaction. Dropping it without calling [`Transaction::commit`] rolls it back.
pub trait Transaction: Send + Sync {
    /// Inventory repository scoped to this transaction.
    fn inventories(&self) -> &dyn InventoryRepository;

    /// Reservation repository scoped to this transaction.
    fn reservations(&self) -> &dyn ReservationRepository;

    /// Stock movement ledger scoped to this transaction.
    fn movements(&self) -> &dyn StockMovementRepository;

    /// Makes every write issued through this transaction visible at once.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the commit fails; nothing is applied in that case.
    fn commit(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send>>;
}

/// Transaction boundary for all-or-nothing batch writes.
pub trait UnitOfWork: Send + Sync {
    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if a transaction cannot be started.
    fn begin(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Transaction>, RepositoryError>> + Send + '_>>;
}
