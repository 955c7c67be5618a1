//! In-memory inventory, reservation, and movement storage with a unit of work.
//!
//! One [`InMemoryStockStore`] implements [`InventoryRepository`],
//! [`ReservationRepository`], [`StockMovementRepository`] and [`UnitOfWork`]
//! over shared state, so cloning it hands out views of the same data.
//!
//! Transactions run concurrently. Writes made through a transaction are
//! staged and applied together on commit after every version check passes,
//! so two transactions that load the same row and both write it cannot both
//! commit. `load_by_sku_ids_with_lock` takes per-row locks held until the
//! transaction ends. Dropping a transaction discards its writes and releases
//! its row locks.
//!
//! Every read and commit yields to the scheduler once, so concurrent callers
//! interleave between loading a row and writing it back.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use stockpile_core::inventory::Inventory;
use stockpile_core::movement::StockMovement;
use stockpile_core::repository::{
    InventoryRepository, RepositoryError, ReservationRepository, StockMovementRepository,
    Transaction, UnitOfWork,
};
use stockpile_core::reservation::Reservation;
use stockpile_core::types::{ReservationId, SkuId};
use tokio::sync::OwnedMutexGuard;

type RepoFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

#[derive(Debug, Default)]
struct State {
    inventories: HashMap<SkuId, Inventory>,
    reservations: HashMap<ReservationId, Reservation>,
    movements: Vec<StockMovement>,
    failing_skus: HashSet<SkuId>,
    commits: usize,
}

impl State {
    fn check_inventory(&self, inventory: &Inventory) -> Result<(), RepositoryError> {
        if self.failing_skus.contains(inventory.sku_id()) {
            return Err(RepositoryError::Database(format!(
                "injected write failure for SKU {}",
                inventory.sku_id()
            )));
        }
        match self.inventories.get(inventory.sku_id()) {
            Some(current) if current.version() != inventory.version() => {
                Err(RepositoryError::ConcurrencyConflict {
                    entity: "inventory",
                    id: inventory.sku_id().to_string(),
                    expected: inventory.version(),
                    actual: current.version(),
                })
            }
            _ => Ok(()),
        }
    }

    fn check_reservation(&self, reservation: &Reservation) -> Result<(), RepositoryError> {
        match self.reservations.get(reservation.id()) {
            Some(current) if current.version() != reservation.version() => {
                Err(RepositoryError::ConcurrencyConflict {
                    entity: "reservation",
                    id: reservation.id().to_string(),
                    expected: reservation.version(),
                    actual: current.version(),
                })
            }
            _ => Ok(()),
        }
    }

    fn write_inventories<'a>(
        &mut self,
        inventories: impl IntoIterator<Item = &'a Inventory>,
    ) {
        for inventory in inventories {
            let next = inventory.version() + 1;
            self.inventories
                .insert(inventory.sku_id().clone(), inventory.clone().with_version(next));
        }
    }

    fn write_reservations<'a>(
        &mut self,
        reservations: impl IntoIterator<Item = &'a Reservation>,
    ) {
        for reservation in reservations {
            let next = reservation.version() + 1;
            self.reservations
                .insert(*reservation.id(), reservation.clone().with_version(next));
        }
    }

    fn movements_for(&self, sku_id: &SkuId) -> Vec<StockMovement> {
        self.movements
            .iter()
            .filter(|movement| movement.sku_id() == sku_id)
            .cloned()
            .collect()
    }

    fn select(&self, sku_ids: &[SkuId]) -> HashMap<SkuId, Inventory> {
        sku_ids
            .iter()
            .filter_map(|id| self.inventories.get(id).map(|inv| (id.clone(), inv.clone())))
            .collect()
    }
}

type RowLocks = HashMap<SkuId, Arc<tokio::sync::Mutex<()>>>;

/// In-memory stock storage for tests.
#[derive(Debug, Clone)]
pub struct InMemoryStockStore {
    state: Arc<Mutex<State>>,
    row_locks: Arc<Mutex<RowLocks>>,
}

impl InMemoryStockStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            row_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, sku_id: &SkuId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(sku_id.clone()).or_default())
    }

    /// Seed an inventory row, bypassing version checks (for testing).
    pub fn insert_inventory(&self, inventory: Inventory) {
        self.state()
            .inventories
            .insert(inventory.sku_id().clone(), inventory);
    }

    /// Seed a reservation row, bypassing version checks (for testing).
    pub fn insert_reservation(&self, reservation: Reservation) {
        self.state()
            .reservations
            .insert(*reservation.id(), reservation);
    }

    /// Current inventory row for `sku_id` (for testing).
    #[must_use]
    pub fn inventory(&self, sku_id: &SkuId) -> Option<Inventory> {
        self.state().inventories.get(sku_id).cloned()
    }

    /// Current reservation row for `id` (for testing).
    #[must_use]
    pub fn reservation(&self, id: &ReservationId) -> Option<Reservation> {
        self.state().reservations.get(id).cloned()
    }

    /// All stored reservations (for testing).
    #[must_use]
    pub fn reservations(&self) -> Vec<Reservation> {
        self.state().reservations.values().cloned().collect()
    }

    /// Recorded movements for `sku_id`, oldest first (for testing).
    #[must_use]
    pub fn movements(&self, sku_id: &SkuId) -> Vec<StockMovement> {
        self.state().movements_for(sku_id)
    }

    /// Number of committed transactions (for testing).
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.state().commits
    }

    /// Make every subsequent inventory write for `sku_id` fail with a database error.
    pub fn fail_inventory_writes_for(&self, sku_id: &SkuId) {
        self.state().failing_skus.insert(sku_id.clone());
    }

    /// Undo [`InMemoryStockStore::fail_inventory_writes_for`].
    pub fn clear_failures(&self) {
        self.state().failing_skus.clear();
    }
}

impl Default for InMemoryStockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryRepository for InMemoryStockStore {
    fn load(&self, sku_id: &SkuId) -> RepoFuture<'_, Option<Inventory>> {
        let result = self.state().inventories.get(sku_id).cloned();
        Box::pin(async move {
            tokio::task::yield_now().await;
            Ok(result)
        })
    }

    fn load_all_by_ids(&self, sku_ids: &[SkuId]) -> RepoFuture<'_, HashMap<SkuId, Inventory>> {
        let result = self.state().select(sku_ids);
        Box::pin(async move {
            tokio::task::yield_now().await;
            Ok(result)
        })
    }

    fn load_by_sku_ids_with_lock(
        &self,
        sku_ids: &[SkuId],
    ) -> RepoFuture<'_, HashMap<SkuId, Inventory>> {
        // No transaction to hold row locks for.
        self.load_all_by_ids(sku_ids)
    }

    fn save(&self, inventory: &Inventory) -> RepoFuture<'_, ()> {
        InventoryRepository::save_all(self, std::slice::from_ref(inventory))
    }

    fn save_all(&self, inventories: &[Inventory]) -> RepoFuture<'_, ()> {
        let result = {
            let mut state = self.state();
            inventories
                .iter()
                .try_for_each(|inv| state.check_inventory(inv))
                .map(|()| state.write_inventories(inventories))
        };
        Box::pin(async move { result })
    }
}

impl ReservationRepository for InMemoryStockStore {
    fn find_by_id(&self, id: &ReservationId) -> RepoFuture<'_, Option<Reservation>> {
        let result = self.state().reservations.get(id).cloned();
        Box::pin(async move { Ok(result) })
    }

    fn save(&self, reservation: &Reservation) -> RepoFuture<'_, ()> {
        ReservationRepository::save_all(self, std::slice::from_ref(reservation))
    }

    fn save_all(&self, reservations: &[Reservation]) -> RepoFuture<'_, ()> {
        let result = {
            let mut state = self.state();
            reservations
                .iter()
                .try_for_each(|r| state.check_reservation(r))
                .map(|()| state.write_reservations(reservations))
        };
        Box::pin(async move { result })
    }
}

impl StockMovementRepository for InMemoryStockStore {
    fn save(&self, movement: &StockMovement) -> RepoFuture<'_, ()> {
        self.state().movements.push(movement.clone());
        Box::pin(async move { Ok(()) })
    }

    fn find_by_sku_id(&self, sku_id: &SkuId) -> RepoFuture<'_, Vec<StockMovement>> {
        let result = self.state().movements_for(sku_id);
        Box::pin(async move { Ok(result) })
    }
}

impl UnitOfWork for InMemoryStockStore {
    fn begin(&self) -> RepoFuture<'_, Box<dyn Transaction>> {
        let transaction: Box<dyn Transaction> = Box::new(InMemoryTransaction {
            inventories: StagedInventories {
                store: self.clone(),
                staged: Mutex::new(HashMap::new()),
                row_guards: Mutex::new(HashMap::new()),
            },
            reservations: StagedReservations {
                store: self.clone(),
                staged: Mutex::new(HashMap::new()),
            },
            movements: StagedMovements {
                store: self.clone(),
                staged: Mutex::new(Vec::new()),
            },
        });
        Box::pin(async move { Ok(transaction) })
    }
}

struct InMemoryTransaction {
    inventories: StagedInventories,
    reservations: StagedReservations,
    movements: StagedMovements,
}

impl Transaction for InMemoryTransaction {
    fn inventories(&self) -> &dyn InventoryRepository {
        &self.inventories
    }

    fn reservations(&self) -> &dyn ReservationRepository {
        &self.reservations
    }

    fn movements(&self) -> &dyn StockMovementRepository {
        &self.movements
    }

    fn commit(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<(), RepositoryError>> + Send>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let inventories = take(&self.inventories.staged);
            let reservations = take(&self.reservations.staged);
            let movements = std::mem::take(
                &mut *self.movements.staged.lock().unwrap_or_else(PoisonError::into_inner),
            );
            let mut state = self.inventories.store.state();
            inventories
                .values()
                .try_for_each(|inv| state.check_inventory(inv))
                .and_then(|()| {
                    reservations
                        .values()
                        .try_for_each(|r| state.check_reservation(r))
                })
                .map(|()| {
                    state.write_inventories(inventories.values());
                    state.write_reservations(reservations.values());
                    state.movements.extend(movements);
                    state.commits += 1;
                })
            // Row guards drop with `self`, after the writes are visible.
        })
    }
}

struct StagedMovements {
    store: InMemoryStockStore,
    staged: Mutex<Vec<StockMovement>>,
}

impl StockMovementRepository for StagedMovements {
    fn save(&self, movement: &StockMovement) -> RepoFuture<'_, ()> {
        self.staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(movement.clone());
        Box::pin(async move { Ok(()) })
    }

    fn find_by_sku_id(&self, sku_id: &SkuId) -> RepoFuture<'_, Vec<StockMovement>> {
        let mut result = self.store.state().movements_for(sku_id);
        result.extend(
            self.staged
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|movement| movement.sku_id() == sku_id)
                .cloned(),
        );
        Box::pin(async move { Ok(result) })
    }
}

fn take<K, V>(staged: &Mutex<HashMap<K, V>>) -> HashMap<K, V> {
    std::mem::take(&mut *staged.lock().unwrap_or_else(PoisonError::into_inner))
}

struct StagedInventories {
    store: InMemoryStockStore,
    staged: Mutex<HashMap<SkuId, Inventory>>,
    row_guards: Mutex<HashMap<SkuId, OwnedMutexGuard<()>>>,
}

impl StagedInventories {
    fn staged(&self) -> MutexGuard<'_, HashMap<SkuId, Inventory>> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_guards(&self) -> MutexGuard<'_, HashMap<SkuId, OwnedMutexGuard<()>>> {
        self.row_guards.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InventoryRepository for StagedInventories {
    fn load(&self, sku_id: &SkuId) -> RepoFuture<'_, Option<Inventory>> {
        let staged = self.staged().get(sku_id).cloned();
        let result = staged.or_else(|| self.store.state().inventories.get(sku_id).cloned());
        Box::pin(async move {
            tokio::task::yield_now().await;
            Ok(result)
        })
    }

    fn load_all_by_ids(&self, sku_ids: &[SkuId]) -> RepoFuture<'_, HashMap<SkuId, Inventory>> {
        let mut result = self.store.state().select(sku_ids);
        for (id, inventory) in self.staged().iter() {
            if sku_ids.contains(id) {
                result.insert(id.clone(), inventory.clone());
            }
        }
        Box::pin(async move {
            tokio::task::yield_now().await;
            Ok(result)
        })
    }

    fn load_by_sku_ids_with_lock(
        &self,
        sku_ids: &[SkuId],
    ) -> RepoFuture<'_, HashMap<SkuId, Inventory>> {
        let mut ordered = sku_ids.to_vec();
        ordered.sort();
        ordered.dedup();
        Box::pin(async move {
            // Sorted acquisition keeps overlapping transactions deadlock-free.
            for sku_id in &ordered {
                if self.row_guards().contains_key(sku_id) {
                    continue;
                }
                let guard = self.store.row_lock(sku_id).lock_owned().await;
                self.row_guards().insert(sku_id.clone(), guard);
            }
            self.load_all_by_ids(&ordered).await
        })
    }

    fn save(&self, inventory: &Inventory) -> RepoFuture<'_, ()> {
        self.save_all(std::slice::from_ref(inventory))
    }

    fn save_all(&self, inventories: &[Inventory]) -> RepoFuture<'_, ()> {
        let failing = {
            let state = self.store.state();
            inventories
                .iter()
                .find(|inv| state.failing_skus.contains(inv.sku_id()))
                .map(|inv| inv.sku_id().clone())
        };
        let result = match failing {
            Some(sku_id) => Err(RepositoryError::Database(format!(
                "injected write failure for SKU {sku_id}"
            ))),
            None => {
                let mut staged = self.staged();
                for inventory in inventories {
                    staged.insert(inventory.sku_id().clone(), inventory.clone());
                }
                Ok(())
            }
        };
        Box::pin(async move { result })
    }
}

struct StagedReservations {
    store: InMemoryStockStore,
    staged: Mutex<HashMap<ReservationId, Reservation>>,
}

impl StagedReservations {
    fn staged(&self) -> MutexGuard<'_, HashMap<ReservationId, Reservation>> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReservationRepository for StagedReservations {
    fn find_by_id(&self, id: &ReservationId) -> RepoFuture<'_, Option<Reservation>> {
        let staged = self.staged().get(id).cloned();
        let result = staged.or_else(|| self.store.state().reservations.get(id).cloned());
        Box::pin(async move { Ok(result) })
    }

    fn save(&self, reservation: &Reservation) -> RepoFuture<'_, ()> {
        self.save_all(std::slice::from_ref(reservation))
    }

    fn save_all(&self, reservations: &[Reservation]) -> RepoFuture<'_, ()> {
        let mut staged = self.staged();
        for reservation in reservations {
            staged.insert(*reservation.id(), reservation.clone());
        }
        drop(staged);
        Box::pin(async move { Ok(()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use stockpile_core::movement::MovementType;
    use stockpile_core::quantity::Quantity;

    fn sku(id: &str) -> SkuId {
        SkuId::new(id).unwrap()
    }

    #[tokio::test]
    async fn save_bumps_version_and_rejects_stale_writes() {
        let store = InMemoryStockStore::new();
        let inventory = Inventory::with_initial_stock(sku("A"), Quantity::new(5));
        InventoryRepository::save(&store, &inventory).await.unwrap();

        let loaded = store.load(&sku("A")).await.unwrap().unwrap();
        assert_eq!(loaded.version(), 1);

        let stale = InventoryRepository::save(&store, &inventory).await;
        assert!(matches!(
            stale,
            Err(RepositoryError::ConcurrencyConflict { expected: 0, actual: 1, .. })
        ));
    }

    #[tokio::test]
    async fn uncommitted_transaction_is_discarded() {
        let store = InMemoryStockStore::new();
        store.insert_inventory(Inventory::with_initial_stock(sku("A"), Quantity::new(5)));

        {
            let tx = store.begin().await.unwrap();
            let mut inventory = tx.inventories().load(&sku("A")).await.unwrap().unwrap();
            inventory.reserve(Quantity::new(2)).unwrap();
            tx.inventories().save(&inventory).await.unwrap();

            let staged = tx.inventories().load(&sku("A")).await.unwrap().unwrap();
            assert_eq!(staged.reserved_quantity(), Quantity::new(2));
        }

        let stored = store.inventory(&sku("A")).unwrap();
        assert_eq!(stored.reserved_quantity(), Quantity::zero());
        assert_eq!(store.commit_count(), 0);
    }

    #[tokio::test]
    async fn commit_applies_everything_or_nothing() {
        let store = InMemoryStockStore::new();
        store.insert_inventory(Inventory::with_initial_stock(sku("A"), Quantity::new(5)));
        store.insert_inventory(Inventory::with_initial_stock(sku("B"), Quantity::new(5)));

        let tx = store.begin().await.unwrap();
        let mut loaded = tx
            .inventories()
            .load_by_sku_ids_with_lock(&[sku("A"), sku("B")])
            .await
            .unwrap();
        for inventory in loaded.values_mut() {
            inventory.reserve(Quantity::new(1)).unwrap();
        }
        let batch: Vec<Inventory> = loaded.into_values().collect();
        tx.inventories().save_all(&batch).await.unwrap();

        // A concurrent non-transactional writer bumps B's version.
        let mut b = store.inventory(&sku("B")).unwrap();
        b.receive(Quantity::new(1), "PO").unwrap();
        InventoryRepository::save(&store, &b).await.unwrap();

        assert!(tx.commit().await.is_err());
        assert_eq!(store.inventory(&sku("A")).unwrap().reserved_quantity(), Quantity::zero());
        assert_eq!(store.inventory(&sku("B")).unwrap().reserved_quantity(), Quantity::zero());
    }

    #[tokio::test]
    async fn injected_failures_surface_as_database_errors() {
        let store = InMemoryStockStore::new();
        store.fail_inventory_writes_for(&sku("A"));

        let result =
            InventoryRepository::save(&store, &Inventory::empty(sku("A"))).await;
        assert!(matches!(result, Err(RepositoryError::Database(_))));

        store.clear_failures();
        assert!(InventoryRepository::save(&store, &Inventory::empty(sku("A"))).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_transactions_conflict_on_the_same_row() {
        let store = InMemoryStockStore::new();
        store.insert_inventory(Inventory::with_initial_stock(sku("A"), Quantity::new(5)));

        let first = store.begin().await.unwrap();
        let second = store.begin().await.unwrap();

        let mut a1 = first.inventories().load(&sku("A")).await.unwrap().unwrap();
        let mut a2 = second.inventories().load(&sku("A")).await.unwrap().unwrap();
        a1.reserve(Quantity::new(3)).unwrap();
        a2.reserve(Quantity::new(3)).unwrap();
        first.inventories().save(&a1).await.unwrap();
        second.inventories().save(&a2).await.unwrap();

        first.commit().await.unwrap();
        assert!(matches!(
            second.commit().await,
            Err(RepositoryError::ConcurrencyConflict { .. })
        ));
        assert_eq!(store.inventory(&sku("A")).unwrap().reserved_quantity(), Quantity::new(3));
    }

    #[tokio::test]
    async fn row_lock_blocks_until_holder_finishes() {
        let store = InMemoryStockStore::new();
        store.insert_inventory(Inventory::with_initial_stock(sku("A"), Quantity::new(5)));
        store.insert_inventory(Inventory::with_initial_stock(sku("B"), Quantity::new(5)));

        let holder = store.begin().await.unwrap();
        holder.inventories().load_by_sku_ids_with_lock(&[sku("A")]).await.unwrap();

        let waiter = store.begin().await.unwrap();
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            waiter.inventories().load_by_sku_ids_with_lock(&[sku("B"), sku("A")]),
        )
        .await;
        assert!(blocked.is_err(), "row A is still held");

        // Other rows stay available.
        let other = store.begin().await.unwrap();
        other.inventories().load_by_sku_ids_with_lock(&[sku("B")]).await.unwrap();
        drop(other);

        drop(holder);
        let loaded = tokio::time::timeout(
            Duration::from_secs(1),
            waiter.inventories().load_by_sku_ids_with_lock(&[sku("A"), sku("B")]),
        )
        .await
        .expect("lock released when the holder ends")
        .unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn movements_are_written_on_commit_only() {
        let store = InMemoryStockStore::new();
        let movement =
            StockMovement::create(sku("A"), MovementType::Receive, Quantity::new(4), "PO-1", Utc::now())
                .unwrap();

        {
            let tx = store.begin().await.unwrap();
            tx.movements().save(&movement).await.unwrap();
            assert_eq!(tx.movements().find_by_sku_id(&sku("A")).await.unwrap().len(), 1);
        }
        assert!(store.movements(&sku("A")).is_empty());

        let tx = store.begin().await.unwrap();
        tx.movements().save(&movement).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.movements(&sku("A")), vec![movement]);
        assert!(store.movements(&sku("B")).is_empty());
    }
}
