//! Injected dependencies shared by the reservation services.

use std::sync::Arc;
use stockpile_core::environment::Clock;
use stockpile_core::repository::{InventoryRepository, ReservationRepository, UnitOfWork};

/// Ports every reservation service works against.
///
/// Cloning is cheap; all fields are shared handles.
#[derive(Clone)]
pub struct StockEnvironment {
    /// Inventory reads and non-transactional writes.
    pub inventories: Arc<dyn InventoryRepository>,
    /// Reservation reads and non-transactional writes.
    pub reservations: Arc<dyn ReservationRepository>,
    /// Transaction boundary for writes that must land together.
    pub unit_of_work: Arc<dyn UnitOfWork>,
    /// Source of the current time.
    pub clock: Arc<dyn Clock>,
}

impl StockEnvironment {
    /// Build an environment from individual ports.
    #[must_use]
    pub fn new(
        inventories: Arc<dyn InventoryRepository>,
        reservations: Arc<dyn ReservationRepository>,
        unit_of_work: Arc<dyn UnitOfWork>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inventories,
            reservations,
            unit_of_work,
            clock,
        }
    }

    /// Build an environment from one store implementing every persistence port.
    #[must_use]
    pub fn from_store<S>(store: S, clock: Arc<dyn Clock>) -> Self
    where
        S: InventoryRepository + ReservationRepository + UnitOfWork + Clone + 'static,
    {
        Self {
            inventories: Arc::new(store.clone()),
            reservations: Arc::new(store.clone()),
            unit_of_work: Arc::new(store),
            clock,
        }
    }
}

impl std::fmt::Debug for StockEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockEnvironment").finish_non_exhaustive()
    }
}
