//! Property tests for batch reservation bookkeeping.
//!
//! Any sequence of orders against a fixed stock level must leave every
//! inventory with `reserved` equal to the sum of accepted lines, never
//! above `total`.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use stockpile_core::inventory::Inventory;
use stockpile_core::quantity::Quantity;
use stockpile_runtime::{
    Config, ReserveStockCommand, ReserveStockItem, ReserveStockService, StockEnvironment,
    StockError,
};
use stockpile_testing::helpers::sku;
use stockpile_testing::{InMemoryStockStore, test_clock};

const SKUS: [&str; 3] = ["A", "B", "C"];

fn order_strategy() -> impl Strategy<Value = Vec<(usize, i64)>> {
    prop::collection::vec((0..SKUS.len(), 1i64..8), 1..4)
}

proptest! {
    #[test]
    fn accepted_orders_account_for_all_reserved_stock(
        totals in prop::array::uniform3(0u32..30),
        orders in prop::collection::vec(order_strategy(), 1..12),
    ) {
        let store = InMemoryStockStore::new();
        for (id, total) in SKUS.iter().zip(totals) {
            store.insert_inventory(Inventory::with_initial_stock(sku(id), Quantity::new(total)));
        }
        let env = StockEnvironment::from_store(store.clone(), Arc::new(test_clock()));
        let service = ReserveStockService::new(env, Config::default());

        let mut accepted: HashMap<&str, i64> = HashMap::new();
        for (n, lines) in orders.iter().enumerate() {
            let command = ReserveStockCommand {
                order_id: format!("ORDER-{n}"),
                items: lines
                    .iter()
                    .map(|(i, q)| ReserveStockItem { sku_id: SKUS[*i].to_string(), quantity: *q })
                    .collect(),
                ttl_secs: None,
            };
            match tokio_test::block_on(service.execute(command)) {
                Ok(response) => {
                    prop_assert_eq!(response.reservations.len(), lines.len());
                    for (i, q) in lines {
                        *accepted.entry(SKUS[*i]).or_default() += q;
                    }
                }
                Err(StockError::InsufficientStock { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }

        for (id, total) in SKUS.iter().zip(totals) {
            let inventory = store.inventory(&sku(id)).unwrap();
            let reserved = i64::from(inventory.reserved_quantity().value());
            prop_assert_eq!(reserved, accepted.get(id).copied().unwrap_or(0));
            prop_assert!(inventory.reserved_quantity().value() <= total);
        }
    }
}
