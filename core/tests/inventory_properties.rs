//! Property tests for the Inventory aggregate's bookkeeping.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use stockpile_core::inventory::Inventory;
use stockpile_core::quantity::Quantity;
use stockpile_core::types::{ReservationId, SkuId};

#[derive(Debug, Clone)]
enum Op {
    Receive(u32),
    Reserve(u32),
    Release(u32),
    Confirm(u32),
    Deduct(u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u32..500).prop_map(Op::Receive),
        (0u32..200).prop_map(Op::Reserve),
        (0u32..200).prop_map(Op::Release),
        (0u32..200).prop_map(Op::Confirm),
        (0u32..200).prop_map(Op::Deduct),
    ]
}

fn apply(inventory: &mut Inventory, op: &Op) -> bool {
    let id = ReservationId::new();
    match *op {
        Op::Receive(q) => inventory.receive(Quantity::new(q), "PO").is_ok(),
        Op::Reserve(q) => inventory.reserve(Quantity::new(q)).is_ok(),
        Op::Release(q) => inventory
            .release_reservation(&id, Quantity::new(q))
            .is_ok(),
        Op::Confirm(q) => inventory
            .confirm_reservation(&id, Quantity::new(q))
            .is_ok(),
        Op::Deduct(q) => inventory.deduct(Quantity::new(q), "adjustment").is_ok(),
    }
}

proptest! {
    #[test]
    fn reserved_never_exceeds_total(
        initial in 0u32..1_000,
        ops in proptest::collection::vec(op_strategy(), 0..64),
    ) {
        let mut inventory =
            Inventory::with_initial_stock(SkuId::new("SKU-P").unwrap(), Quantity::new(initial));

        for op in &ops {
            let before = inventory.clone();
            let applied = apply(&mut inventory, op);

            prop_assert!(inventory.reserved_quantity() <= inventory.total_quantity());
            prop_assert_eq!(
                inventory.available_quantity().value(),
                inventory.total_quantity().value() - inventory.reserved_quantity().value()
            );
            if !applied {
                prop_assert_eq!(&inventory, &before);
            }
        }
    }

    #[test]
    fn reserve_succeeds_exactly_when_available(
        total in 0u32..1_000,
        reserved in 0u32..1_000,
        requested in 1u32..1_000,
    ) {
        prop_assume!(reserved <= total);
        let mut inventory = Inventory::restore(
            SkuId::new("SKU-P").unwrap(),
            Quantity::new(total),
            Quantity::new(reserved),
            0,
        )
        .unwrap();

        let available = total - reserved;
        let result = inventory.reserve(Quantity::new(requested));
        prop_assert_eq!(result.is_ok(), requested <= available);
    }
}
