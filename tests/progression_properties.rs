//! Property tests: random operator and clock activity against one order.
//!
//! Properties checked after every operation:
//! - the stored order satisfies `Order::check_invariants`
//! - status history only ever grows by appending
//! - a delivery partner's `assigned_at` never changes once set
//! - while auto-progress is off, neither time passing nor a sweep moves the order

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use order_progression::domain::order::{
    NewOrder, Order, OrderItem, PaymentInfo, PaymentMethod, RosterDispatcher, ShippingInfo,
};
use order_progression::metrics::Metrics;
use order_progression::store::{InMemoryOrderStore, OrderStore};
use order_progression::{ProgressionConfig, ProgressionService, RuntimeClock};

#[derive(Debug, Clone)]
enum Op {
    Start,
    Force,
    Sweep,
    Wait(u64),
    Cancel,
    SetAutoProgress(bool),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Start),
        Just(Op::Force),
        Just(Op::Sweep),
        (1u64..90).prop_map(Op::Wait),
        Just(Op::Cancel),
        any::<bool>().prop_map(Op::SetAutoProgress),
    ]
}

fn paid_order() -> NewOrder {
    NewOrder {
        items: vec![OrderItem {
            product_id: Uuid::new_v4(),
            name: "Notebook".to_string(),
            quantity: 3,
            unit_price_cents: 9_900,
        }],
        shipping_info: ShippingInfo {
            name: "Test Customer".to_string(),
            phone: "9876543210".to_string(),
            address: "4 Park Street".to_string(),
            city: "Kolkata".to_string(),
            state: "West Bengal".to_string(),
            pincode: "700016".to_string(),
            landmark: None,
        },
        payment_info: PaymentInfo {
            id: "pay_prop".to_string(),
            method: PaymentMethod::Razorpay,
            status: "succeeded".to_string(),
        },
        total_cents: 29_700,
    }
}

async fn stored(store: &InMemoryOrderStore, order_id: Uuid) -> Order {
    match store.load(order_id).await {
        Ok(Some(order)) => order,
        other => panic!("order {order_id} should be stored, got {other:?}"),
    }
}

proptest! {
    #[test]
    fn prop_operations_preserve_order_invariants(
        ops in prop::collection::vec(op_strategy(), 1..16),
        seed in any::<u64>(),
    ) {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
        {
            Ok(rt) => rt,
            Err(e) => panic!("runtime creation should succeed: {e}"),
        };

        rt.block_on(async {
            let store = Arc::new(InMemoryOrderStore::new());
            let clock = RuntimeClock::anchored_at(Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap());
            let service = ProgressionService::new(
                store.clone(),
                Arc::new(RosterDispatcher::seeded(RosterDispatcher::default_roster(), seed).unwrap()),
                Arc::new(clock),
                Arc::new(Metrics::new().unwrap()),
                &ProgressionConfig::default(),
            )
            .unwrap();

            let order = Order::place(paid_order(), service.scheduler().now());
            store.insert(&order).await.unwrap();
            let mut before = stored(&store, order.id).await;

            for op in &ops {
                match op {
                    Op::Start => service.start_progression(order.id).await,
                    Op::Force => {
                        prop_assert!(service.force_progress(order.id).await.is_ok());
                    }
                    Op::Sweep => {
                        prop_assert!(service.scheduler().sweep().await.is_ok());
                    }
                    Op::Wait(secs) => tokio::time::sleep(Duration::from_secs(*secs)).await,
                    // Cancelling a delivered or cancelled order is refused
                    Op::Cancel => {
                        let _ = service.cancel_order(order.id, None).await;
                    }
                    Op::SetAutoProgress(enabled) => {
                        prop_assert!(service.set_auto_progress(order.id, *enabled).await.is_ok());
                    }
                }

                let after = stored(&store, order.id).await;
                prop_assert!(after.check_invariants().is_ok(), "after {:?}: {:?}", op, after.check_invariants());
                prop_assert!(after.status_history.starts_with(&before.status_history));

                if let Some(partner) = &before.delivery_partner {
                    prop_assert_eq!(after.delivery_partner.as_ref().map(|p| p.assigned_at), Some(partner.assigned_at));
                }

                if !before.auto_progress_enabled && matches!(op, Op::Wait(_) | Op::Sweep) {
                    prop_assert_eq!(after.status, before.status);
                    prop_assert_eq!(&after.status_history, &before.status_history);
                }

                before = after;
            }

            // Let any timer armed by an in-flight step run out
            tokio::time::sleep(Duration::from_secs(3600)).await;
            let settled = stored(&store, order.id).await;
            prop_assert!(settled.check_invariants().is_ok());
            if !settled.is_active() {
                prop_assert_eq!(service.scheduler().active_timers(), 0);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
