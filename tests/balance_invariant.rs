use hisab_khata::{
    ledger,
    store::{MemoryStore, Store},
    types::{EntryKind, NewEntry, NewProfile, NewUser, User, resolve_parties},
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone, Copy)]
enum Op {
    Purchase(i64),
    Payment(i64),
    Refund(i64),
    Adjustment(i64),
}

fn op() -> impl Strategy<Value = Op> {
    let cents = 1i64..5_000_000;
    prop_oneof![
        cents.clone().prop_map(Op::Purchase),
        cents.clone().prop_map(Op::Payment),
        cents.clone().prop_map(Op::Refund),
        (cents, any::<bool>()).prop_map(|(c, up)| Op::Adjustment(if up { c } else { -c })),
    ]
}

async fn parties(store: &MemoryStore) -> (User, User, i64) {
    let customer = store
        .create_user(NewUser {
            email: "c@example.com".into(),
            full_name: "Customer".into(),
            phone_number: None,
            profile: NewProfile::Customer,
        })
        .await
        .unwrap();
    let business = store
        .create_user(NewUser {
            email: "b@example.com".into(),
            full_name: "Owner".into(),
            phone_number: None,
            profile: NewProfile::Business {
                business_name: "Shop".into(),
            },
        })
        .await
        .unwrap();
    let pair = resolve_parties(&customer.role, &business.role).unwrap();
    let (rel, _) = store.get_or_create_relationship(pair).await.unwrap();
    (customer, business, rel.id)
}

async fn apply(ops: Vec<Op>) {
    let store = MemoryStore::new();
    let (customer, business, rel) = parties(&store).await;

    for op in ops {
        let (caller, kind, cents) = match op {
            Op::Purchase(c) => (&business, EntryKind::Purchase, c),
            Op::Payment(c) => (&customer, EntryKind::Payment, -c),
            Op::Refund(c) => (&business, EntryKind::Refund, -c),
            Op::Adjustment(c) => (&business, EntryKind::Adjustment, c),
        };
        let (_, due) = ledger::create_entry(
            &store,
            caller,
            NewEntry {
                relationship_id: rel,
                amount: Decimal::new(cents, 2),
                kind,
                description: String::new(),
            },
        )
        .await
        .unwrap();

        let sum: Decimal = store
            .list_entries(&[rel])
            .await
            .unwrap()
            .iter()
            .map(|e| e.amount)
            .sum();
        assert_eq!(due, sum);
        assert_eq!(due.scale(), 2);
        let cached = store.get_relationship(rel).await.unwrap().unwrap();
        assert_eq!(cached.pending_due, sum);
    }

    let first = ledger::recompute(&store, rel).await.unwrap();
    let second = ledger::recompute(&store, rel).await.unwrap();
    assert_eq!(first, second);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pending_due_tracks_entry_sum(ops in prop::collection::vec(op(), 1..40)) {
        tokio_test::block_on(apply(ops));
    }
}

#[tokio::test]
async fn reconcile_reports_nothing_on_a_clean_ledger() {
    let store = MemoryStore::new();
    let (customer, business, rel) = parties(&store).await;
    for (caller, amount, kind) in [
        (&business, dec!(100), EntryKind::Purchase),
        (&customer, dec!(-40), EntryKind::Payment),
    ] {
        ledger::create_entry(
            &store,
            caller,
            NewEntry {
                relationship_id: rel,
                amount,
                kind,
                description: "counter".into(),
            },
        )
        .await
        .unwrap();
    }

    let report = ledger::reconcile(&store).await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.corrected, 0);
    assert_eq!(ledger::recompute(&store, rel).await.unwrap(), dec!(60.00));
}
