//! Canonical ledger hash: replay determinism end-to-end.
//!
//! The same posted content must hash identically regardless of intent line
//! order and formatting; different content must hash differently.

mod common;

use std::collections::BTreeMap;

use serde_json::json;
use serial_test::serial;
use uuid::Uuid;

use ledger_kernel_rs::contracts::accounting_intent::{IntentLine, Side};
use ledger_kernel_rs::selectors::ledger_selector;
use ledger_kernel_rs::services::interpretation_coordinator::PostingOutcome;

use common::{
    coordinator, date, gl_intent, intent_line, reset_database, sales_envelope,
    seed_standard_ledger, test_clock, try_pool,
};

/// Deterministic event ids so a replay posts the same events.
fn event_ids(n: u32) -> Vec<Uuid> {
    (0..n)
        .map(|i| Uuid::from_u128(0x6f5e_4d3c_0000_0000_0000_0000_0000_0000u128 + i as u128))
        .collect()
}

fn lines_for(i: u32, reversed_order: bool) -> Vec<IntentLine> {
    let amount = format!("{}.{:02}", 10 + i, (i * 7) % 100);
    let mut dims = BTreeMap::new();
    dims.insert("region".to_string(), if i % 2 == 0 { "emea" } else { "apac" }.to_string());
    dims.insert("channel".to_string(), "web".to_string());

    let mut debit = intent_line("CASH", Side::Debit, &amount, "USD");
    debit.dimensions = Some(dims.clone());
    let mut credit = intent_line("REVENUE", Side::Credit, &amount, "USD");
    credit.dimensions = Some(dims);

    if reversed_order {
        vec![credit, debit]
    } else {
        vec![debit, credit]
    }
}

async fn post_ledger(pool: &sqlx::PgPool, reversed_line_order: bool) {
    let coordinator = coordinator(test_clock());
    let actor = Uuid::new_v4();

    for (i, event_id) in event_ids(12).into_iter().enumerate() {
        let i = i as u32;
        let envelope = sales_envelope(event_id, json!({ "amount": "1.00", "currency": "USD" }));
        let intent = gl_intent(
            event_id,
            date(2025, 6, 1 + (i % 28)),
            lines_for(i, reversed_line_order),
        );

        let mut tx = pool.begin().await.unwrap();
        let outcome = coordinator
            .interpret_and_post(&mut tx, &envelope, &intent, actor, false)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert!(matches!(outcome, PostingOutcome::Posted { .. }));
    }
}

#[tokio::test]
#[serial]
async fn replay_with_permuted_intent_lines_hashes_identically() {
    let Some(pool) = try_pool().await else { return };

    reset_database(&pool).await;
    seed_standard_ledger(&pool).await;
    post_ledger(&pool, false).await;
    let original = ledger_selector::canonical_hash(&pool, None, None).await.unwrap();
    assert_eq!(original.len(), 64);

    // Drop the ledger, replay the same events with every intent's lines in
    // the opposite order. The deterministic line ordering inside the writer
    // makes the posted content identical.
    reset_database(&pool).await;
    seed_standard_ledger(&pool).await;
    post_ledger(&pool, true).await;
    let replayed = ledger_selector::canonical_hash(&pool, None, None).await.unwrap();

    assert_eq!(original, replayed, "canonical hash is replay-stable");

    assert!(
        ledger_selector::verify_canonical_hash(&pool, &original, None, None)
            .await
            .unwrap()
    );
}

#[tokio::test]
#[serial]
async fn hash_changes_when_content_changes() {
    let Some(pool) = try_pool().await else { return };

    reset_database(&pool).await;
    seed_standard_ledger(&pool).await;
    post_ledger(&pool, false).await;
    let before = ledger_selector::canonical_hash(&pool, None, None).await.unwrap();

    // One more posting changes the content hash
    let coordinator = coordinator(test_clock());
    let actor = Uuid::new_v4();
    let event_id = Uuid::new_v4();
    let envelope = sales_envelope(event_id, json!({ "amount": "5.00", "currency": "USD" }));
    let intent = gl_intent(
        event_id,
        date(2025, 6, 29),
        vec![
            intent_line("CASH", Side::Debit, "5.00", "USD"),
            intent_line("REVENUE", Side::Credit, "5.00", "USD"),
        ],
    );
    let mut tx = pool.begin().await.unwrap();
    coordinator
        .interpret_and_post(&mut tx, &envelope, &intent, actor, false)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let after = ledger_selector::canonical_hash(&pool, None, None).await.unwrap();
    assert_ne!(before, after);
}

#[tokio::test]
#[serial]
async fn as_of_filter_is_part_of_the_identity() {
    let Some(pool) = try_pool().await else { return };

    reset_database(&pool).await;
    seed_standard_ledger(&pool).await;
    post_ledger(&pool, false).await;

    let full = ledger_selector::canonical_hash(&pool, None, None).await.unwrap();
    let early = ledger_selector::canonical_hash(&pool, Some(date(2025, 6, 5)), None)
        .await
        .unwrap();
    assert_ne!(full, early, "an as-of cutoff views different content");

    // Repeated evaluation of the same cutoff is byte-identical
    let early_again = ledger_selector::canonical_hash(&pool, Some(date(2025, 6, 5)), None)
        .await
        .unwrap();
    assert_eq!(early, early_again);
}
