//! Audit chain linkage and reversal behavior.

mod common;

use serde_json::json;
use serial_test::serial;
use uuid::Uuid;

use rust_decimal::Decimal;

use ledger_kernel_rs::contracts::accounting_intent::Side;
use ledger_kernel_rs::repos::audit_repo;
use ledger_kernel_rs::repos::journal_repo::{self, EntryStatus};
use ledger_kernel_rs::selectors::ledger_selector;
use ledger_kernel_rs::services::interpretation_coordinator::PostingOutcome;
use ledger_kernel_rs::services::{audit_service, period_service, reversal_service};

use common::{
    coordinator, date, gl_intent, intent_line, reset_database, sales_envelope,
    seed_standard_ledger, test_clock, try_pool,
};

async fn post_sale(pool: &sqlx::PgPool, amount: &str) -> Uuid {
    let coordinator = coordinator(test_clock());
    let actor = Uuid::new_v4();
    let event_id = Uuid::new_v4();
    let envelope = sales_envelope(event_id, json!({ "amount": amount, "currency": "USD" }));
    let intent = gl_intent(
        event_id,
        date(2025, 6, 15),
        vec![
            intent_line("CASH", Side::Debit, amount, "USD"),
            intent_line("REVENUE", Side::Credit, amount, "USD"),
        ],
    );

    let mut tx = pool.begin().await.unwrap();
    let outcome = coordinator
        .interpret_and_post(&mut tx, &envelope, &intent, actor, false)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    match outcome {
        PostingOutcome::Posted { entries, .. } => entries[0].entry_id,
        other => panic!("expected Posted, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn chain_links_every_row_to_its_predecessor() {
    let Some(pool) = try_pool().await else { return };
    reset_database(&pool).await;
    seed_standard_ledger(&pool).await;

    post_sale(&pool, "11.00").await;
    post_sale(&pool, "22.00").await;
    post_sale(&pool, "33.00").await;

    let actor = Uuid::new_v4();
    let clock = test_clock();
    let mut tx = pool.begin().await.unwrap();
    period_service::close_period(&mut tx, clock.as_ref(), "2025-06", actor)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let rows = audit_repo::list_ordered(&pool).await.unwrap();
    assert_eq!(rows.len(), 4, "three POSTING events and one PERIOD_CLOSED");
    assert_eq!(rows[3].action, "PERIOD_CLOSED");

    // Explicit linkage walk (the P7 property)
    for pair in rows.windows(2) {
        assert_eq!(pair[1].prev_hash, pair[0].hash);
    }
    assert_eq!(rows[0].prev_hash, ledger_kernel_rs::canonical::GENESIS_HASH);

    // Service-level verification recomputes every hash
    let report = audit_service::validate_chain(&pool).await.unwrap();
    assert_eq!(report.length, 4);
    assert_eq!(report.tail_hash.as_deref(), Some(rows[3].hash.as_str()));
}

#[tokio::test]
#[serial]
async fn reversal_mirrors_lines_and_nets_to_zero() {
    let Some(pool) = try_pool().await else { return };
    reset_database(&pool).await;
    seed_standard_ledger(&pool).await;

    let entry_id = post_sale(&pool, "80.00").await;
    let actor = Uuid::new_v4();
    let clock = test_clock();

    let mut tx = pool.begin().await.unwrap();
    let reversal = reversal_service::reverse_entry(&mut tx, clock.as_ref(), entry_id, actor, None)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    // The original transitioned POSTED -> REVERSED; the reversal points back
    let original = journal_repo::find_entry(&pool, entry_id).await.unwrap().unwrap();
    assert_eq!(original.status, EntryStatus::Reversed);
    let mirror = journal_repo::find_entry(&pool, reversal.entry_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mirror.status, EntryStatus::Posted);
    assert_eq!(mirror.reversal_of_id, Some(entry_id));
    assert!(mirror.seq > original.seq);

    // Sides are swapped line for line
    let original_lines = journal_repo::find_lines(&pool, entry_id).await.unwrap();
    let mirror_lines = journal_repo::find_lines(&pool, reversal.entry_id).await.unwrap();
    assert_eq!(original_lines.len(), mirror_lines.len());
    for (a, b) in original_lines.iter().zip(mirror_lines.iter()) {
        assert_eq!(a.side.opposite(), b.side);
        assert_eq!(a.amount, b.amount);
        assert_eq!(a.account_id, b.account_id);
    }

    // Only the reversal entry remains in the posted view, and it balances
    let (debits, credits) = ledger_selector::total_debits_credits(&pool, None, Some("USD"))
        .await
        .unwrap();
    assert_eq!(debits, credits);
    assert_eq!(debits, Decimal::new(8000, 2));

    // Double reversal is refused
    let mut tx = pool.begin().await.unwrap();
    let err = reversal_service::reverse_entry(&mut tx, clock.as_ref(), entry_id, actor, None)
        .await
        .unwrap_err();
    tx.rollback().await.unwrap();
    assert_eq!(err.code(), "VALIDATION_FAILED");

    let report = audit_service::validate_chain(&pool).await.unwrap();
    assert_eq!(report.length, 2, "one POSTING and one REVERSAL");
}
