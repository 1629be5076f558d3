//! Common test utilities for ledger kernel integration tests.
//!
//! ## Singleton Pool Pattern
//! All integration tests share a single database connection pool per test
//! binary, capped via `DB_MAX_CONNECTIONS` to avoid exhausting Postgres when
//! several binaries run in parallel.
//!
//! ## Skipping without a database
//! Tests call [`try_pool`] and return early when `DATABASE_URL` is unset, so
//! the suite is runnable on machines without Postgres. With a database the
//! full paths run.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::OnceCell;
use uuid::Uuid;

use ledger_kernel_rs::clock::{Clock, FixedClock};
use ledger_kernel_rs::contracts::accounting_intent::{
    AccountingIntent, IntentLine, LedgerIntent, Side, SnapshotVersions,
};
use ledger_kernel_rs::contracts::policy::{EconomicProfile, Guard, PolicyRegistry};
use ledger_kernel_rs::db;
use ledger_kernel_rs::repos::account_repo::{self, AccountType, NewAccount, NormalBalance};
use ledger_kernel_rs::repos::event_repo::NewEvent;
use ledger_kernel_rs::repos::period_repo::{self, NewPeriod};
use ledger_kernel_rs::repos::role_repo;
use ledger_kernel_rs::services::interpretation_coordinator::InterpretationCoordinator;
use ledger_kernel_rs::services::snapshot_service::SnapshotService;

static TEST_POOL: OnceCell<PgPool> = OnceCell::const_new();

/// The ledger id used throughout the integration tests.
pub const LEDGER: &str = "GL";

/// Get the shared pool, or None (with a notice) when no database is
/// configured.
pub async fn try_pool() -> Option<PgPool> {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("DATABASE_URL not set; skipping database-backed test");
        return None;
    }
    Some(get_test_pool().await)
}

async fn get_test_pool() -> PgPool {
    if std::env::var("DB_MAX_CONNECTIONS").is_err() {
        std::env::set_var("DB_MAX_CONNECTIONS", "12");
    }
    if std::env::var("DB_ACQUIRE_TIMEOUT_SECS").is_err() {
        std::env::set_var("DB_ACQUIRE_TIMEOUT_SECS", "10");
    }

    TEST_POOL
        .get_or_init(|| async {
            ledger_kernel_rs::config::init_tracing();
            let database_url =
                std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
            let pool = db::init_pool(&database_url)
                .await
                .expect("Failed to initialize test pool");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run migrations");
            pool
        })
        .await
        .clone()
}

/// Truncate every kernel table so a test starts from a fresh ledger.
///
/// TRUNCATE does not fire the row-level immutability triggers, which is
/// exactly what makes cleanup of append-only tables possible.
pub async fn reset_database(pool: &PgPool) {
    sqlx::query(
        r#"
        TRUNCATE TABLE interpretation_outcomes, economic_events, audit_events,
                       journal_lines, journal_entries, account_role_bindings,
                       dimension_values, dimensions, exchange_rates, events,
                       accounts, fiscal_periods, sequence_counters
        "#,
    )
    .execute(pool)
    .await
    .expect("Failed to reset database");
}

/// A deterministic clock pinned inside the seeded June 2025 period.
pub fn test_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::at(
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap(),
    ))
}

/// The standard test registry: one sales profile with payload guards.
pub fn test_registry() -> Arc<PolicyRegistry> {
    Arc::new(PolicyRegistry::new(
        1,
        vec![EconomicProfile {
            profile_id: "sales.cash_sale".to_string(),
            version: 1,
            event_type: "sales.invoice".to_string(),
            economic_type: "revenue.earned".to_string(),
            module: "gl".to_string(),
            description: Some("Cash sale recognized at invoice time".to_string()),
            guards: vec![Guard::PositiveAmount {
                field: "amount".to_string(),
            }],
            quantity_field: None,
            value_field: Some("amount".to_string()),
            currency_field: Some("currency".to_string()),
            dimension_fields: vec![],
        }],
    ))
}

/// Coordinator wired with the test clock and registry.
pub fn coordinator(clock: Arc<FixedClock>) -> InterpretationCoordinator {
    let registry = test_registry();
    let snapshots = Arc::new(SnapshotService::new(
        clock.clone() as Arc<dyn Clock>,
        registry.clone(),
    ));
    InterpretationCoordinator::new(clock as Arc<dyn Clock>, registry, snapshots)
}

/// Ids of the accounts seeded by [`seed_standard_ledger`].
pub struct SeededLedger {
    pub cash_account_id: Uuid,
    pub revenue_account_id: Uuid,
    pub rounding_account_id: Uuid,
    pub period_code: String,
}

/// Seed the canonical test world: CASH and REVENUE accounts bound to roles
/// for the GL ledger, a multi-currency rounding account, and open fiscal
/// periods for June and July 2025.
pub async fn seed_standard_ledger(pool: &PgPool) -> SeededLedger {
    let mut tx = pool.begin().await.expect("begin seed tx");

    let cash = account_repo::insert(
        &mut tx,
        &NewAccount {
            code: "1000".to_string(),
            name: "Cash".to_string(),
            account_type: AccountType::Asset,
            normal_balance: NormalBalance::Debit,
            tags: vec![],
            parent_id: None,
            currency: None,
        },
    )
    .await
    .expect("seed cash account");

    let revenue = account_repo::insert(
        &mut tx,
        &NewAccount {
            code: "4000".to_string(),
            name: "Revenue".to_string(),
            account_type: AccountType::Revenue,
            normal_balance: NormalBalance::Credit,
            tags: vec![],
            parent_id: None,
            currency: None,
        },
    )
    .await
    .expect("seed revenue account");

    let rounding = account_repo::insert(
        &mut tx,
        &NewAccount {
            code: "9999".to_string(),
            name: "Rounding Differences".to_string(),
            account_type: AccountType::Expense,
            normal_balance: NormalBalance::Debit,
            tags: vec!["rounding".to_string()],
            parent_id: None,
            currency: None,
        },
    )
    .await
    .expect("seed rounding account");

    period_repo::insert(
        &mut tx,
        &NewPeriod {
            period_code: "2025-06".to_string(),
            name: "June 2025".to_string(),
            start_date: date(2025, 6, 1),
            end_date: date(2025, 6, 30),
            allows_adjustments: false,
        },
    )
    .await
    .expect("seed june period");

    period_repo::insert(
        &mut tx,
        &NewPeriod {
            period_code: "2025-07".to_string(),
            name: "July 2025".to_string(),
            start_date: date(2025, 7, 1),
            end_date: date(2025, 7, 31),
            allows_adjustments: false,
        },
    )
    .await
    .expect("seed july period");

    for (role, code) in [("CASH", "1000"), ("REVENUE", "4000")] {
        role_repo::insert(&mut tx, role, LEDGER, code, date(2020, 1, 1), None)
            .await
            .expect("seed role binding");
    }

    tx.commit().await.expect("commit seed tx");

    SeededLedger {
        cash_account_id: cash.id,
        revenue_account_id: revenue.id,
        rounding_account_id: rounding.id,
        period_code: "2025-06".to_string(),
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A sales.invoice envelope with the given payload.
pub fn sales_envelope(event_id: Uuid, payload: Value) -> NewEvent {
    NewEvent {
        event_id,
        event_type: "sales.invoice".to_string(),
        occurred_at: Utc.with_ymd_and_hms(2025, 6, 15, 9, 30, 0).unwrap(),
        effective_date: date(2025, 6, 15),
        actor_id: Uuid::new_v4(),
        producer: "sales".to_string(),
        payload,
        schema_version: 1,
    }
}

pub fn intent_line(role: &str, side: Side, amount: &str, currency: &str) -> IntentLine {
    IntentLine {
        role: role.to_string(),
        side,
        amount: amount.parse().unwrap(),
        currency: currency.to_string(),
        dimensions: None,
        memo: None,
        exchange_rate_id: None,
    }
}

/// A single-ledger intent for the given source event.
pub fn gl_intent(
    source_event_id: Uuid,
    effective_date: NaiveDate,
    lines: Vec<IntentLine>,
) -> AccountingIntent {
    AccountingIntent {
        source_event_id,
        profile_id: "sales.cash_sale".to_string(),
        profile_version: 1,
        effective_date,
        description: Some("Cash sale".to_string()),
        ledgers: vec![LedgerIntent {
            ledger_id: LEDGER.to_string(),
            lines,
        }],
        snapshot_versions: SnapshotVersions {
            coa_version: 1,
            dimension_schema_version: 1,
            rounding_policy_version: 1,
            fx_rates_version: 1,
        },
    }
}

pub async fn count_rows(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("count rows")
}
