//! Named sequence counters.
//!
//! Every seq-assigning operation in the kernel (journal entries, audit
//! events) draws from a counter row in `sequence_counters`, incremented
//! under a row-level lock inside the caller's transaction. A rolled-back
//! transaction rolls the increment back too: gaps are tolerated and never
//! reused. `SELECT MAX(seq)+1` patterns and application-side counters are
//! forbidden by design.

use sqlx::{PgPool, Postgres, Transaction};

/// Well-known counter names.
pub const JOURNAL_ENTRY: &str = "journal_entry";
pub const AUDIT_EVENT: &str = "audit_event";

/// Allocate the next value for a named counter.
///
/// The upsert takes the row lock, reads `current_value`, writes
/// `current_value + 1`, and returns the new value atomically, serialized
/// against concurrent allocators of the same counter. A missing counter row
/// is created with value 1.
pub async fn next_value(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
) -> Result<i64, sqlx::Error> {
    let value = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO sequence_counters (name, current_value)
        VALUES ($1, 1)
        ON CONFLICT (name)
        DO UPDATE SET current_value = sequence_counters.current_value + 1
        RETURNING current_value
        "#,
    )
    .bind(name)
    .fetch_one(&mut **tx)
    .await?;

    Ok(value)
}

/// Read a counter without incrementing. Returns None for unknown counters.
pub async fn current_value(pool: &PgPool, name: &str) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT current_value FROM sequence_counters WHERE name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await
}
