//! Dimensions and dimension values: the analytical axes of journal lines.
//!
//! A dimension's code freezes once it has values; a dimension value's code,
//! name, and owning dimension are frozen at insert. Deletion follows the
//! RESTRICT foreign keys.

use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::errors::LedgerError;

#[derive(Debug, Clone, FromRow)]
pub struct Dimension {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct DimensionValue {
    pub id: Uuid,
    pub dimension_code: String,
    pub code: String,
    pub name: String,
    pub is_active: bool,
}

pub async fn insert_dimension(
    tx: &mut Transaction<'_, Postgres>,
    code: &str,
    name: &str,
) -> Result<Dimension, sqlx::Error> {
    sqlx::query_as::<_, Dimension>(
        r#"
        INSERT INTO dimensions (id, code, name, is_active)
        VALUES ($1, $2, $3, TRUE)
        RETURNING id, code, name, is_active
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(code)
    .bind(name)
    .fetch_one(&mut **tx)
    .await
}

pub async fn insert_value(
    tx: &mut Transaction<'_, Postgres>,
    dimension_code: &str,
    code: &str,
    name: &str,
) -> Result<DimensionValue, sqlx::Error> {
    sqlx::query_as::<_, DimensionValue>(
        r#"
        INSERT INTO dimension_values (id, dimension_code, code, name, is_active)
        VALUES ($1, $2, $3, $4, TRUE)
        RETURNING id, dimension_code, code, name, is_active
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(dimension_code)
    .bind(code)
    .bind(name)
    .fetch_one(&mut **tx)
    .await
}

pub async fn find_dimension(
    pool: &PgPool,
    code: &str,
) -> Result<Option<Dimension>, sqlx::Error> {
    sqlx::query_as::<_, Dimension>(
        "SELECT id, code, name, is_active FROM dimensions WHERE code = $1",
    )
    .bind(code)
    .fetch_optional(pool)
    .await
}

/// All dimensions ordered by code, for snapshot capture.
pub async fn list_dimensions_ordered(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Vec<Dimension>, sqlx::Error> {
    sqlx::query_as::<_, Dimension>(
        "SELECT id, code, name, is_active FROM dimensions ORDER BY code",
    )
    .fetch_all(&mut **tx)
    .await
}

/// All dimension values ordered by (dimension_code, code).
pub async fn list_values_ordered(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Vec<DimensionValue>, sqlx::Error> {
    sqlx::query_as::<_, DimensionValue>(
        r#"
        SELECT id, dimension_code, code, name, is_active
        FROM dimension_values
        ORDER BY dimension_code, code
        "#,
    )
    .fetch_all(&mut **tx)
    .await
}

async fn dimension_has_values(
    tx: &mut Transaction<'_, Postgres>,
    dimension_code: &str,
) -> Result<bool, sqlx::Error> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM dimension_values WHERE dimension_code = $1",
    )
    .bind(dimension_code)
    .fetch_one(&mut **tx)
    .await?;
    Ok(count > 0)
}

/// Rename a dimension and/or toggle activity. The code freezes once the
/// dimension has any value.
pub async fn update_dimension(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    new_code: &str,
    name: &str,
    is_active: bool,
) -> Result<Dimension, LedgerError> {
    let existing = sqlx::query_as::<_, Dimension>(
        "SELECT id, code, name, is_active FROM dimensions WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(LedgerError::ValidationFailed {
        reason: format!("dimension {id} not found"),
    })?;

    if new_code != existing.code && dimension_has_values(tx, &existing.code).await? {
        return Err(LedgerError::ImmutabilityViolation {
            entity: "dimension",
            id: id.to_string(),
            reason: "dimension code is frozen once values exist".to_string(),
        });
    }

    let row = sqlx::query_as::<_, Dimension>(
        r#"
        UPDATE dimensions SET code = $2, name = $3, is_active = $4
        WHERE id = $1
        RETURNING id, code, name, is_active
        "#,
    )
    .bind(id)
    .bind(new_code)
    .bind(name)
    .bind(is_active)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row)
}

/// Toggle a dimension value's activity. Code, name, and owning dimension
/// are frozen after insert.
pub async fn set_value_active(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    is_active: bool,
) -> Result<DimensionValue, LedgerError> {
    let row = sqlx::query_as::<_, DimensionValue>(
        r#"
        UPDATE dimension_values SET is_active = $2
        WHERE id = $1
        RETURNING id, dimension_code, code, name, is_active
        "#,
    )
    .bind(id)
    .bind(is_active)
    .fetch_optional(&mut **tx)
    .await?;

    row.ok_or(LedgerError::ValidationFailed {
        reason: format!("dimension value {id} not found"),
    })
}
