//! Query functions for the `cars` table.
//!
//! Column names are never interpolated from caller input: every dynamic
//! update goes through the [`ALLOWED_FIELDS`] whitelist and a per-column
//! type map.

use serde_json::Value;
use sqlx::PgPool;

use crate::error::{DbResult, StorageError};
use crate::models::Car;

/// Columns a caller may insert or update. Anything else is dropped by the
/// caller before reaching this module.
pub const ALLOWED_FIELDS: &[&str] = &[
    "vin",
    "year",
    "make",
    "model",
    "trim",
    "mileage",
    "interior_condition",
    "exterior_condition",
    "seller_ask_cents",
    "buyer_offer_cents",
    "created_at",
    "lead_id",
];

/// Columns stored as INTEGER.
const INT_FIELDS: &[&str] = &["year", "mileage"];
/// Columns stored as BIGINT.
const BIGINT_FIELDS: &[&str] = &["seller_ask_cents", "buyer_offer_cents", "lead_id"];

pub async fn get_car(pool: &PgPool, id: i64) -> DbResult<Option<Car>> {
    let car = sqlx::query_as::<_, Car>("SELECT * FROM cars WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(car)
}

pub async fn find_by_vin(pool: &PgPool, vin: &str) -> DbResult<Vec<Car>> {
    let cars = sqlx::query_as::<_, Car>("SELECT * FROM cars WHERE vin = $1 ORDER BY id")
        .bind(vin.trim())
        .fetch_all(pool)
        .await?;
    Ok(cars)
}

/// Case-insensitive substring match on `model`.
pub async fn find_by_model(pool: &PgPool, model: &str) -> DbResult<Vec<Car>> {
    let pattern = format!("%{}%", model.trim());
    let cars = sqlx::query_as::<_, Car>("SELECT * FROM cars WHERE model ILIKE $1 ORDER BY id")
        .bind(pattern)
        .fetch_all(pool)
        .await?;
    Ok(cars)
}

/// Case-insensitive substring match on `make`.
pub async fn find_by_make(pool: &PgPool, make: &str) -> DbResult<Vec<Car>> {
    let pattern = format!("%{}%", make.trim());
    let cars = sqlx::query_as::<_, Car>("SELECT * FROM cars WHERE make ILIKE $1 ORDER BY id")
        .bind(pattern)
        .fetch_all(pool)
        .await?;
    Ok(cars)
}

pub async fn find_by_year(pool: &PgPool, year: i32) -> DbResult<Vec<Car>> {
    let cars = sqlx::query_as::<_, Car>("SELECT * FROM cars WHERE year = $1 ORDER BY id")
        .bind(year)
        .fetch_all(pool)
        .await?;
    Ok(cars)
}

pub async fn list_all(pool: &PgPool) -> DbResult<Vec<Car>> {
    let cars = sqlx::query_as::<_, Car>("SELECT * FROM cars ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(cars)
}

pub async fn exists(pool: &PgPool, id: i64) -> DbResult<bool> {
    let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM cars WHERE id = $1 LIMIT 1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Apply a field-by-field patch to one car. Returns the number of fields
/// that actually updated a row.
///
/// Fields not in [`ALLOWED_FIELDS`] are skipped silently; the policy layer
/// is responsible for rejecting them earlier when that matters.
pub async fn update_fields(pool: &PgPool, id: i64, patch: &[(String, Value)]) -> DbResult<u32> {
    let mut updated = 0u32;
    for (field, value) in patch {
        if !ALLOWED_FIELDS.contains(&field.as_str()) {
            continue;
        }
        // `field` is whitelisted above, so interpolation is safe.
        let stmt = format!("UPDATE cars SET {field} = $1 WHERE id = $2");
        let result = bind_field(sqlx::query(&stmt), field, value)?
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() > 0 {
            updated += 1;
        }
    }
    Ok(updated)
}

/// Next negative id for sandbox-created rows: -1, then -2, -3, ...
pub async fn next_sandbox_id(pool: &PgPool) -> DbResult<i64> {
    let min_id: Option<i64> = sqlx::query_scalar("SELECT MIN(id) FROM cars")
        .fetch_one(pool)
        .await?;
    Ok(match min_id {
        Some(id) if id < 0 => id - 1,
        _ => -1,
    })
}

/// Insert a new car row with an explicit id. Missing fields are stored as
/// NULL. Returns the inserted row.
pub async fn insert(pool: &PgPool, id: i64, patch: &[(String, Value)]) -> DbResult<Car> {
    let get = |name: &str| patch.iter().find(|(f, _)| f == name).map(|(_, v)| v);

    let car = sqlx::query_as::<_, Car>(
        "INSERT INTO cars (id, vin, year, make, model, trim, mileage, \
         interior_condition, exterior_condition, seller_ask_cents, \
         buyer_offer_cents, created_at, lead_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
         RETURNING *",
    )
    .bind(id)
    .bind(text_of(get("vin")))
    .bind(int_of(get("year"))?)
    .bind(text_of(get("make")))
    .bind(text_of(get("model")))
    .bind(text_of(get("trim")))
    .bind(int_of(get("mileage"))?)
    .bind(text_of(get("interior_condition")))
    .bind(text_of(get("exterior_condition")))
    .bind(bigint_of(get("seller_ask_cents"))?)
    .bind(bigint_of(get("buyer_offer_cents"))?)
    .bind(text_of(get("created_at")))
    .bind(bigint_of(get("lead_id"))?)
    .fetch_one(pool)
    .await?;

    Ok(car)
}

// ---------------------------------------------------------------------------
// JSON value binding helpers
// ---------------------------------------------------------------------------

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

/// Bind a JSON value as the first argument of `query`, using the column's
/// storage type. A JSON type that does not fit the column is a caller bug
/// surfaced as a transaction failure.
fn bind_field<'q>(query: PgQuery<'q>, field: &str, value: &Value) -> DbResult<PgQuery<'q>> {
    if INT_FIELDS.contains(&field) {
        Ok(query.bind(int_of(Some(value))?))
    } else if BIGINT_FIELDS.contains(&field) {
        Ok(query.bind(bigint_of(Some(value))?))
    } else {
        Ok(query.bind(text_of(Some(value))))
    }
}

fn text_of(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        // Numbers and booleans are stored as their display form; TEXT
        // columns in the sandbox accept whatever the lead typed.
        Some(other) => Some(other.to_string()),
    }
}

fn int_of(value: Option<&Value>) -> DbResult<Option<i32>> {
    bigint_of(value).map(|v| v.map(|n| n as i32))
}

fn bigint_of(value: Option<&Value>) -> DbResult<Option<i64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(|| {
            StorageError::Txn(format!("non-integer numeric value {n} for integer column"))
        }),
        Some(Value::String(s)) => s.trim().parse::<i64>().map(Some).map_err(|_| {
            StorageError::Txn(format!("value {s:?} does not fit an integer column"))
        }),
        Some(other) => Err(StorageError::Txn(format!(
            "value {other} does not fit an integer column"
        ))),
    }
}
