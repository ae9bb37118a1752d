//! Query functions for the `pickup` table.

use serde_json::Value;
use sqlx::PgPool;

use crate::error::DbResult;
use crate::models::Pickup;

/// Columns a caller may insert or update on a pickup.
pub const ALLOWED_FIELDS: &[&str] = &[
    "car_id",
    "address",
    "contact_phone",
    "pick_up_info",
    "created_at",
    "dropoff_time",
];

pub async fn get_pickup(pool: &PgPool, pick_up_id: i64) -> DbResult<Option<Pickup>> {
    let pickup = sqlx::query_as::<_, Pickup>("SELECT * FROM pickup WHERE pick_up_id = $1")
        .bind(pick_up_id)
        .fetch_optional(pool)
        .await?;
    Ok(pickup)
}

/// All pickups addressed through a given car, oldest first.
pub async fn list_for_car(pool: &PgPool, car_id: i64) -> DbResult<Vec<Pickup>> {
    let pickups =
        sqlx::query_as::<_, Pickup>("SELECT * FROM pickup WHERE car_id = $1 ORDER BY pick_up_id")
            .bind(car_id)
            .fetch_all(pool)
            .await?;
    Ok(pickups)
}

pub async fn list_all(pool: &PgPool) -> DbResult<Vec<Pickup>> {
    let pickups = sqlx::query_as::<_, Pickup>("SELECT * FROM pickup ORDER BY pick_up_id")
        .fetch_all(pool)
        .await?;
    Ok(pickups)
}

pub async fn exists(pool: &PgPool, pick_up_id: i64) -> DbResult<bool> {
    let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM pickup WHERE pick_up_id = $1")
        .bind(pick_up_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Apply a field-by-field patch to one pickup. Returns the number of fields
/// that actually updated a row.
pub async fn update_fields(
    pool: &PgPool,
    pick_up_id: i64,
    patch: &[(String, Value)],
) -> DbResult<u32> {
    let mut updated = 0u32;
    for (field, value) in patch {
        if !ALLOWED_FIELDS.contains(&field.as_str()) {
            continue;
        }
        let stmt = format!("UPDATE pickup SET {field} = $1 WHERE pick_up_id = $2");
        let query = sqlx::query(&stmt);
        let query = if field == "car_id" {
            query.bind(value.as_i64())
        } else {
            query.bind(match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
        };
        let result = query.bind(pick_up_id).execute(pool).await?;
        if result.rows_affected() > 0 {
            updated += 1;
        }
    }
    Ok(updated)
}

/// Next negative pick_up_id for sandbox-created rows: -1, then -2, -3, ...
pub async fn next_sandbox_id(pool: &PgPool) -> DbResult<i64> {
    let min_id: Option<i64> = sqlx::query_scalar("SELECT MIN(pick_up_id) FROM pickup")
        .fetch_one(pool)
        .await?;
    Ok(match min_id {
        Some(id) if id < 0 => id - 1,
        _ => -1,
    })
}

/// Insert a new pickup row with an explicit id. Missing fields are NULL.
pub async fn insert(
    pool: &PgPool,
    pick_up_id: i64,
    car_id: Option<i64>,
    patch: &[(String, Value)],
) -> DbResult<Pickup> {
    let text = |name: &str| {
        patch
            .iter()
            .find(|(f, _)| f == name)
            .and_then(|(_, v)| match v {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
    };

    let pickup = sqlx::query_as::<_, Pickup>(
        "INSERT INTO pickup (pick_up_id, car_id, address, contact_phone, \
         pick_up_info, created_at, dropoff_time) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(pick_up_id)
    .bind(car_id)
    .bind(text("address"))
    .bind(text("contact_phone"))
    .bind(text("pick_up_info"))
    .bind(text("created_at"))
    .bind(text("dropoff_time"))
    .fetch_one(pool)
    .await?;

    Ok(pickup)
}
