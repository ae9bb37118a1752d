//! Query functions for the `buyers` and `buyer_schedule` tables.

use sqlx::PgPool;

use crate::error::DbResult;
use crate::models::ScheduleSlot;

/// Insert a buyer row (used by fixtures and data loads).
pub async fn insert_buyer(pool: &PgPool, buyer_id: i64, name: Option<&str>) -> DbResult<()> {
    sqlx::query("INSERT INTO buyers (id, name) VALUES ($1, $2)")
        .bind(buyer_id)
        .bind(name)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn buyer_exists(pool: &PgPool, buyer_id: i64) -> DbResult<bool> {
    let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM buyers WHERE id = $1 LIMIT 1")
        .bind(buyer_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// All schedule rows for a buyer, ordered by schedule_time.
pub async fn list_for_buyer(pool: &PgPool, buyer_id: i64) -> DbResult<Vec<ScheduleSlot>> {
    let slots = sqlx::query_as::<_, ScheduleSlot>(
        "SELECT id, buyer_id, description, schedule_time, priority \
         FROM buyer_schedule WHERE buyer_id = $1 \
         ORDER BY schedule_time ASC",
    )
    .bind(buyer_id)
    .fetch_all(pool)
    .await?;
    Ok(slots)
}

/// The slot already booked at exactly `schedule_time`, if any.
///
/// `schedule_time` must already be normalized to `YYYY-MM-DD HH:MM:SS`;
/// the collision check is a plain string compare.
pub async fn find_at_time(
    pool: &PgPool,
    buyer_id: i64,
    schedule_time: &str,
) -> DbResult<Option<ScheduleSlot>> {
    let slot = sqlx::query_as::<_, ScheduleSlot>(
        "SELECT id, buyer_id, description, schedule_time, priority \
         FROM buyer_schedule WHERE buyer_id = $1 AND schedule_time = $2 \
         LIMIT 1",
    )
    .bind(buyer_id)
    .bind(schedule_time)
    .fetch_optional(pool)
    .await?;
    Ok(slot)
}

/// Insert a schedule slot and return the stored row.
pub async fn insert_slot(
    pool: &PgPool,
    buyer_id: i64,
    description: &str,
    schedule_time: &str,
    priority: &str,
) -> DbResult<ScheduleSlot> {
    let slot = sqlx::query_as::<_, ScheduleSlot>(
        "INSERT INTO buyer_schedule (buyer_id, description, schedule_time, priority) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id, buyer_id, description, schedule_time, priority",
    )
    .bind(buyer_id)
    .bind(description)
    .bind(schedule_time)
    .bind(priority)
    .fetch_one(pool)
    .await?;
    Ok(slot)
}
