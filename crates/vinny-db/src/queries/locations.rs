//! Query functions for the `dropoff_locations` table.

use sqlx::PgPool;

use crate::error::DbResult;
use crate::models::DropoffLocation;

/// Two-letter state codes that have at least one dropoff location.
pub async fn available_states(pool: &PgPool) -> DbResult<Vec<String>> {
    let states: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT state FROM dropoff_locations ORDER BY state")
            .fetch_all(pool)
            .await?;
    Ok(states.into_iter().map(|(s,)| s).collect())
}

/// Up to `limit` dropoff addresses in one state.
pub async fn addresses_for_state(
    pool: &PgPool,
    state: &str,
    limit: i64,
) -> DbResult<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT address FROM dropoff_locations WHERE state = $1 ORDER BY id LIMIT $2",
    )
    .bind(state)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(a,)| a).collect())
}

/// Insert a dropoff location (used by fixtures and `db-init` seeding).
pub async fn insert_location(pool: &PgPool, state: &str, address: &str) -> DbResult<DropoffLocation> {
    let location = sqlx::query_as::<_, DropoffLocation>(
        "INSERT INTO dropoff_locations (state, address) VALUES ($1, $2) RETURNING *",
    )
    .bind(state)
    .bind(address)
    .fetch_one(pool)
    .await?;
    Ok(location)
}
