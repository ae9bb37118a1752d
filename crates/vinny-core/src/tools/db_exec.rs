//! Operation bodies over the storage layer.
//!
//! Every method returns a [`ToolResult`]; storage failures are classified
//! at the vinny-db boundary and mapped onto result codes here, never left
//! to escape as raw faults.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Map, Value, json};
use sqlx::PgPool;
use tracing::warn;

use vinny_db::StorageError;
use vinny_db::models::Priority;
use vinny_db::queries::{cars, pickups, schedule};

use super::ToolExecutor;
use crate::distance::{self, DistanceLookup, MAX_MILES_DEFAULT};
use crate::notify::Notifier;
use crate::resolve::{Resolution, ResolveStage, Resolver};
use crate::result::{ErrorCode, ToolResult, data_map};

/// Production executor: storage plus the distance and SMS collaborators.
pub struct DbExecutor {
    pool: PgPool,
    distance: Arc<dyn DistanceLookup>,
    notifier: Arc<dyn Notifier>,
}

impl DbExecutor {
    pub fn new(pool: PgPool, distance: Arc<dyn DistanceLookup>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            pool,
            distance,
            notifier,
        }
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.pool)
    }
}

#[async_trait]
impl ToolExecutor for DbExecutor {
    async fn car_retrieve(&self, query: &Map<String, Value>) -> ToolResult {
        let resolution = match self.resolver().resolve_car(query).await {
            Ok(resolution) => resolution,
            Err(e) => return ToolResult::from_storage_error(e),
        };

        let mut meta = data_map([
            ("selected_key", json!(resolution.selected_key)),
            ("selected_value", resolution.selected_value.clone().unwrap_or(Value::Null)),
            ("ignored_keys", json!(resolution.ignored_keys)),
        ]);

        match resolution.outcome {
            Resolution::Resolved(car) => {
                meta.insert("car".to_string(), json!(car));
                ToolResult::success("Car retrieved.", meta)
            }
            Resolution::NotFound => {
                ToolResult::error_with_data(ErrorCode::NotFound, "No matching car found.", meta)
            }
            Resolution::Ambiguous(candidates) => {
                meta.insert("candidates".to_string(), json!(candidates));
                ToolResult::unsure(
                    ErrorCode::Ambiguous,
                    "Multiple cars match; refine with VIN or car_id.",
                    meta,
                )
            }
            Resolution::MissingInput { hint } => {
                ToolResult::error(ErrorCode::InvalidInput, hint)
            }
            Resolution::Invalid { message } => {
                ToolResult::error(ErrorCode::InvalidInput, message)
            }
        }
    }

    async fn car_add(&self, patch: Map<String, Value>) -> ToolResult {
        // Normalize the VIN; empty means "no VIN".
        let vin = patch
            .get("vin")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned);

        let mut fields: Vec<(String, Value)> = patch
            .iter()
            .filter(|(key, _)| cars::ALLOWED_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if let Some(vin) = &vin {
            for (key, value) in &mut fields {
                if key == "vin" {
                    *value = Value::from(vin.clone());
                }
            }
        }

        // A known VIN upserts the existing row instead of erroring.
        if let Some(vin) = &vin {
            let existing = match cars::find_by_vin(&self.pool, vin).await {
                Ok(rows) => rows.into_iter().next(),
                Err(e) => return ToolResult::from_storage_error(e),
            };
            if let Some(car) = existing {
                let updated = match cars::update_fields(&self.pool, car.id, &fields).await {
                    Ok(updated) => updated,
                    Err(e) => return car_mutation_failure(e, &patch),
                };
                let row = match cars::get_car(&self.pool, car.id).await {
                    Ok(row) => row,
                    Err(e) => return ToolResult::from_storage_error(e),
                };
                let message = if updated > 0 {
                    "Car upserted (existing VIN updated)."
                } else {
                    "Car upserted (existing VIN, no changes)."
                };
                return ToolResult::success(
                    message,
                    data_map([("car", json!(row)), ("updated_fields", json!(updated))]),
                );
            }
        }

        // Fresh row with the next negative sandbox id.
        let id = match cars::next_sandbox_id(&self.pool).await {
            Ok(id) => id,
            Err(e) => return ToolResult::from_storage_error(e),
        };
        match cars::insert(&self.pool, id, &fields).await {
            Ok(car) => ToolResult::success("Car added.", data_map([("car", json!(car))])),
            Err(e) => car_mutation_failure(e, &patch),
        }
    }

    async fn car_update(&self, ident: Map<String, Value>, patch: Map<String, Value>) -> ToolResult {
        let fields: Vec<(String, Value)> = patch
            .iter()
            .filter(|(key, _)| cars::ALLOWED_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if fields.is_empty() {
            return ToolResult::error_with_data(
                ErrorCode::InvalidInput,
                "No allowed fields to update.",
                data_map([("allowed_fields", json!(cars::ALLOWED_FIELDS))]),
            );
        }

        let resolution = match self.resolver().resolve_car(&ident).await {
            Ok(resolution) => resolution,
            Err(e) => return ToolResult::from_storage_error(e),
        };
        let car = match resolution.outcome {
            Resolution::Resolved(car) => car,
            Resolution::NotFound => {
                return ToolResult::error(ErrorCode::NotFound, "No matching car found.");
            }
            Resolution::Ambiguous(candidates) => {
                return ToolResult::unsure(
                    ErrorCode::Ambiguous,
                    "Multiple cars match; refine with VIN or car_id.",
                    data_map([("candidates", json!(candidates))]),
                );
            }
            Resolution::MissingInput { hint } => {
                return ToolResult::error(ErrorCode::InvalidInput, hint);
            }
            Resolution::Invalid { message } => {
                return ToolResult::error(ErrorCode::InvalidInput, message);
            }
        };

        match cars::update_fields(&self.pool, car.id, &fields).await {
            Ok(updated) => {
                let message = if updated > 0 {
                    format!("Car updated ({updated} fields).")
                } else {
                    "No fields changed.".to_string()
                };
                ToolResult::success(
                    message,
                    data_map([("car_id", json!(car.id)), ("updated_fields", json!(updated))]),
                )
            }
            Err(e) => car_mutation_failure(e, &patch),
        }
    }

    async fn get_all_cars(&self) -> ToolResult {
        match cars::list_all(&self.pool).await {
            Ok(rows) => {
                let count = rows.len();
                ToolResult::success(
                    format!("Retrieved {count} car(s)."),
                    data_map([("cars", json!(rows)), ("count", json!(count))]),
                )
            }
            Err(e) => ToolResult::from_storage_error(e),
        }
    }

    async fn get_buyer_availability(&self, buyer_id: i64) -> ToolResult {
        match schedule::buyer_exists(&self.pool, buyer_id).await {
            Ok(true) => {}
            Ok(false) => {
                return ToolResult::error(
                    ErrorCode::NotFound,
                    format!("Buyer id {buyer_id} not found."),
                );
            }
            Err(e) => return ToolResult::from_storage_error(e),
        }

        match schedule::list_for_buyer(&self.pool, buyer_id).await {
            Ok(slots) => {
                let message = if slots.is_empty() {
                    "No schedules found."
                } else {
                    "Availability retrieved."
                };
                ToolResult::success(
                    message,
                    data_map([("buyer_id", json!(buyer_id)), ("schedules", json!(slots))]),
                )
            }
            Err(e) => ToolResult::from_storage_error(e),
        }
    }

    async fn add_buyer_schedule(&self, buyer_id: i64, patch: Map<String, Value>) -> ToolResult {
        if patch.is_empty() {
            return ToolResult::error(
                ErrorCode::InvalidInput,
                "patch must be a non-empty object.",
            );
        }

        let description = patch
            .get("description")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if description.is_empty() {
            return ToolResult::error(ErrorCode::InvalidInput, "description is required.");
        }

        let priority = match patch.get("priority").and_then(Value::as_str) {
            None => Priority::Medium,
            Some(raw) => match raw.parse::<Priority>() {
                Ok(priority) => priority,
                Err(e) => return ToolResult::error(ErrorCode::InvalidInput, e.to_string()),
            },
        };

        let schedule_time = normalize_datetime(patch.get("schedule_time"));
        if schedule_time.is_empty() {
            return ToolResult::error(ErrorCode::InvalidInput, "schedule_time is invalid.");
        }

        match schedule::buyer_exists(&self.pool, buyer_id).await {
            Ok(true) => {}
            Ok(false) => {
                return ToolResult::error(
                    ErrorCode::NotFound,
                    format!("Buyer id {buyer_id} not found."),
                );
            }
            Err(e) => return ToolResult::from_storage_error(e),
        }

        // Exact-time collision check before the insert.
        match schedule::find_at_time(&self.pool, buyer_id, &schedule_time).await {
            Ok(Some(existing)) => {
                return ToolResult::error_with_data(
                    ErrorCode::TimeAlreadyBooked,
                    format!(
                        "The buyer is already booked at {schedule_time}. Please choose another time."
                    ),
                    data_map([
                        ("existing_schedule", json!(existing)),
                        ("requested_time", json!(schedule_time)),
                    ]),
                );
            }
            Ok(None) => {}
            Err(e) => return ToolResult::from_storage_error(e),
        }

        match schedule::insert_slot(
            &self.pool,
            buyer_id,
            description,
            &schedule_time,
            &priority.to_string(),
        )
        .await
        {
            Ok(slot) => {
                ToolResult::success("Schedule added.", data_map([("schedule", json!(slot))]))
            }
            Err(StorageError::Integrity(_)) => ToolResult::error_with_data(
                ErrorCode::PreconditionFailed,
                "Invalid reference (foreign key).",
                data_map([("buyer_id", json!(buyer_id))]),
            ),
            Err(e) => ToolResult::from_storage_error(e),
        }
    }

    async fn pickup_retrieve(&self, ident: Map<String, Value>) -> ToolResult {
        let resolution = match self.resolver().resolve_pickup(&ident).await {
            Ok(resolution) => resolution,
            Err(e) => return ToolResult::from_storage_error(e),
        };

        match resolution.outcome {
            Resolution::Resolved(pickup) => {
                ToolResult::success("Pickup retrieved.", data_map([("pickup", json!(pickup))]))
            }
            other => pickup_resolution_failure(other, resolution.stage),
        }
    }

    async fn pickup_add(&self, patch: Map<String, Value>) -> ToolResult {
        // FK precheck so a missing car is a clear precondition failure
        // rather than a raw constraint error.
        let car_id = match patch.get("car_id") {
            None | Some(Value::Null) => None,
            Some(value) => match coerce_integer(value) {
                Some(id) => Some(id),
                None => {
                    return ToolResult::error(
                        ErrorCode::InvalidInput,
                        "car_id must be an integer.",
                    );
                }
            },
        };
        if let Some(car_id) = car_id {
            match cars::exists(&self.pool, car_id).await {
                Ok(true) => {}
                Ok(false) => {
                    return ToolResult::error_with_data(
                        ErrorCode::PreconditionFailed,
                        "Invalid car_id (no such car).",
                        data_map([("car_id", json!(car_id))]),
                    );
                }
                Err(e) => return ToolResult::from_storage_error(e),
            }
        }

        let fields: Vec<(String, Value)> = patch
            .iter()
            .filter(|(key, _)| pickups::ALLOWED_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let id = match pickups::next_sandbox_id(&self.pool).await {
            Ok(id) => id,
            Err(e) => return ToolResult::from_storage_error(e),
        };
        match pickups::insert(&self.pool, id, car_id, &fields).await {
            Ok(pickup) => {
                ToolResult::success("Pickup added.", data_map([("pickup", json!(pickup))]))
            }
            Err(StorageError::Integrity(_)) => ToolResult::error_with_data(
                ErrorCode::PreconditionFailed,
                "Invalid reference (foreign key).",
                data_map([("car_id", json!(car_id))]),
            ),
            Err(e) => ToolResult::from_storage_error(e),
        }
    }

    async fn pickup_update(&self, ident: Map<String, Value>, patch: Map<String, Value>) -> ToolResult {
        let fields: Vec<(String, Value)> = patch
            .iter()
            .filter(|(key, _)| pickups::ALLOWED_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if fields.is_empty() {
            return ToolResult::error_with_data(
                ErrorCode::InvalidInput,
                "No allowed fields to update.",
                data_map([("allowed_fields", json!(pickups::ALLOWED_FIELDS))]),
            );
        }

        let resolution = match self.resolver().resolve_pickup(&ident).await {
            Ok(resolution) => resolution,
            Err(e) => return ToolResult::from_storage_error(e),
        };
        let pickup = match resolution.outcome {
            Resolution::Resolved(pickup) => pickup,
            other => return pickup_resolution_failure(other, resolution.stage),
        };

        match pickups::update_fields(&self.pool, pickup.pick_up_id, &fields).await {
            Ok(updated) => {
                let message = if updated > 0 {
                    format!("Pickup updated ({updated} fields).")
                } else {
                    "No fields changed.".to_string()
                };
                ToolResult::success(
                    message,
                    data_map([
                        ("pick_up_id", json!(pickup.pick_up_id)),
                        ("updated_fields", json!(updated)),
                    ]),
                )
            }
            Err(StorageError::Integrity(_)) => ToolResult::error_with_data(
                ErrorCode::PreconditionFailed,
                "Invalid reference (foreign key).",
                data_map([("car_id", patch.get("car_id").cloned().unwrap_or(Value::Null))]),
            ),
            Err(e) => ToolResult::from_storage_error(e),
        }
    }

    async fn get_all_pickups(&self) -> ToolResult {
        match pickups::list_all(&self.pool).await {
            Ok(rows) => {
                let count = rows.len();
                ToolResult::success(
                    format!("Retrieved {count} pickup(s)."),
                    data_map([("pickups", json!(rows)), ("count", json!(count))]),
                )
            }
            Err(e) => ToolResult::from_storage_error(e),
        }
    }

    async fn get_closest(&self, user_address: &str, state: &str) -> ToolResult {
        if user_address.trim().is_empty() {
            return ToolResult::error(ErrorCode::InvalidInput, "user_address is required.");
        }

        match distance::closest_dropoff(
            &self.pool,
            self.distance.as_ref(),
            user_address,
            state,
            MAX_MILES_DEFAULT,
        )
        .await
        {
            Ok(Some(best)) => ToolResult::success(
                "Closest drop-off found.",
                serde_json::to_value(&best)
                    .ok()
                    .and_then(|v| v.as_object().cloned())
                    .unwrap_or_default(),
            ),
            Ok(None) => ToolResult::plain_error("No nearby locations found."),
            Err(e) => ToolResult::from_storage_error(e),
        }
    }

    async fn send_escalation(&self, to: &str, message_text: &str) -> ToolResult {
        match self.notifier.send(to, message_text).await {
            Ok(()) => {
                ToolResult::success("Escalation SMS sent.", serde_json::Map::new())
            }
            Err(e) => {
                warn!(error = %e, "escalation send failed");
                ToolResult::plain_error(format!("Failed to send: {e}"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Shared failure mapping
// ---------------------------------------------------------------------------

/// Map a car mutation failure, giving the duplicate-VIN case its own
/// message.
fn car_mutation_failure(err: StorageError, patch: &Map<String, Value>) -> ToolResult {
    if err.conflicts_on("vin") {
        return ToolResult::error_with_data(
            ErrorCode::Conflict,
            "VIN already exists.",
            data_map([("vin", patch.get("vin").cloned().unwrap_or(Value::Null))]),
        );
    }
    ToolResult::from_storage_error(err)
}

/// Shared messaging for a pickup resolution that did not land on one row.
fn pickup_resolution_failure(outcome: Resolution<vinny_db::models::Pickup>, stage: ResolveStage) -> ToolResult {
    match (outcome, stage) {
        (Resolution::NotFound, ResolveStage::Car) => {
            ToolResult::error(ErrorCode::NotFound, "No matching car found.")
        }
        (Resolution::NotFound, ResolveStage::Pickup) => {
            ToolResult::error(ErrorCode::NotFound, "Pickup not found.")
        }
        (Resolution::Ambiguous(candidates), ResolveStage::Car) => ToolResult::unsure(
            ErrorCode::Ambiguous,
            "Multiple cars match; refine with VIN or car_id.",
            data_map([("candidates", json!(candidates))]),
        ),
        (Resolution::Ambiguous(candidates), ResolveStage::Pickup) => ToolResult::unsure(
            ErrorCode::Ambiguous,
            "Multiple pickups exist for that car; refine with pick_up_id.",
            data_map([("candidates", json!(candidates))]),
        ),
        (Resolution::MissingInput { hint }, _) => {
            ToolResult::error(ErrorCode::InvalidInput, hint)
        }
        (Resolution::Invalid { message }, _) => {
            ToolResult::error(ErrorCode::InvalidInput, message)
        }
        (Resolution::Resolved(_), _) => {
            unreachable!("callers handle the resolved arm before delegating here")
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamp normalization
// ---------------------------------------------------------------------------

/// Normalize a user-supplied timestamp to `YYYY-MM-DD HH:MM:SS`.
///
/// Accepts ISO-ish inputs ("2025-01-01T09:00", trailing Z, fractional
/// seconds). Anything unparseable is returned cleaned-but-verbatim so the
/// collision check still compares something stable; empty input stays
/// empty.
fn normalize_datetime(value: Option<&Value>) -> String {
    let raw = match value {
        None | Some(Value::Null) => return String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    let cleaned = raw.trim().replace('T', " ");
    let cleaned = cleaned.trim_end_matches('Z').trim().to_string();
    if cleaned.is_empty() {
        return cleaned;
    }
    let head = cleaned.split('.').next().unwrap_or(&cleaned);

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(head, format) {
            return parsed.format("%Y-%m-%d %H:%M:%S").to_string();
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return midnight.format("%Y-%m-%d %H:%M:%S").to_string();
        }
    }
    cleaned
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_datetime_iso_forms() {
        let input = json!("2025-01-01T09:00:00Z");
        assert_eq!(normalize_datetime(Some(&input)), "2025-01-01 09:00:00");

        let input = json!("2025-01-01 09:00");
        assert_eq!(normalize_datetime(Some(&input)), "2025-01-01 09:00:00");

        let input = json!("2025-01-01T09:00:00.123456");
        assert_eq!(normalize_datetime(Some(&input)), "2025-01-01 09:00:00");
    }

    #[test]
    fn normalize_datetime_date_only_gets_midnight() {
        let input = json!("2025-03-05");
        assert_eq!(normalize_datetime(Some(&input)), "2025-03-05 00:00:00");
    }

    #[test]
    fn normalize_datetime_unparseable_is_cleaned_verbatim() {
        let input = json!("next Tuesday");
        assert_eq!(normalize_datetime(Some(&input)), "next Tuesday");
    }

    #[test]
    fn normalize_datetime_absent_is_empty() {
        assert_eq!(normalize_datetime(None), "");
        assert_eq!(normalize_datetime(Some(&Value::Null)), "");
        assert_eq!(normalize_datetime(Some(&json!("  "))), "");
    }
}
