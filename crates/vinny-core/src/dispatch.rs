//! Dispatch policy: one validated tool plan becomes exactly one executor
//! call.
//!
//! This layer owns everything the model must not control: session-owned
//! field injection, the business-restricted-field short circuit, and patch
//! hygiene (identifier fields used for resolution and null values never
//! reach a mutation as attributes). Operation bodies live behind
//! [`ToolExecutor`].

use serde_json::{Map, Value};
use tracing::debug;

use crate::plan::RESTRICTED_FIELD;
use crate::result::{ErrorCode, ToolResult};
use crate::session::SessionContext;
use crate::tools::{ToolExecutor, ToolName};

/// Identifier fields a car mutation may use for resolution.
const CAR_IDENT_KEYS: &[&str] = &["car_id", "vin", "model", "make", "year"];
/// Identifier fields a pickup mutation may use for resolution.
const PICKUP_IDENT_KEYS: &[&str] = &["pick_up_id", "car_id", "vin", "model", "make", "year"];

/// User-facing message when a plan tries to set the company's offer.
const FORBIDDEN_OFFER_MSG: &str =
    "The company's offer (buyer_offer_cents) can only be set by dealership staff.";

/// Route a validated tool plan to its operation.
///
/// `name` is re-checked here even though validation already enforced the
/// closed set; an unknown name returns a generic error instead of failing
/// hard.
pub async fn dispatch_tool(
    name: &str,
    args: &Map<String, Value>,
    ctx: &SessionContext,
    executor: &dyn ToolExecutor,
) -> ToolResult {
    let Ok(tool) = name.parse::<ToolName>() else {
        return ToolResult::plain_error(format!("Unknown tool '{name}'."));
    };

    let args_value = Value::Object(args.clone());
    debug!(tool = %tool, args = %args_value, "dispatching tool");

    match tool {
        ToolName::CarRetrieve => executor.car_retrieve(args).await,

        ToolName::CarAdd => {
            if args.contains_key(RESTRICTED_FIELD) {
                return ToolResult::error(ErrorCode::Forbidden, FORBIDDEN_OFFER_MSG);
            }
            let mut patch = drop_nulls(args);
            patch
                .entry("lead_id".to_string())
                .or_insert_with(|| Value::from(ctx.lead_id));
            executor.car_add(patch).await
        }

        ToolName::CarUpdate => {
            if args.contains_key(RESTRICTED_FIELD) {
                return ToolResult::error(ErrorCode::Forbidden, FORBIDDEN_OFFER_MSG);
            }
            let (ident, patch) = split_ident(args, CAR_IDENT_KEYS, "car_id");
            executor.car_update(ident, patch).await
        }

        ToolName::GetAllCars => executor.get_all_cars().await,

        ToolName::GetBuyerAvailability => executor.get_buyer_availability(ctx.buyer_id).await,

        ToolName::AddBuyerSchedule => {
            executor
                .add_buyer_schedule(ctx.buyer_id, drop_nulls(args))
                .await
        }

        ToolName::PickupRetrieve => {
            executor.pickup_retrieve(keep_keys(args, PICKUP_IDENT_KEYS)).await
        }

        ToolName::PickupAdd => executor.pickup_add(drop_nulls(args)).await,

        ToolName::PickupUpdate => {
            let (ident, patch) = split_ident(args, PICKUP_IDENT_KEYS, "pick_up_id");
            executor.pickup_update(ident, patch).await
        }

        ToolName::GetAllPickups => executor.get_all_pickups().await,

        ToolName::GetClosest => {
            let address = str_arg(args, "user_address");
            let state = str_arg(args, "state");
            executor.get_closest(&address, &state).await
        }

        ToolName::SendEscalateMessage => {
            let text = str_arg(args, "message_text");
            executor.send_escalation(&ctx.escalation_phone, &text).await
        }
    }
}

// ---------------------------------------------------------------------------
// Argument hygiene
// ---------------------------------------------------------------------------

/// Split args into the identifier map handed to resolution and the mutable
/// patch.
///
/// When the direct id is present, only the id itself leaves the patch (the
/// descriptor fields stay mutable attributes). Without a direct id, every
/// identifier candidate is resolution input and none of them may double as
/// an attribute. Null values are dropped from the patch either way.
fn split_ident(
    args: &Map<String, Value>,
    ident_keys: &[&str],
    direct_key: &str,
) -> (Map<String, Value>, Map<String, Value>) {
    let has_direct = matches!(args.get(direct_key), Some(v) if !v.is_null());
    let stripped: &[&str] = if has_direct {
        std::slice::from_ref(&direct_key)
    } else {
        ident_keys
    };

    let ident = keep_keys(args, ident_keys);
    let patch = args
        .iter()
        .filter(|(key, value)| !value.is_null() && !stripped.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    (ident, patch)
}

fn keep_keys(args: &Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    args.iter()
        .filter(|(key, value)| keys.contains(&key.as_str()) && !value.is_null())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn drop_nulls(args: &Map<String, Value>) -> Map<String, Value> {
    args.iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn str_arg(args: &Map<String, Value>, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn direct_id_keeps_descriptors_mutable() {
        let (ident, patch) = split_ident(
            &args(json!({"car_id": 7, "vin": "NEWVIN", "mileage": 1000, "trim": null})),
            CAR_IDENT_KEYS,
            "car_id",
        );
        assert_eq!(ident.get("car_id"), Some(&json!(7)));
        // vin is an attribute here, not a resolution key.
        assert_eq!(patch.get("vin"), Some(&json!("NEWVIN")));
        assert_eq!(patch.get("mileage"), Some(&json!(1000)));
        assert!(!patch.contains_key("car_id"));
        assert!(!patch.contains_key("trim"), "nulls are dropped");
    }

    #[test]
    fn descriptor_resolution_strips_the_whole_chain() {
        let (ident, patch) = split_ident(
            &args(json!({"vin": "1HGCM82633A004352", "mileage": 50000})),
            CAR_IDENT_KEYS,
            "car_id",
        );
        assert_eq!(ident.get("vin"), Some(&json!("1HGCM82633A004352")));
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get("mileage"), Some(&json!(50000)));
    }

    #[test]
    fn pickup_split_keeps_car_id_mutable_with_direct_id() {
        let (ident, patch) = split_ident(
            &args(json!({"pick_up_id": 2, "car_id": 7, "address": "1 Elm St"})),
            PICKUP_IDENT_KEYS,
            "pick_up_id",
        );
        assert_eq!(ident.get("pick_up_id"), Some(&json!(2)));
        assert_eq!(patch.get("car_id"), Some(&json!(7)));
        assert!(!patch.contains_key("pick_up_id"));
    }
}
