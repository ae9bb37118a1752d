//! The closed set of backend operations and the executor seam.
//!
//! [`ToolName`] is the fixed allowed-operation set: any plan naming
//! anything else fails validation and is never dispatched. [`ToolExecutor`]
//! is the object-safe boundary between dispatch policy and the operation
//! bodies, so tests can substitute a counting double.

mod db_exec;

pub use db_exec::DbExecutor;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::result::ToolResult;

// ---------------------------------------------------------------------------
// Tool names
// ---------------------------------------------------------------------------

/// One entry in the tool catalog shown to the planner.
pub struct ToolSpec {
    pub name: ToolName,
    pub args: &'static [&'static str],
    pub description: &'static str,
}

/// The fixed, closed set of operations the planner may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    CarRetrieve,
    CarAdd,
    CarUpdate,
    GetAllCars,
    GetBuyerAvailability,
    AddBuyerSchedule,
    PickupRetrieve,
    PickupAdd,
    PickupUpdate,
    GetAllPickups,
    GetClosest,
    SendEscalateMessage,
}

impl ToolName {
    pub const ALL: &[ToolName] = &[
        Self::CarRetrieve,
        Self::CarAdd,
        Self::CarUpdate,
        Self::GetAllCars,
        Self::GetBuyerAvailability,
        Self::AddBuyerSchedule,
        Self::PickupRetrieve,
        Self::PickupAdd,
        Self::PickupUpdate,
        Self::GetAllPickups,
        Self::GetClosest,
        Self::SendEscalateMessage,
    ];

    pub fn is_allowed(name: &str) -> bool {
        name.parse::<ToolName>().is_ok()
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CarRetrieve => "car_retrieve",
            Self::CarAdd => "car_add",
            Self::CarUpdate => "car_update",
            Self::GetAllCars => "get_all_cars",
            Self::GetBuyerAvailability => "get_buyer_availability",
            Self::AddBuyerSchedule => "add_buyer_schedule",
            Self::PickupRetrieve => "pickup_retrieve",
            Self::PickupAdd => "pickup_add",
            Self::PickupUpdate => "pickup_update",
            Self::GetAllPickups => "get_all_pickups",
            Self::GetClosest => "get_closest",
            Self::SendEscalateMessage => "send_escalate_message",
        };
        f.write_str(s)
    }
}

impl FromStr for ToolName {
    type Err = ToolNameParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "car_retrieve" => Ok(Self::CarRetrieve),
            "car_add" => Ok(Self::CarAdd),
            "car_update" => Ok(Self::CarUpdate),
            "get_all_cars" => Ok(Self::GetAllCars),
            "get_buyer_availability" => Ok(Self::GetBuyerAvailability),
            "add_buyer_schedule" => Ok(Self::AddBuyerSchedule),
            "pickup_retrieve" => Ok(Self::PickupRetrieve),
            "pickup_add" => Ok(Self::PickupAdd),
            "pickup_update" => Ok(Self::PickupUpdate),
            "get_all_pickups" => Ok(Self::GetAllPickups),
            "get_closest" => Ok(Self::GetClosest),
            "send_escalate_message" => Ok(Self::SendEscalateMessage),
            other => Err(ToolNameParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing a name outside the allowed set.
#[derive(Debug, Clone)]
pub struct ToolNameParseError(pub String);

impl fmt::Display for ToolNameParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tool {:?}", self.0)
    }
}

impl std::error::Error for ToolNameParseError {}

/// Catalog entries rendered into the planner prompt.
pub const TOOL_CATALOG: &[ToolSpec] = &[
    ToolSpec {
        name: ToolName::CarRetrieve,
        args: &["car_id", "vin", "model", "make", "year"],
        description: "Get car details. Provide any of: car_id, vin, model, make, year.",
    },
    ToolSpec {
        name: ToolName::CarAdd,
        args: &[
            "vin",
            "year",
            "make",
            "model",
            "trim",
            "mileage",
            "interior_condition",
            "exterior_condition",
            "seller_ask_cents",
            "created_at",
        ],
        description: "Create a new car listing (upserts by VIN if present). You can set \
                      seller_ask_cents (what the customer wants to sell for) but NOT \
                      buyer_offer_cents (the company's offer; only staff set that).",
    },
    ToolSpec {
        name: ToolName::CarUpdate,
        args: &[
            "car_id",
            "vin",
            "year",
            "make",
            "model",
            "trim",
            "mileage",
            "interior_condition",
            "exterior_condition",
            "seller_ask_cents",
            "created_at",
        ],
        description: "Update a car; identify it by car_id or vin/model/make/year and supply \
                      only fields you want to change. buyer_offer_cents cannot be set here.",
    },
    ToolSpec {
        name: ToolName::GetAllCars,
        args: &[],
        description: "Retrieve all cars with all their details.",
    },
    ToolSpec {
        name: ToolName::GetBuyerAvailability,
        args: &[],
        description: "Return all schedule rows for the buyer, ordered by schedule_time.",
    },
    ToolSpec {
        name: ToolName::AddBuyerSchedule,
        args: &["description", "schedule_time", "priority"],
        description: "Schedule a meeting or appointment for the buyer. Requires description \
                      and schedule_time; duplicate times are rejected.",
    },
    ToolSpec {
        name: ToolName::PickupRetrieve,
        args: &["pick_up_id", "car_id", "vin", "model", "make", "year"],
        description: "Get details of an existing pickup, by pick_up_id or through its car.",
    },
    ToolSpec {
        name: ToolName::PickupAdd,
        args: &[
            "car_id",
            "address",
            "contact_phone",
            "pick_up_info",
            "created_at",
            "dropoff_time",
        ],
        description: "Create a new pickup request.",
    },
    ToolSpec {
        name: ToolName::PickupUpdate,
        args: &[
            "pick_up_id",
            "car_id",
            "address",
            "contact_phone",
            "pick_up_info",
            "created_at",
            "dropoff_time",
        ],
        description: "Update a pickup; identify it by pick_up_id or through its car, and \
                      supply only fields you want to change.",
    },
    ToolSpec {
        name: ToolName::GetAllPickups,
        args: &[],
        description: "Retrieve all pickups with all their details.",
    },
    ToolSpec {
        name: ToolName::GetClosest,
        args: &["user_address", "state"],
        description: "Find the nearest drop-off to the user-provided address (state = 2-letter).",
    },
    ToolSpec {
        name: ToolName::SendEscalateMessage,
        args: &["message_text"],
        description: "Urgent internal SMS to the escalation phone number. Use when a user is \
                      frustrated, angry, or needs immediate human intervention.",
    },
];

// ---------------------------------------------------------------------------
// Executor seam
// ---------------------------------------------------------------------------

/// Operation bodies behind the dispatch policy layer.
///
/// Object-safe so tests can pass a counting double and assert that a
/// forbidden plan never reaches storage.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn car_retrieve(&self, query: &Map<String, Value>) -> ToolResult;
    async fn car_add(&self, patch: Map<String, Value>) -> ToolResult;
    /// `ident` carries the identifier fields used for resolution; `patch`
    /// carries only mutable attributes (identifier and null fields already
    /// stripped by dispatch).
    async fn car_update(&self, ident: Map<String, Value>, patch: Map<String, Value>)
    -> ToolResult;
    async fn get_all_cars(&self) -> ToolResult;
    async fn get_buyer_availability(&self, buyer_id: i64) -> ToolResult;
    async fn add_buyer_schedule(&self, buyer_id: i64, patch: Map<String, Value>) -> ToolResult;
    async fn pickup_retrieve(&self, ident: Map<String, Value>) -> ToolResult;
    async fn pickup_add(&self, patch: Map<String, Value>) -> ToolResult;
    async fn pickup_update(
        &self,
        ident: Map<String, Value>,
        patch: Map<String, Value>,
    ) -> ToolResult;
    async fn get_all_pickups(&self) -> ToolResult;
    async fn get_closest(&self, user_address: &str, state: &str) -> ToolResult;
    async fn send_escalation(&self, to: &str, message_text: &str) -> ToolResult;
}

// Compile-time assertion: ToolExecutor must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn ToolExecutor) {}
};
