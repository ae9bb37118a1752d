use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Priority of a buyer schedule slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = PriorityParseError;

    /// Accepts any casing ("low", "LOW", "Low").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(PriorityParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Priority`] string.
#[derive(Debug, Clone)]
pub struct PriorityParseError(pub String);

impl fmt::Display for PriorityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "priority must be one of Low, Medium, High (got {:?})", self.0)
    }
}

impl std::error::Error for PriorityParseError {}

// ---------------------------------------------------------------------------
// Row models
// ---------------------------------------------------------------------------

/// One row of the `cars` table.
///
/// Negative `id` values mark rows created inside a conversation sandbox
/// rather than imported from production data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Car {
    pub id: i64,
    pub vin: Option<String>,
    pub year: Option<i32>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub trim: Option<String>,
    pub mileage: Option<i32>,
    pub interior_condition: Option<String>,
    pub exterior_condition: Option<String>,
    pub seller_ask_cents: Option<i64>,
    pub buyer_offer_cents: Option<i64>,
    pub created_at: Option<String>,
    pub lead_id: Option<i64>,
}

impl Car {
    /// Compact summary used in ambiguity candidate lists.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "year": self.year,
            "make": self.make,
            "model": self.model,
            "vin": self.vin,
        })
    }
}

/// One row of the `pickup` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Pickup {
    pub pick_up_id: i64,
    pub car_id: Option<i64>,
    pub address: Option<String>,
    pub contact_phone: Option<String>,
    pub pick_up_info: Option<String>,
    pub created_at: Option<String>,
    pub dropoff_time: Option<String>,
}

impl Pickup {
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "pick_up_id": self.pick_up_id,
            "car_id": self.car_id,
            "address": self.address,
            "dropoff_time": self.dropoff_time,
        })
    }
}

/// One row of the `buyer_schedule` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ScheduleSlot {
    pub id: i64,
    pub buyer_id: i64,
    pub description: String,
    pub schedule_time: String,
    pub priority: String,
}

/// One row of the `dropoff_locations` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DropoffLocation {
    pub id: i64,
    pub state: String,
    pub address: String,
}
