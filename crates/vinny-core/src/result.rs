//! The result value every backend operation produces.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use vinny_db::StorageError;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Outcome class of a tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
    /// The operation could not pick a single record (ambiguity).
    Unsure,
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Unsure => "unsure",
        };
        f.write_str(s)
    }
}

/// Failure kind carried by an unsuccessful [`ToolResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    Ambiguous,
    Forbidden,
    PreconditionFailed,
    Conflict,
    TimeAlreadyBooked,
    TxnFailed,
    DbUnavailable,
    PlannerFail,
    PlanInvalid,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::NotFound => "NOT_FOUND",
            Self::Ambiguous => "AMBIGUOUS",
            Self::Forbidden => "FORBIDDEN",
            Self::PreconditionFailed => "PRECONDITION_FAILED",
            Self::Conflict => "CONFLICT",
            Self::TimeAlreadyBooked => "TIME_ALREADY_BOOKED",
            Self::TxnFailed => "TXN_FAILED",
            Self::DbUnavailable => "DB_UNAVAILABLE",
            Self::PlannerFail => "PLANNER_FAIL",
            Self::PlanInvalid => "PLAN_INVALID",
        };
        f.write_str(s)
    }
}

impl FromStr for ErrorCode {
    type Err = ErrorCodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INVALID_INPUT" => Ok(Self::InvalidInput),
            "NOT_FOUND" => Ok(Self::NotFound),
            "AMBIGUOUS" => Ok(Self::Ambiguous),
            "FORBIDDEN" => Ok(Self::Forbidden),
            "PRECONDITION_FAILED" => Ok(Self::PreconditionFailed),
            "CONFLICT" => Ok(Self::Conflict),
            "TIME_ALREADY_BOOKED" => Ok(Self::TimeAlreadyBooked),
            "TXN_FAILED" => Ok(Self::TxnFailed),
            "DB_UNAVAILABLE" => Ok(Self::DbUnavailable),
            "PLANNER_FAIL" => Ok(Self::PlannerFail),
            "PLAN_INVALID" => Ok(Self::PlanInvalid),
            other => Err(ErrorCodeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ErrorCode`] string.
#[derive(Debug, Clone)]
pub struct ErrorCodeParseError(pub String);

impl fmt::Display for ErrorCodeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {:?}", self.0)
    }
}

impl std::error::Error for ErrorCodeParseError {}

// ---------------------------------------------------------------------------
// ToolResult
// ---------------------------------------------------------------------------

/// Immutable outcome of one backend operation, consumed once by the turn
/// controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ToolResult {
    pub fn success(message: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            status: ToolStatus::Success,
            code: None,
            message: message.into(),
            data,
        }
    }

    /// An error with no taxonomy code, for failures the caller only ever
    /// relays verbatim (e.g. an unknown tool name or a gateway hiccup).
    pub fn plain_error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            code: None,
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            code: Some(code),
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn error_with_data(
        code: ErrorCode,
        message: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            status: ToolStatus::Error,
            code: Some(code),
            message: message.into(),
            data,
        }
    }

    pub fn unsure(code: ErrorCode, message: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            status: ToolStatus::Unsure,
            code: Some(code),
            message: message.into(),
            data,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }

    /// Map a classified storage failure onto the result taxonomy.
    pub fn from_storage_error(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable(msg) => Self::error(
                ErrorCode::DbUnavailable,
                format!("Could not open database: {msg}"),
            ),
            StorageError::Conflict { message, .. } => {
                Self::error(ErrorCode::Conflict, format!("Uniqueness violation: {message}"))
            }
            StorageError::Integrity(msg) => Self::error(
                ErrorCode::PreconditionFailed,
                format!("Invalid reference: {msg}"),
            ),
            StorageError::Txn(msg) => {
                Self::error(ErrorCode::TxnFailed, format!("Operation failed: {msg}"))
            }
        }
    }
}

/// Build a `serde_json::Map` from `(key, value)` pairs; the JSON shape used
/// for `ToolResult::data` throughout the tool layer.
pub fn data_map<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_roundtrip() {
        for code in [
            ErrorCode::InvalidInput,
            ErrorCode::NotFound,
            ErrorCode::Ambiguous,
            ErrorCode::Forbidden,
            ErrorCode::PreconditionFailed,
            ErrorCode::Conflict,
            ErrorCode::TimeAlreadyBooked,
            ErrorCode::TxnFailed,
            ErrorCode::DbUnavailable,
            ErrorCode::PlannerFail,
            ErrorCode::PlanInvalid,
        ] {
            assert_eq!(code.to_string().parse::<ErrorCode>().unwrap(), code);
        }
    }

    #[test]
    fn serializes_in_wire_shape() {
        let result = ToolResult::error(ErrorCode::NotFound, "No matching car found.");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["message"], "No matching car found.");
    }

    #[test]
    fn success_omits_code() {
        let result = ToolResult::success("Car retrieved.", Map::new());
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("code").is_none());
    }

    #[test]
    fn storage_conflict_maps_to_conflict() {
        let err = StorageError::Conflict {
            constraint: "cars_vin_key".to_string(),
            message: "duplicate key".to_string(),
        };
        let result = ToolResult::from_storage_error(err);
        assert_eq!(result.code, Some(ErrorCode::Conflict));
    }
}
