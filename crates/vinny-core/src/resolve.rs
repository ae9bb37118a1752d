//! Entity resolution: partial identifiers become exactly one canonical
//! record id, or the operation does not run.
//!
//! One algorithm serves both resolvable families. Cars resolve through a
//! priority-ordered identifier chain; pickups resolve directly by id or
//! indirectly through their car, with the same zero/one/many policy applied
//! at each level. Resolution never guesses among multiple matches.

use serde_json::{Map, Value};
use sqlx::PgPool;

use vinny_db::models::{Car, Pickup};
use vinny_db::queries::{cars, pickups};
use vinny_db::{DbResult, StorageError};

/// Identifier fields for a car, highest priority first.
pub const CAR_IDENTIFIERS: &[&str] = &["car_id", "vin", "model", "make", "year"];
/// The direct identifier for a pickup; anything else goes through the car.
pub const PICKUP_IDENTIFIER: &str = "pick_up_id";

/// Upper bound on the candidate preview returned with an ambiguous match.
pub const CANDIDATE_PREVIEW: usize = 5;

/// Terminal outcome of a resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    /// Exactly one record matched.
    Resolved(T),
    /// No record matched.
    NotFound,
    /// More than one record matched; dispatch must stop and report the
    /// candidates instead of choosing.
    Ambiguous(Vec<Value>),
    /// No identifying field was supplied.
    MissingInput { hint: String },
    /// An identifying field was supplied but unusable (e.g. non-integer id).
    Invalid { message: String },
}

/// Which level of the pickup chain produced the terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStage {
    Car,
    Pickup,
}

/// A car resolution plus the bookkeeping the caller reports back.
#[derive(Debug, Clone)]
pub struct CarResolution {
    pub outcome: Resolution<Car>,
    pub selected_key: Option<&'static str>,
    pub selected_value: Option<Value>,
    pub ignored_keys: Vec<&'static str>,
}

/// A pickup resolution; `stage` tells the caller whether the car or the
/// pickup level terminated the search.
#[derive(Debug, Clone)]
pub struct PickupResolution {
    pub outcome: Resolution<Pickup>,
    pub stage: ResolveStage,
    pub resolved_car_id: Option<i64>,
}

/// Resolver over the shared pool. Stateless; construct freely.
pub struct Resolver<'a> {
    pool: &'a PgPool,
}

impl<'a> Resolver<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Resolve a car from whatever identifying fields `args` carries.
    ///
    /// Only the single highest-priority supplied field is used for the
    /// lookup; lower-priority fields are recorded as ignored, never
    /// combined into a compound filter.
    pub async fn resolve_car(&self, args: &Map<String, Value>) -> DbResult<CarResolution> {
        let Some((key, value, ignored)) = pick_identifier(args, CAR_IDENTIFIERS) else {
            return Ok(CarResolution {
                outcome: Resolution::MissingInput {
                    hint: "Provide car_id, vin, model, make, or year.".to_string(),
                },
                selected_key: None,
                selected_value: None,
                ignored_keys: Vec::new(),
            });
        };

        let mut resolution = CarResolution {
            outcome: Resolution::NotFound,
            selected_key: Some(key),
            selected_value: Some(value.clone()),
            ignored_keys: ignored,
        };

        let matches: Vec<Car> = match key {
            "car_id" => {
                let Some(id) = integer_of(value) else {
                    resolution.outcome = Resolution::Invalid {
                        message: "car_id must be an integer.".to_string(),
                    };
                    return Ok(resolution);
                };
                cars::get_car(self.pool, id).await?.into_iter().collect()
            }
            "vin" => cars::find_by_vin(self.pool, &text_of(value)).await?,
            "model" => cars::find_by_model(self.pool, &text_of(value)).await?,
            "make" => cars::find_by_make(self.pool, &text_of(value)).await?,
            "year" => {
                let Some(year) = integer_of(value) else {
                    resolution.outcome = Resolution::Invalid {
                        message: "year must be an integer.".to_string(),
                    };
                    return Ok(resolution);
                };
                cars::find_by_year(self.pool, year as i32).await?
            }
            _ => unreachable!("identifier keys are fixed above"),
        };

        resolution.outcome = settle(matches, Car::summary);
        Ok(resolution)
    }

    /// Resolve a pickup: directly by `pick_up_id`, or through its car with
    /// a second cardinality check over the pickups keyed by that car.
    pub async fn resolve_pickup(
        &self,
        args: &Map<String, Value>,
    ) -> Result<PickupResolution, StorageError> {
        if let Some(raw) = non_empty(args.get(PICKUP_IDENTIFIER)) {
            let Some(id) = integer_of(raw) else {
                return Ok(PickupResolution {
                    outcome: Resolution::Invalid {
                        message: "pick_up_id must be an integer.".to_string(),
                    },
                    stage: ResolveStage::Pickup,
                    resolved_car_id: None,
                });
            };
            let outcome = match pickups::get_pickup(self.pool, id).await? {
                Some(pickup) => Resolution::Resolved(pickup),
                None => Resolution::NotFound,
            };
            return Ok(PickupResolution {
                outcome,
                stage: ResolveStage::Pickup,
                resolved_car_id: None,
            });
        }

        // Indirect addressing: find the car first.
        let car = self.resolve_car(args).await?;
        let car = match car.outcome {
            Resolution::Resolved(car) => car,
            Resolution::NotFound => {
                return Ok(PickupResolution {
                    outcome: Resolution::NotFound,
                    stage: ResolveStage::Car,
                    resolved_car_id: None,
                });
            }
            Resolution::Ambiguous(candidates) => {
                return Ok(PickupResolution {
                    outcome: Resolution::Ambiguous(candidates),
                    stage: ResolveStage::Car,
                    resolved_car_id: None,
                });
            }
            Resolution::MissingInput { .. } => {
                return Ok(PickupResolution {
                    outcome: Resolution::MissingInput {
                        hint: "Provide pick_up_id, or identify the car \
                               (car_id, vin, model, make, or year)."
                            .to_string(),
                    },
                    stage: ResolveStage::Car,
                    resolved_car_id: None,
                });
            }
            Resolution::Invalid { message } => {
                return Ok(PickupResolution {
                    outcome: Resolution::Invalid { message },
                    stage: ResolveStage::Car,
                    resolved_car_id: None,
                });
            }
        };

        let matches = pickups::list_for_car(self.pool, car.id).await?;
        Ok(PickupResolution {
            outcome: settle(matches, Pickup::summary),
            stage: ResolveStage::Pickup,
            resolved_car_id: Some(car.id),
        })
    }
}

// ---------------------------------------------------------------------------
// Shared pieces
// ---------------------------------------------------------------------------

/// Pick the highest-priority identifier present and non-empty in `args`.
/// Returns `(selected_key, value, ignored_lower_priority_keys)`.
fn pick_identifier<'m>(
    args: &'m Map<String, Value>,
    priority: &'static [&'static str],
) -> Option<(&'static str, &'m Value, Vec<&'static str>)> {
    let provided: Vec<&'static str> = priority
        .iter()
        .copied()
        .filter(|key| non_empty(args.get(*key)).is_some())
        .collect();

    let (&selected, rest) = provided.split_first()?;
    Some((selected, &args[selected], rest.to_vec()))
}

/// The uniform zero/one/many policy. More than one match returns up to
/// [`CANDIDATE_PREVIEW`] summaries and never picks silently.
fn settle<T>(mut matches: Vec<T>, summarize: impl Fn(&T) -> Value) -> Resolution<T> {
    match matches.len() {
        0 => Resolution::NotFound,
        1 => Resolution::Resolved(matches.remove(0)),
        _ => Resolution::Ambiguous(
            matches
                .iter()
                .take(CANDIDATE_PREVIEW)
                .map(summarize)
                .collect(),
        ),
    }
}

/// Present and not an empty/whitespace string, not null.
fn non_empty(value: Option<&Value>) -> Option<&Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(v) => Some(v),
    }
}

fn integer_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
