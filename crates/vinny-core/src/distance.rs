//! Nearest-dropoff search.
//!
//! The distance provider sits behind [`DistanceLookup`] so the search logic
//! is testable without network access. The search is layered: the lead's
//! own state first, then bordering states, then a national fallback once
//! nothing lands inside the mileage threshold.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use tracing::debug;

use vinny_db::DbResult;
use vinny_db::queries::locations;

/// Threshold below which an in-state or neighboring match is taken without
/// widening the search.
pub const MAX_MILES_DEFAULT: f64 = 100.0;

/// Candidate addresses fetched per state.
const ADDRESSES_PER_STATE: i64 = 25;

const METERS_PER_MILE: f64 = 1609.344;

/// Best driving match against a candidate set.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    pub address: String,
    pub distance_meters: f64,
    pub duration_text: String,
}

/// Which search layer produced the final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchLayer {
    InState,
    Neighbor,
    National,
}

/// The chosen dropoff, with enough context for user-facing messaging.
#[derive(Debug, Clone, Serialize)]
pub struct BestDropoff {
    pub address: String,
    pub state: String,
    pub distance_miles: f64,
    pub duration_text: String,
    pub layer: SearchLayer,
    pub neighbors_checked: Vec<String>,
    pub threshold_exceeded: bool,
}

/// Provider of best-match driving distances.
#[async_trait]
pub trait DistanceLookup: Send + Sync {
    /// Best driving match from `origin` to `candidates`, or `None` when the
    /// provider errors out or nothing is reachable.
    async fn best_match(&self, origin: &str, candidates: &[String]) -> Option<BestMatch>;
}

// Compile-time assertion: DistanceLookup must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn DistanceLookup) {}
};

/// Land borders per state. AK, HI, and PR have none.
const NEIGHBORS: &[(&str, &[&str])] = &[
    ("AL", &["TN", "GA", "FL", "MS"]),
    ("AK", &[]),
    ("AZ", &["CA", "NV", "UT", "CO", "NM"]),
    ("AR", &["MO", "TN", "MS", "LA", "TX", "OK"]),
    ("CA", &["OR", "NV", "AZ"]),
    ("CO", &["WY", "NE", "KS", "OK", "NM", "AZ", "UT"]),
    ("CT", &["NY", "MA", "RI"]),
    ("DE", &["MD", "PA", "NJ"]),
    ("FL", &["AL", "GA"]),
    ("GA", &["FL", "AL", "TN", "NC", "SC"]),
    ("HI", &[]),
    ("ID", &["WA", "MT", "WY", "UT", "NV", "OR"]),
    ("IL", &["WI", "IA", "MO", "KY", "IN"]),
    ("IN", &["MI", "OH", "KY", "IL"]),
    ("IA", &["MN", "SD", "NE", "MO", "IL", "WI"]),
    ("KS", &["NE", "MO", "OK", "CO"]),
    ("KY", &["IL", "IN", "OH", "WV", "VA", "TN", "MO"]),
    ("LA", &["TX", "AR", "MS"]),
    ("ME", &["NH"]),
    ("MD", &["VA", "WV", "PA", "DE"]),
    ("MA", &["NY", "VT", "NH", "CT", "RI"]),
    ("MI", &["OH", "IN", "WI"]),
    ("MN", &["ND", "SD", "IA", "WI"]),
    ("MS", &["TN", "AL", "LA", "AR"]),
    ("MO", &["IA", "IL", "KY", "TN", "AR", "OK", "KS", "NE"]),
    ("MT", &["ND", "SD", "WY", "ID"]),
    ("NE", &["SD", "IA", "MO", "KS", "CO", "WY"]),
    ("NV", &["OR", "ID", "UT", "AZ", "CA"]),
    ("NH", &["ME", "VT", "MA"]),
    ("NJ", &["NY", "PA", "DE"]),
    ("NM", &["AZ", "UT", "CO", "OK", "TX"]),
    ("NY", &["PA", "NJ", "CT", "MA", "VT"]),
    ("NC", &["VA", "TN", "GA", "SC"]),
    ("ND", &["MT", "SD", "MN"]),
    ("OH", &["MI", "PA", "WV", "KY", "IN"]),
    ("OK", &["CO", "KS", "MO", "AR", "TX", "NM"]),
    ("OR", &["WA", "ID", "NV", "CA"]),
    ("PA", &["NY", "NJ", "DE", "MD", "WV", "OH"]),
    ("RI", &["CT", "MA"]),
    ("SC", &["NC", "GA"]),
    ("SD", &["ND", "MT", "WY", "NE", "IA", "MN"]),
    ("TN", &["KY", "VA", "NC", "GA", "AL", "MS", "AR", "MO"]),
    ("TX", &["NM", "OK", "AR", "LA"]),
    ("UT", &["ID", "WY", "CO", "NM", "AZ", "NV"]),
    ("VT", &["NY", "NH", "MA"]),
    ("VA", &["NC", "TN", "KY", "WV", "MD"]),
    ("WA", &["OR", "ID"]),
    ("WV", &["OH", "PA", "MD", "VA", "KY"]),
    ("WI", &["MN", "IA", "IL", "MI"]),
    ("WY", &["MT", "SD", "NE", "CO", "UT", "ID"]),
    ("PR", &[]),
];

fn neighbors_of(state: &str) -> &'static [&'static str] {
    NEIGHBORS
        .iter()
        .find(|(s, _)| *s == state)
        .map(|(_, n)| *n)
        .unwrap_or(&[])
}

fn meters_to_miles(meters: f64) -> f64 {
    (meters / METERS_PER_MILE * 100.0).round() / 100.0
}

/// Best dropoff within one state, or `None` when the state has no
/// candidates or the provider finds nothing.
async fn best_in_state(
    pool: &PgPool,
    finder: &dyn DistanceLookup,
    user_address: &str,
    state: &str,
) -> DbResult<Option<BestDropoff>> {
    let candidates = locations::addresses_for_state(pool, state, ADDRESSES_PER_STATE).await?;
    if candidates.is_empty() {
        return Ok(None);
    }

    // Appending the state improves geocoding accuracy for bare street
    // addresses.
    let origin = if user_address.to_uppercase().contains(state) {
        user_address.to_string()
    } else {
        format!("{user_address}, {state}")
    };

    let Some(best) = finder.best_match(&origin, &candidates).await else {
        return Ok(None);
    };

    Ok(Some(BestDropoff {
        address: best.address,
        state: state.to_string(),
        distance_miles: meters_to_miles(best.distance_meters),
        duration_text: best.duration_text,
        layer: SearchLayer::InState,
        neighbors_checked: Vec::new(),
        threshold_exceeded: false,
    }))
}

async fn best_among(
    pool: &PgPool,
    finder: &dyn DistanceLookup,
    user_address: &str,
    states: &[String],
) -> DbResult<Option<BestDropoff>> {
    let mut overall: Option<BestDropoff> = None;
    for state in states {
        if let Some(found) = best_in_state(pool, finder, user_address, state).await? {
            let better = overall
                .as_ref()
                .map(|current| found.distance_miles < current.distance_miles)
                .unwrap_or(true);
            if better {
                overall = Some(found);
            }
        }
    }
    Ok(overall)
}

/// Layered nearest-dropoff search.
///
/// In-state and neighboring candidates are both computed; the closer of the
/// two wins if it lands within `max_miles`. Otherwise a national pass over
/// the remaining states runs and the absolute nearest of everything found
/// is returned, labeled with its layer and flagged when it exceeds the
/// threshold. `None` means no candidate anywhere matched.
pub async fn closest_dropoff(
    pool: &PgPool,
    finder: &dyn DistanceLookup,
    user_address: &str,
    state: &str,
    max_miles: f64,
) -> DbResult<Option<BestDropoff>> {
    let state = state.trim().to_uppercase();
    let available = locations::available_states(pool).await?;

    let in_state = if available.contains(&state) {
        best_in_state(pool, finder, user_address, &state).await?
    } else {
        None
    };

    let neighbors: Vec<String> = neighbors_of(&state)
        .iter()
        .filter(|s| available.contains(&s.to_string()))
        .map(|s| s.to_string())
        .collect();
    let neighbor_best = best_among(pool, finder, user_address, &neighbors)
        .await?
        .map(|mut best| {
            best.layer = SearchLayer::Neighbor;
            best
        });

    // Closest of the first two layers, when within the threshold.
    let near = [in_state.clone(), neighbor_best.clone()]
        .into_iter()
        .flatten()
        .filter(|b| b.distance_miles <= max_miles)
        .min_by(|a, b| a.distance_miles.total_cmp(&b.distance_miles));
    if let Some(mut best) = near {
        best.neighbors_checked = neighbors.clone();
        return Ok(Some(best));
    }

    debug!(state = %state, "no dropoff within threshold; widening to national search");
    let excluded: Vec<&str> = std::iter::once(state.as_str())
        .chain(neighbors.iter().map(String::as_str))
        .collect();
    let remaining: Vec<String> = available
        .iter()
        .filter(|s| !excluded.contains(&s.as_str()))
        .cloned()
        .collect();
    let national = best_among(pool, finder, user_address, &remaining)
        .await?
        .map(|mut best| {
            best.layer = SearchLayer::National;
            best
        });

    let overall = [in_state, neighbor_best, national]
        .into_iter()
        .flatten()
        .min_by(|a, b| a.distance_miles.total_cmp(&b.distance_miles));

    Ok(overall.map(|mut best| {
        best.threshold_exceeded = best.distance_miles > max_miles;
        best.neighbors_checked = neighbors;
        best
    }))
}

// ---------------------------------------------------------------------------
// HTTP provider
// ---------------------------------------------------------------------------

/// Distance-matrix provider over the mapping service's HTTP API.
pub struct MatrixClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl MatrixClient {
    pub const DEFAULT_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/distancematrix/json";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(Self::DEFAULT_ENDPOINT, api_key)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl DistanceLookup for MatrixClient {
    async fn best_match(&self, origin: &str, candidates: &[String]) -> Option<BestMatch> {
        if self.api_key.is_empty() || candidates.is_empty() {
            return None;
        }

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("origins", origin),
                ("destinations", &candidates.join("|")),
                ("mode", "driving"),
                ("key", &self.api_key),
            ])
            .send()
            .await
            .ok()?;
        let body: serde_json::Value = response.json().await.ok()?;

        if body.get("status").and_then(|s| s.as_str()) != Some("OK") {
            return None;
        }
        let elements = body.get("rows")?.get(0)?.get("elements")?.as_array()?;

        let mut best: Option<(usize, f64, String)> = None;
        for (index, element) in elements.iter().enumerate() {
            if element.get("status").and_then(|s| s.as_str()) != Some("OK") {
                continue;
            }
            let meters = element.get("distance")?.get("value")?.as_f64()?;
            let duration = element
                .get("duration")
                .and_then(|d| d.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string();
            let closer = best.as_ref().map(|(_, m, _)| meters < *m).unwrap_or(true);
            if closer {
                best = Some((index, meters, duration));
            }
        }

        let (index, meters, duration) = best?;
        Some(BestMatch {
            address: candidates.get(index)?.clone(),
            distance_meters: meters,
            duration_text: duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meters_to_miles_rounds_to_hundredths() {
        assert_eq!(meters_to_miles(1609.344), 1.0);
        assert_eq!(meters_to_miles(804.672), 0.5);
        assert_eq!(meters_to_miles(50000.0), 31.07);
    }

    #[test]
    fn neighbors_cover_known_borders() {
        assert!(neighbors_of("CA").contains(&"NV"));
        assert!(neighbors_of("AK").is_empty());
        assert!(neighbors_of("ZZ").is_empty());
    }

    #[test]
    fn every_neighbor_edge_is_symmetric() {
        for (state, neighbors) in NEIGHBORS {
            for neighbor in *neighbors {
                assert!(
                    neighbors_of(neighbor).contains(state),
                    "{state} lists {neighbor} but not vice versa"
                );
            }
        }
    }
}
