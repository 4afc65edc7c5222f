use serde::Serialize;
use serde_json::Value;

use crate::tours::repo_types::{DifficultyStats, MonthlyStarts, Tour};

/// A tour as clients see it, with the derived `durationWeeks`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TourView {
    #[serde(flatten)]
    pub tour: Tour,
    pub duration_weeks: f64,
}

impl From<Tour> for TourView {
    fn from(tour: Tour) -> Self {
        let duration_weeks = tour.duration_weeks();
        Self {
            tour,
            duration_weeks,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TourEnvelope {
    pub tour: TourView,
}

impl From<Tour> for TourEnvelope {
    fn from(tour: Tour) -> Self {
        Self { tour: tour.into() }
    }
}

/// Listings are field-projected, so each entry is plain JSON.
#[derive(Debug, Serialize)]
pub struct ToursEnvelope {
    pub tours: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct StatsEnvelope {
    pub stats: Vec<DifficultyStats>,
}

#[derive(Debug, Serialize)]
pub struct PlanEnvelope {
    pub plan: Vec<MonthlyStarts>,
}
