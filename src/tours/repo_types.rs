use std::{fmt, str::FromStr};

use serde::{ser::Error as _, ser::SerializeSeq, Deserialize, Serialize, Serializer};
use sqlx::FromRow;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

use crate::error::AppError;

pub const NAME_MIN_LEN: usize = 10;
pub const NAME_MAX_LEN: usize = 40;
pub const DEFAULT_RATING: f64 = 4.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Difficult,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Difficult => "difficult",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "difficult" => Ok(Difficulty::Difficult),
            other => anyhow::bail!("unknown difficulty {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub duration: i32,
    pub max_group_size: i32,
    pub difficulty: Difficulty,
    pub ratings_average: f64,
    pub ratings_quantity: i32,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    pub summary: String,
    pub description: Option<String>,
    pub image_cover: String,
    #[serde(serialize_with = "rfc3339_list")]
    pub start_dates: Vec<OffsetDateTime>,
    pub secret_tour: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Tour {
    pub fn duration_weeks(&self) -> f64 {
        f64::from(self.duration) / 7.0
    }
}

fn rfc3339_list<S: Serializer>(dates: &[OffsetDateTime], s: S) -> Result<S::Ok, S::Error> {
    let mut seq = s.serialize_seq(Some(dates.len()))?;
    for date in dates {
        let text = date.format(&Rfc3339).map_err(S::Error::custom)?;
        seq.serialize_element(&text)?;
    }
    seq.end()
}

#[derive(Debug, FromRow)]
pub struct TourRow {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub duration: i32,
    pub max_group_size: i32,
    pub difficulty: String,
    pub ratings_average: f64,
    pub ratings_quantity: i32,
    pub price: f64,
    pub price_discount: Option<f64>,
    pub summary: String,
    pub description: Option<String>,
    pub image_cover: String,
    pub start_dates: Vec<OffsetDateTime>,
    pub secret_tour: bool,
    pub created_at: OffsetDateTime,
}

impl TryFrom<TourRow> for Tour {
    type Error = anyhow::Error;

    fn try_from(r: TourRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            name: r.name,
            slug: r.slug,
            duration: r.duration,
            max_group_size: r.max_group_size,
            difficulty: r.difficulty.parse()?,
            ratings_average: r.ratings_average,
            ratings_quantity: r.ratings_quantity,
            price: r.price,
            price_discount: r.price_discount,
            summary: r.summary,
            description: r.description,
            image_cover: r.image_cover,
            start_dates: r.start_dates,
            secret_tour: r.secret_tour,
            created_at: r.created_at,
        })
    }
}

/// Per-difficulty aggregate over well-rated tours.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyStats {
    pub difficulty: Difficulty,
    pub num_tours: i64,
    pub num_ratings: i64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

#[derive(Debug, FromRow)]
pub struct DifficultyStatsRow {
    pub difficulty: String,
    pub num_tours: i64,
    pub num_ratings: i64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

impl TryFrom<DifficultyStatsRow> for DifficultyStats {
    type Error = anyhow::Error;

    fn try_from(r: DifficultyStatsRow) -> Result<Self, Self::Error> {
        Ok(Self {
            difficulty: r.difficulty.parse()?,
            num_tours: r.num_tours,
            num_ratings: r.num_ratings,
            avg_rating: r.avg_rating,
            avg_price: r.avg_price,
            min_price: r.min_price,
            max_price: r.max_price,
        })
    }
}

/// Tour starts falling in one calendar month (1..=12, UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyStarts {
    pub month: i32,
    pub num_tour_starts: i64,
    pub tours: Vec<String>,
}

/// Client-supplied tour fields. Everything is optional so a missing field
/// yields a validation message, and so the same shape serves partial updates.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TourInput {
    pub name: Option<String>,
    pub duration: Option<i32>,
    pub max_group_size: Option<i32>,
    pub difficulty: Option<String>,
    pub ratings_average: Option<f64>,
    pub ratings_quantity: Option<i32>,
    pub price: Option<f64>,
    pub price_discount: Option<f64>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub start_dates: Option<Vec<String>>,
    pub secret_tour: Option<bool>,
}

impl TourInput {
    /// Fill every field the patch leaves out from `tour`.
    pub fn merged_over(self, tour: &Tour) -> TourInput {
        TourInput {
            name: self.name.or_else(|| Some(tour.name.clone())),
            duration: self.duration.or(Some(tour.duration)),
            max_group_size: self.max_group_size.or(Some(tour.max_group_size)),
            difficulty: self
                .difficulty
                .or_else(|| Some(tour.difficulty.as_str().to_string())),
            ratings_average: self.ratings_average.or(Some(tour.ratings_average)),
            ratings_quantity: self.ratings_quantity.or(Some(tour.ratings_quantity)),
            price: self.price.or(Some(tour.price)),
            price_discount: self.price_discount.or(tour.price_discount),
            summary: self.summary.or_else(|| Some(tour.summary.clone())),
            description: self.description.or_else(|| tour.description.clone()),
            image_cover: self.image_cover.or_else(|| Some(tour.image_cover.clone())),
            start_dates: self.start_dates.or_else(|| {
                Some(
                    tour.start_dates
                        .iter()
                        .map(|d| d.format(&Rfc3339).unwrap_or_default())
                        .collect(),
                )
            }),
            secret_tour: self.secret_tour.or(Some(tour.secret_tour)),
        }
    }
}

/// A validated tour ready to write.
#[derive(Debug, Clone, PartialEq)]
pub struct TourDraft {
    pub name: String,
    pub slug: String,
    pub duration: i32,
    pub max_group_size: i32,
    pub difficulty: Difficulty,
    pub ratings_average: f64,
    pub ratings_quantity: i32,
    pub price: f64,
    pub price_discount: Option<f64>,
    pub summary: String,
    pub description: Option<String>,
    pub image_cover: String,
    pub start_dates: Vec<OffsetDateTime>,
    pub secret_tour: bool,
}

fn required_text(value: Option<String>, message: &str, errors: &mut Vec<String>) -> String {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_default();
    if value.is_empty() {
        errors.push(message.to_string());
    }
    value
}

fn round_rating(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl TryFrom<TourInput> for TourDraft {
    type Error = AppError;

    fn try_from(input: TourInput) -> Result<Self, Self::Error> {
        let mut errors = Vec::new();

        let name = required_text(input.name, "A tour must have a name", &mut errors);
        let name_len = name.chars().count();
        if name_len > NAME_MAX_LEN {
            errors.push(format!(
                "A tour name must have less or equal than {NAME_MAX_LEN} characters"
            ));
        } else if name_len > 0 && name_len < NAME_MIN_LEN {
            errors.push(format!(
                "A tour name must have more or equal than {NAME_MIN_LEN} characters"
            ));
        }

        let duration = input.duration.unwrap_or_default();
        if input.duration.is_none() {
            errors.push("A tour must have a duration".into());
        } else if duration <= 0 {
            errors.push("A tour duration must be positive".into());
        }

        let max_group_size = input.max_group_size.unwrap_or_default();
        if input.max_group_size.is_none() {
            errors.push("A tour must have a group size".into());
        } else if max_group_size <= 0 {
            errors.push("A tour group size must be positive".into());
        }

        let difficulty = match input.difficulty.as_deref().map(str::trim) {
            None | Some("") => {
                errors.push("A tour must have a difficulty".into());
                None
            }
            Some(raw) => match raw.parse::<Difficulty>() {
                Ok(d) => Some(d),
                Err(_) => {
                    errors.push("Difficulty is either easy, medium or difficult".into());
                    None
                }
            },
        };

        let ratings_average = round_rating(input.ratings_average.unwrap_or(DEFAULT_RATING));
        if ratings_average < 1.0 {
            errors.push("Rating must be above 1.0".into());
        } else if ratings_average > 5.0 {
            errors.push("Rating must be below 5.0".into());
        }

        let price = input.price.unwrap_or_default();
        if input.price.is_none() {
            errors.push("A tour must have a price".into());
        } else if price <= 0.0 {
            errors.push("A tour price must be positive".into());
        }

        if let Some(discount) = input.price_discount {
            if discount >= price {
                errors.push(format!(
                    "Discount price {discount} should be below regular price"
                ));
            }
        }

        let summary = required_text(input.summary, "A tour must have a summary", &mut errors);
        let image_cover =
            required_text(input.image_cover, "A tour must have a cover image", &mut errors);
        let mut start_dates = Vec::new();
        for raw in input.start_dates.unwrap_or_default() {
            match OffsetDateTime::parse(raw.trim(), &Rfc3339) {
                Ok(date) => start_dates.push(date),
                Err(_) => errors.push(format!("Invalid start date: {raw}")),
            }
        }

        let description = input
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        match difficulty {
            Some(difficulty) if errors.is_empty() => Ok(Self {
                slug: slugify(&name),
                name,
                duration,
                max_group_size,
                difficulty,
                ratings_average,
                ratings_quantity: input.ratings_quantity.unwrap_or(0).max(0),
                price,
                price_discount: input.price_discount,
                summary,
                description,
                image_cover,
                start_dates,
                secret_tour: input.secret_tour.unwrap_or(false),
            }),
            _ => Err(AppError::Validation(errors)),
        }
    }
}

/// Lowercase ASCII words joined by single dashes.
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
