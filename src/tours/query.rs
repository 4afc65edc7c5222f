//! Sorting, field selection and paging for tour listings.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::AppError,
    response::{Pagination, Window},
    tours::repo_types::Tour,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Name,
    Duration,
    MaxGroupSize,
    Difficulty,
    RatingsAverage,
    RatingsQuantity,
    Price,
    CreatedAt,
}

impl SortField {
    fn from_param(name: &str) -> Option<Self> {
        Some(match name {
            "name" => SortField::Name,
            "duration" => SortField::Duration,
            "maxGroupSize" => SortField::MaxGroupSize,
            "difficulty" => SortField::Difficulty,
            "ratingsAverage" => SortField::RatingsAverage,
            "ratingsQuantity" => SortField::RatingsQuantity,
            "price" => SortField::Price,
            "createdAt" => SortField::CreatedAt,
            _ => return None,
        })
    }

    pub fn column(self) -> &'static str {
        match self {
            SortField::Name => "name",
            SortField::Duration => "duration",
            SortField::MaxGroupSize => "max_group_size",
            SortField::Difficulty => "difficulty",
            SortField::RatingsAverage => "ratings_average",
            SortField::RatingsQuantity => "ratings_quantity",
            SortField::Price => "price",
            SortField::CreatedAt => "created_at",
        }
    }

    fn compare(self, a: &Tour, b: &Tour) -> Ordering {
        match self {
            SortField::Name => a.name.cmp(&b.name),
            SortField::Duration => a.duration.cmp(&b.duration),
            SortField::MaxGroupSize => a.max_group_size.cmp(&b.max_group_size),
            // Stored as text, so order the way the database does.
            SortField::Difficulty => a.difficulty.as_str().cmp(b.difficulty.as_str()),
            SortField::RatingsAverage => a.ratings_average.total_cmp(&b.ratings_average),
            SortField::RatingsQuantity => a.ratings_quantity.cmp(&b.ratings_quantity),
            SortField::Price => a.price.total_cmp(&b.price),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub descending: bool,
}

/// Ordered sort keys, always ending with the id as a tie-break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TourSort(Vec<SortKey>);

impl Default for TourSort {
    fn default() -> Self {
        TourSort(vec![SortKey {
            field: SortField::CreatedAt,
            descending: true,
        }])
    }
}

impl TourSort {
    /// `-ratingsAverage,price` style list. Blank input means the default order.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let mut keys = Vec::new();
        let mut errors = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, descending) = match part.strip_prefix('-') {
                Some(name) => (name, true),
                None => (part, false),
            };
            match SortField::from_param(name) {
                Some(field) => keys.push(SortKey { field, descending }),
                None => errors.push(format!("Cannot sort tours by {name}")),
            }
        }
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }
        if keys.is_empty() {
            return Ok(Self::default());
        }
        Ok(TourSort(keys))
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.0
    }

    /// `ORDER BY` body. Built only from whitelisted column names.
    pub fn order_by(&self) -> String {
        let mut clauses: Vec<String> = self
            .0
            .iter()
            .map(|key| {
                let dir = if key.descending { "DESC" } else { "ASC" };
                format!("{} {dir}", key.field.column())
            })
            .collect();
        clauses.push("id ASC".into());
        clauses.join(", ")
    }

    pub fn compare(&self, a: &Tour, b: &Tour) -> Ordering {
        self.0
            .iter()
            .map(|key| {
                let ord = key.field.compare(a, b);
                if key.descending {
                    ord.reverse()
                } else {
                    ord
                }
            })
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| a.id.cmp(&b.id))
    }
}

/// Which JSON keys survive in a listing. Names starting with `-` are
/// dropped; any plain name switches to keeping only the named keys and `id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelection {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl FieldSelection {
    pub fn parse(raw: &str) -> Self {
        let mut selection = FieldSelection::default();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.strip_prefix('-') {
                Some(name) => selection.exclude.push(name.to_string()),
                None => selection.include.push(part.to_string()),
            }
        }
        selection
    }

    fn keeps(&self, key: &str) -> bool {
        if self.exclude.iter().any(|f| f == key) {
            return false;
        }
        self.include.is_empty() || key == "id" || self.include.iter().any(|f| f == key)
    }

    pub fn project<T: Serialize>(&self, item: &T) -> Result<Value, AppError> {
        let value = serde_json::to_value(item).map_err(anyhow::Error::from)?;
        Ok(match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .filter(|(key, _)| self.keeps(key))
                    .collect::<Map<_, _>>(),
            ),
            other => other,
        })
    }
}

/// `GET /tours` query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TourQuery {
    pub sort: Option<String>,
    pub fields: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub page: Option<i64>,
}

/// A checked listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TourListing {
    pub sort: TourSort,
    pub fields: FieldSelection,
    pub window: Window,
}

impl TourQuery {
    /// The five best-rated tours, cheapest first among equals.
    pub fn top_cheap() -> Self {
        Self {
            sort: Some("-ratingsAverage,price".into()),
            fields: Some("name,price,ratingsAverage,summary,difficulty".into()),
            limit: Some(5),
            ..Default::default()
        }
    }

    pub fn into_listing(self) -> Result<TourListing, AppError> {
        let defaults = Pagination::default();
        let window = Pagination {
            limit: self.limit.unwrap_or(defaults.limit),
            offset: self.offset.unwrap_or(defaults.offset),
            page: self.page,
        }
        .window()?;
        Ok(TourListing {
            sort: TourSort::parse(self.sort.as_deref().unwrap_or_default())?,
            fields: FieldSelection::parse(self.fields.as_deref().unwrap_or_default()),
            window,
        })
    }
}
