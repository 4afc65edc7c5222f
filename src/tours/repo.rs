use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use sqlx::PgPool;
use time::{Date, Month, OffsetDateTime, UtcOffset};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::AppError,
    response::Window,
    tours::{
        query::TourSort,
        repo_types::{
            Difficulty, DifficultyStats, DifficultyStatsRow, MonthlyStarts, Tour, TourDraft,
            TourRow,
        },
    },
};

/// Tour persistence. Secret tours are write-only: no read, update or delete
/// ever matches one.
#[async_trait]
pub trait TourStore: Send + Sync {
    async fn list(&self, sort: &TourSort, window: Window) -> Result<Vec<Tour>, AppError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tour>, AppError>;
    async fn insert(&self, draft: TourDraft) -> Result<Tour, AppError>;
    async fn update(&self, id: Uuid, draft: TourDraft) -> Result<Option<Tour>, AppError>;
    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;
    /// Grouped by difficulty over tours rated at least `min_rating`,
    /// cheapest average first.
    async fn stats(&self, min_rating: f64) -> Result<Vec<DifficultyStats>, AppError>;
    /// Start dates in `year` grouped by month, busiest first, at most 12.
    async fn monthly_plan(&self, year: i32) -> Result<Vec<MonthlyStarts>, AppError>;
}

const TOUR_COLUMNS: &str = "id, name, slug, duration, max_group_size, difficulty, \
     ratings_average, ratings_quantity, price, price_discount, summary, description, \
     image_cover, start_dates, secret_tour, created_at";

/// `[Jan 1 of year, Jan 1 of year + 1)` in UTC.
pub fn year_bounds(year: i32) -> Result<(OffsetDateTime, OffsetDateTime), AppError> {
    let start = |y: i32| {
        Date::from_calendar_date(y, Month::January, 1)
            .map(|d| d.midnight().assume_utc())
            .map_err(|_| AppError::Cast {
                path: "year".into(),
                value: year.to_string(),
            })
    };
    Ok((start(year)?, start(year.saturating_add(1))?))
}

fn into_tour(row: TourRow) -> Result<Tour, AppError> {
    Ok(Tour::try_from(row)?)
}

fn into_stats(row: DifficultyStatsRow) -> Result<DifficultyStats, AppError> {
    Ok(DifficultyStats::try_from(row)?)
}

#[derive(Clone)]
pub struct PgTourStore {
    db: PgPool,
}

impl PgTourStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TourStore for PgTourStore {
    async fn list(&self, sort: &TourSort, window: Window) -> Result<Vec<Tour>, AppError> {
        let rows = sqlx::query_as::<_, TourRow>(&format!(
            r#"
            SELECT {TOUR_COLUMNS}
            FROM tours
            WHERE NOT secret_tour
            ORDER BY {}
            LIMIT $1 OFFSET $2
            "#,
            sort.order_by()
        ))
        .bind(window.limit)
        .bind(window.offset)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(into_tour).collect()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tour>, AppError> {
        let row = sqlx::query_as::<_, TourRow>(&format!(
            "SELECT {TOUR_COLUMNS} FROM tours WHERE id = $1 AND NOT secret_tour"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(into_tour).transpose()
    }

    async fn insert(&self, draft: TourDraft) -> Result<Tour, AppError> {
        let row = sqlx::query_as::<_, TourRow>(&format!(
            r#"
            INSERT INTO tours (name, slug, duration, max_group_size, difficulty,
                               ratings_average, ratings_quantity, price, price_discount,
                               summary, description, image_cover, start_dates, secret_tour)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {TOUR_COLUMNS}
            "#
        ))
        .bind(&draft.name)
        .bind(&draft.slug)
        .bind(draft.duration)
        .bind(draft.max_group_size)
        .bind(draft.difficulty.as_str())
        .bind(draft.ratings_average)
        .bind(draft.ratings_quantity)
        .bind(draft.price)
        .bind(draft.price_discount)
        .bind(&draft.summary)
        .bind(&draft.description)
        .bind(&draft.image_cover)
        .bind(&draft.start_dates)
        .bind(draft.secret_tour)
        .fetch_one(&self.db)
        .await?;
        into_tour(row)
    }

    async fn update(&self, id: Uuid, draft: TourDraft) -> Result<Option<Tour>, AppError> {
        let row = sqlx::query_as::<_, TourRow>(&format!(
            r#"
            UPDATE tours
            SET name = $2, slug = $3, duration = $4, max_group_size = $5,
                difficulty = $6, ratings_average = $7, ratings_quantity = $8,
                price = $9, price_discount = $10, summary = $11,
                description = $12, image_cover = $13, start_dates = $14,
                secret_tour = $15
            WHERE id = $1 AND NOT secret_tour
            RETURNING {TOUR_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&draft.name)
        .bind(&draft.slug)
        .bind(draft.duration)
        .bind(draft.max_group_size)
        .bind(draft.difficulty.as_str())
        .bind(draft.ratings_average)
        .bind(draft.ratings_quantity)
        .bind(draft.price)
        .bind(draft.price_discount)
        .bind(&draft.summary)
        .bind(&draft.description)
        .bind(&draft.image_cover)
        .bind(&draft.start_dates)
        .bind(draft.secret_tour)
        .fetch_optional(&self.db)
        .await?;
        row.map(into_tour).transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let res = sqlx::query("DELETE FROM tours WHERE id = $1 AND NOT secret_tour")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn stats(&self, min_rating: f64) -> Result<Vec<DifficultyStats>, AppError> {
        let rows = sqlx::query_as::<_, DifficultyStatsRow>(
            r#"
            SELECT difficulty,
                   COUNT(*) AS num_tours,
                   COALESCE(SUM(ratings_quantity), 0)::BIGINT AS num_ratings,
                   AVG(ratings_average) AS avg_rating,
                   AVG(price) AS avg_price,
                   MIN(price) AS min_price,
                   MAX(price) AS max_price
            FROM tours
            WHERE ratings_average >= $1 AND NOT secret_tour
            GROUP BY difficulty
            ORDER BY avg_price, difficulty
            "#,
        )
        .bind(min_rating)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(into_stats).collect()
    }

    async fn monthly_plan(&self, year: i32) -> Result<Vec<MonthlyStarts>, AppError> {
        let (from, until) = year_bounds(year)?;
        let rows = sqlx::query_as::<_, MonthlyStarts>(
            r#"
            SELECT EXTRACT(MONTH FROM start_date AT TIME ZONE 'UTC')::INT AS month,
                   COUNT(*) AS num_tour_starts,
                   ARRAY_AGG(name ORDER BY name) AS tours
            FROM tours, UNNEST(start_dates) AS start_date
            WHERE start_date >= $1 AND start_date < $2 AND NOT secret_tour
            GROUP BY month
            ORDER BY num_tour_starts DESC, month
            LIMIT 12
            "#,
        )
        .bind(from)
        .bind(until)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }
}

#[derive(Default)]
pub struct MemoryTourStore {
    tours: RwLock<HashMap<Uuid, Tour>>,
}

impl MemoryTourStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn ensure_unique_name(
    tours: &HashMap<Uuid, Tour>,
    name: &str,
    except: Option<Uuid>,
) -> Result<(), AppError> {
    if tours.values().any(|t| t.name == name && Some(t.id) != except) {
        return Err(AppError::DuplicateKey {
            field: "name".into(),
            value: name.to_string(),
        });
    }
    Ok(())
}

fn apply(tour: &mut Tour, draft: TourDraft) {
    tour.name = draft.name;
    tour.slug = draft.slug;
    tour.duration = draft.duration;
    tour.max_group_size = draft.max_group_size;
    tour.difficulty = draft.difficulty;
    tour.ratings_average = draft.ratings_average;
    tour.ratings_quantity = draft.ratings_quantity;
    tour.price = draft.price;
    tour.price_discount = draft.price_discount;
    tour.summary = draft.summary;
    tour.description = draft.description;
    tour.image_cover = draft.image_cover;
    tour.start_dates = draft.start_dates;
    tour.secret_tour = draft.secret_tour;
}

#[derive(Default)]
struct StatsAcc {
    num_tours: i64,
    num_ratings: i64,
    rating_sum: f64,
    price_sum: f64,
    min_price: f64,
    max_price: f64,
}

impl StatsAcc {
    fn add(&mut self, tour: &Tour) {
        if self.num_tours == 0 {
            self.min_price = tour.price;
            self.max_price = tour.price;
        }
        self.num_tours += 1;
        self.num_ratings += i64::from(tour.ratings_quantity);
        self.rating_sum += tour.ratings_average;
        self.price_sum += tour.price;
        self.min_price = self.min_price.min(tour.price);
        self.max_price = self.max_price.max(tour.price);
    }

    fn finish(self, difficulty: Difficulty) -> DifficultyStats {
        let n = self.num_tours as f64;
        DifficultyStats {
            difficulty,
            num_tours: self.num_tours,
            num_ratings: self.num_ratings,
            avg_rating: self.rating_sum / n,
            avg_price: self.price_sum / n,
            min_price: self.min_price,
            max_price: self.max_price,
        }
    }
}

#[async_trait]
impl TourStore for MemoryTourStore {
    async fn list(&self, sort: &TourSort, window: Window) -> Result<Vec<Tour>, AppError> {
        let tours = self.tours.read().await;
        let mut visible: Vec<Tour> = tours.values().filter(|t| !t.secret_tour).cloned().collect();
        visible.sort_by(|a, b| sort.compare(a, b));
        Ok(visible
            .into_iter()
            .skip(usize::try_from(window.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(window.limit).unwrap_or(0))
            .collect())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tour>, AppError> {
        let tours = self.tours.read().await;
        Ok(tours.get(&id).filter(|t| !t.secret_tour).cloned())
    }

    async fn insert(&self, draft: TourDraft) -> Result<Tour, AppError> {
        let mut tours = self.tours.write().await;
        ensure_unique_name(&tours, &draft.name, None)?;
        let tour = Tour {
            id: Uuid::new_v4(),
            name: draft.name,
            slug: draft.slug,
            duration: draft.duration,
            max_group_size: draft.max_group_size,
            difficulty: draft.difficulty,
            ratings_average: draft.ratings_average,
            ratings_quantity: draft.ratings_quantity,
            price: draft.price,
            price_discount: draft.price_discount,
            summary: draft.summary,
            description: draft.description,
            image_cover: draft.image_cover,
            start_dates: draft.start_dates,
            secret_tour: draft.secret_tour,
            created_at: OffsetDateTime::now_utc(),
        };
        tours.insert(tour.id, tour.clone());
        Ok(tour)
    }

    async fn update(&self, id: Uuid, draft: TourDraft) -> Result<Option<Tour>, AppError> {
        let mut tours = self.tours.write().await;
        ensure_unique_name(&tours, &draft.name, Some(id))?;
        let Some(tour) = tours.get_mut(&id).filter(|t| !t.secret_tour) else {
            return Ok(None);
        };
        apply(tour, draft);
        Ok(Some(tour.clone()))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let mut tours = self.tours.write().await;
        if !tours.get(&id).is_some_and(|t| !t.secret_tour) {
            return Ok(false);
        }
        Ok(tours.remove(&id).is_some())
    }

    async fn stats(&self, min_rating: f64) -> Result<Vec<DifficultyStats>, AppError> {
        let tours = self.tours.read().await;
        let mut groups: HashMap<Difficulty, StatsAcc> = HashMap::new();
        for tour in tours
            .values()
            .filter(|t| !t.secret_tour && t.ratings_average >= min_rating)
        {
            groups.entry(tour.difficulty).or_default().add(tour);
        }
        let mut stats: Vec<DifficultyStats> = groups
            .into_iter()
            .map(|(difficulty, acc)| acc.finish(difficulty))
            .collect();
        stats.sort_by(|a, b| {
            a.avg_price
                .total_cmp(&b.avg_price)
                .then_with(|| a.difficulty.as_str().cmp(b.difficulty.as_str()))
        });
        Ok(stats)
    }

    async fn monthly_plan(&self, year: i32) -> Result<Vec<MonthlyStarts>, AppError> {
        let (from, until) = year_bounds(year)?;
        let tours = self.tours.read().await;
        let mut months: BTreeMap<i32, Vec<String>> = BTreeMap::new();
        for tour in tours.values().filter(|t| !t.secret_tour) {
            for start in tour.start_dates.iter().filter(|d| **d >= from && **d < until) {
                let month = i32::from(u8::from(start.to_offset(UtcOffset::UTC).month()));
                months.entry(month).or_default().push(tour.name.clone());
            }
        }
        let mut plan: Vec<MonthlyStarts> = months
            .into_iter()
            .map(|(month, mut names)| {
                names.sort();
                MonthlyStarts {
                    month,
                    num_tour_starts: names.len() as i64,
                    tours: names,
                }
            })
            .collect();
        plan.sort_by(|a, b| b.num_tour_starts.cmp(&a.num_tour_starts).then(a.month.cmp(&b.month)));
        plan.truncate(12);
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::format_description::well_known::Rfc3339;

    fn draft(name: &str) -> TourDraft {
        TourDraft {
            name: name.into(),
            slug: crate::tours::repo_types::slugify(name),
            duration: 5,
            max_group_size: 10,
            difficulty: Difficulty::Medium,
            ratings_average: 4.5,
            ratings_quantity: 0,
            price: 500.0,
            price_discount: None,
            summary: "Summary".into(),
            description: None,
            image_cover: "cover.jpg".into(),
            start_dates: Vec::new(),
            secret_tour: false,
        }
    }

    fn secret(name: &str) -> TourDraft {
        TourDraft {
            secret_tour: true,
            ..draft(name)
        }
    }

    fn priced(name: &str, difficulty: Difficulty, rating: f64, price: f64) -> TourDraft {
        TourDraft {
            difficulty,
            ratings_average: rating,
            ratings_quantity: 3,
            price,
            ..draft(name)
        }
    }

    fn starting(name: &str, dates: &[&str]) -> TourDraft {
        TourDraft {
            start_dates: dates
                .iter()
                .map(|d| OffsetDateTime::parse(d, &Rfc3339).unwrap())
                .collect(),
            ..draft(name)
        }
    }

    #[tokio::test]
    async fn names_are_unique() {
        let store = MemoryTourStore::new();
        let first = store.insert(draft("The Sea Explorer")).await.unwrap();
        let err = store.insert(draft("The Sea Explorer")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Duplicate field value: The Sea Explorer. Please use another value"
        );

        // Renaming a tour to its own name is not a conflict.
        let same = store.update(first.id, draft("The Sea Explorer")).await.unwrap();
        assert!(same.is_some());
    }

    #[tokio::test]
    async fn update_and_delete_missing_tour() {
        let store = MemoryTourStore::new();
        assert!(store
            .update(Uuid::new_v4(), draft("The Park Camper"))
            .await
            .unwrap()
            .is_none());
        assert!(!store.delete(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn secret_tours_are_hidden_from_every_read() {
        let store = MemoryTourStore::new();
        let hidden = store.insert(secret("The Secret Hideout")).await.unwrap();
        assert!(hidden.secret_tour);
        let open = store.insert(draft("The Open Trailhead")).await.unwrap();

        let listed = store.list(&TourSort::default(), Window::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, open.id);

        assert!(store.find_by_id(hidden.id).await.unwrap().is_none());
        assert!(store
            .update(hidden.id, draft("The Renamed Hideout"))
            .await
            .unwrap()
            .is_none());
        assert!(!store.delete(hidden.id).await.unwrap());

        // The name is still taken.
        assert!(store.insert(draft("The Secret Hideout")).await.is_err());
    }

    #[tokio::test]
    async fn list_sorts_and_pages() {
        let store = MemoryTourStore::new();
        store.insert(priced("The Cheap Walk", Difficulty::Easy, 4.9, 100.0)).await.unwrap();
        store.insert(priced("The Pricey Walk", Difficulty::Easy, 4.9, 900.0)).await.unwrap();
        store.insert(priced("The Dull Walk!", Difficulty::Easy, 3.0, 50.0)).await.unwrap();

        let sort = TourSort::parse("-ratingsAverage,price").unwrap();
        let first = store
            .list(&sort, Window { limit: 2, offset: 0 })
            .await
            .unwrap();
        let names: Vec<_> = first.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["The Cheap Walk", "The Pricey Walk"]);

        let rest = store
            .list(&sort, Window { limit: 2, offset: 2 })
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].name, "The Dull Walk!");
    }

    #[tokio::test]
    async fn stats_group_by_difficulty_over_top_rated() {
        let store = MemoryTourStore::new();
        store.insert(priced("The Easy Stroll", Difficulty::Easy, 4.8, 200.0)).await.unwrap();
        store.insert(priced("The Easy Ramble", Difficulty::Easy, 4.6, 400.0)).await.unwrap();
        store.insert(priced("The Hard Climb!", Difficulty::Difficult, 4.9, 1000.0)).await.unwrap();
        store.insert(priced("The Low Rated One", Difficulty::Medium, 3.9, 10.0)).await.unwrap();
        store
            .insert(TourDraft {
                secret_tour: true,
                ..priced("The Hidden Medium", Difficulty::Medium, 5.0, 1.0)
            })
            .await
            .unwrap();

        let stats = store.stats(4.5).await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].difficulty, Difficulty::Easy);
        assert_eq!(stats[0].num_tours, 2);
        assert_eq!(stats[0].num_ratings, 6);
        assert_eq!(stats[0].avg_price, 300.0);
        assert_eq!(stats[0].min_price, 200.0);
        assert_eq!(stats[0].max_price, 400.0);
        assert!((stats[0].avg_rating - 4.7).abs() < 1e-9);
        assert_eq!(stats[1].difficulty, Difficulty::Difficult);
    }

    #[tokio::test]
    async fn monthly_plan_counts_starts_within_the_year() {
        let store = MemoryTourStore::new();
        store
            .insert(starting(
                "The Forest Hiker",
                &["2021-04-25T09:00:00Z", "2021-07-20T09:00:00Z", "2022-04-01T09:00:00Z"],
            ))
            .await
            .unwrap();
        store
            .insert(starting("The Sea Explorer", &["2021-07-05T09:00:00Z"]))
            .await
            .unwrap();
        store
            .insert(TourDraft {
                secret_tour: true,
                ..starting("The Secret Sailor", &["2021-07-01T09:00:00Z"])
            })
            .await
            .unwrap();

        let plan = store.monthly_plan(2021).await.unwrap();
        assert_eq!(
            plan,
            vec![
                MonthlyStarts {
                    month: 7,
                    num_tour_starts: 2,
                    tours: vec!["The Forest Hiker".into(), "The Sea Explorer".into()],
                },
                MonthlyStarts {
                    month: 4,
                    num_tour_starts: 1,
                    tours: vec!["The Forest Hiker".into()],
                },
            ]
        );
        assert!(store.monthly_plan(2020).await.unwrap().is_empty());
    }

    #[test]
    fn year_bounds_reject_unrepresentable_years() {
        let (from, until) = year_bounds(2021).unwrap();
        assert_eq!(from.year(), 2021);
        assert_eq!(until.year(), 2022);
        assert!(matches!(year_bounds(i32::MAX), Err(AppError::Cast { .. })));
    }
}
