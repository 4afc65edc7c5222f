use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::guard,
    error::{parse_id, AppError},
    extract::{Params, Payload},
    response::DataResponse,
    state::AppState,
    tours::{
        dto::{PlanEnvelope, StatsEnvelope, TourEnvelope, TourView, ToursEnvelope},
        query::TourQuery,
        repo_types::{TourDraft, TourInput},
    },
    users::repo_types::Role,
};

/// Roles allowed to create, edit and delete tours.
pub const TOUR_EDITORS: &[Role] = &[Role::Admin, Role::LeadGuide];

/// Roles allowed to see the monthly schedule.
pub const TOUR_PLANNERS: &[Role] = &[Role::Admin, Role::LeadGuide, Role::Guide];

/// Rating floor for `/tours/tour-stats`.
pub const STATS_MIN_RATING: f64 = 4.5;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/tours", get(list_tours))
        .route("/tours/top-5-cheap", get(top_cheap_tours))
        .route("/tours/tour-stats", get(tour_stats))
        .route("/tours/:id", get(get_tour))
}

pub fn planning_routes(state: &AppState) -> Router<AppState> {
    Router::new().route(
        "/tours/monthly-plan/:year",
        guard::restricted(get(monthly_plan), state, TOUR_PLANNERS),
    )
}

pub fn write_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/tours",
            guard::restricted(post(create_tour), state, TOUR_EDITORS),
        )
        .route(
            "/tours/:id",
            guard::restricted(
                patch(update_tour).delete(delete_tour),
                state,
                TOUR_EDITORS,
            ),
        )
}

async fn listing(
    state: &AppState,
    query: TourQuery,
) -> Result<Json<DataResponse<ToursEnvelope>>, AppError> {
    let listing = query.into_listing()?;
    let tours = state
        .tours
        .list(&listing.sort, listing.window)
        .await?
        .into_iter()
        .map(|tour| listing.fields.project(&TourView::from(tour)))
        .collect::<Result<Vec<_>, _>>()?;
    let count = tours.len();
    Ok(Json(DataResponse::with_results(ToursEnvelope { tours }, count)))
}

#[instrument(skip(state))]
pub async fn list_tours(
    State(state): State<AppState>,
    Params(query): Params<TourQuery>,
) -> Result<Json<DataResponse<ToursEnvelope>>, AppError> {
    listing(&state, query).await
}

#[instrument(skip(state))]
pub async fn top_cheap_tours(
    State(state): State<AppState>,
) -> Result<Json<DataResponse<ToursEnvelope>>, AppError> {
    listing(&state, TourQuery::top_cheap()).await
}

#[instrument(skip(state))]
pub async fn tour_stats(
    State(state): State<AppState>,
) -> Result<Json<DataResponse<StatsEnvelope>>, AppError> {
    let stats = state.tours.stats(STATS_MIN_RATING).await?;
    Ok(Json(DataResponse::new(StatsEnvelope { stats })))
}

#[instrument(skip(state))]
pub async fn monthly_plan(
    State(state): State<AppState>,
    Path(year): Path<String>,
) -> Result<Json<DataResponse<PlanEnvelope>>, AppError> {
    let year: i32 = year.trim().parse().map_err(|_| AppError::Cast {
        path: "year".into(),
        value: year.clone(),
    })?;
    let plan = state.tours.monthly_plan(year).await?;
    Ok(Json(DataResponse::new(PlanEnvelope { plan })))
}

#[instrument(skip(state))]
pub async fn get_tour(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<TourEnvelope>>, AppError> {
    let id = parse_id(&id)?;
    let tour = state
        .tours
        .find_by_id(id)
        .await?
        .ok_or(AppError::NotFound("tour"))?;
    Ok(Json(DataResponse::new(TourEnvelope::from(tour))))
}

#[instrument(skip(state, payload))]
pub async fn create_tour(
    State(state): State<AppState>,
    Payload(payload): Payload<TourInput>,
) -> Result<(StatusCode, Json<DataResponse<TourEnvelope>>), AppError> {
    let draft = TourDraft::try_from(payload)?;
    let tour = state.tours.insert(draft).await?;
    info!(tour_id = %tour.id, name = %tour.name, "tour created");
    Ok((
        StatusCode::CREATED,
        Json(DataResponse::new(TourEnvelope::from(tour))),
    ))
}

#[instrument(skip(state, payload))]
pub async fn update_tour(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Payload(payload): Payload<TourInput>,
) -> Result<Json<DataResponse<TourEnvelope>>, AppError> {
    let id = parse_id(&id)?;
    let current = state
        .tours
        .find_by_id(id)
        .await?
        .ok_or(AppError::NotFound("tour"))?;
    let draft = TourDraft::try_from(payload.merged_over(&current))?;
    let tour = state
        .tours
        .update(id, draft)
        .await?
        .ok_or(AppError::NotFound("tour"))?;
    info!(tour_id = %tour.id, "tour updated");
    Ok(Json(DataResponse::new(TourEnvelope::from(tour))))
}

#[instrument(skip(state))]
pub async fn delete_tour(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    if !state.tours.delete(id).await? {
        return Err(AppError::NotFound("tour"));
    }
    info!(tour_id = %id, "tour deleted");
    Ok(StatusCode::NO_CONTENT)
}
