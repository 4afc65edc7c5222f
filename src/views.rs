use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tracing::instrument;

use crate::{
    auth::session::MaybeUser,
    error::AppError,
    response::Window,
    state::AppState,
    tours::{dto::TourView, query::TourSort},
    users::dto::PublicUser,
};

/// Page context for the overview. Rendering is left to the client.
#[derive(Debug, Serialize)]
pub struct OverviewPage {
    pub title: &'static str,
    pub tours: Vec<TourView>,
    pub user: Option<PublicUser>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(overview))
}

#[instrument(skip(state, user))]
pub async fn overview(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
) -> Result<Json<OverviewPage>, AppError> {
    let tours = state
        .tours
        .list(&TourSort::default(), Window::default())
        .await?;
    Ok(Json(OverviewPage {
        title: "All Tours",
        tours: tours.into_iter().map(TourView::from).collect(),
        user: user.as_ref().map(PublicUser::from),
    }))
}
