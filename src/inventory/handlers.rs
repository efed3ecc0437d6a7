use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware,
    routing::{patch, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::instrument;

use super::{
    dto::{AddItemRequest, AddItemResponse, BuyItemRequest, PurchaseReceipt},
    services::{add_item, purchase},
};
use crate::{
    auth::extractors::{require_token_header, AuthClaims},
    error::{with_deadline, AppError, AppResult},
    state::AppState,
};

pub fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route("/user/add-book", patch(add_book))
        .route("/user/buy-book", post(buy_book))
        .route_layer(middleware::from_fn(require_token_header))
}

#[instrument(skip(state, claims, payload))]
pub async fn add_book(
    State(state): State<AppState>,
    claims: AuthClaims,
    payload: Result<Json<AddItemRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<AddItemResponse>)> {
    let Json(payload) = payload?;
    let (item, created) = with_deadline(
        state.config.request_timeout(),
        add_item(state.store.as_ref(), claims.is_admin(), payload),
    )
    .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(AddItemResponse { created, item })))
}

#[instrument(skip(state, claims, payload))]
pub async fn buy_book(
    State(state): State<AppState>,
    claims: AuthClaims,
    payload: Result<Json<BuyItemRequest>, JsonRejection>,
) -> AppResult<Json<PurchaseReceipt>> {
    let Json(payload) = payload?;
    if payload.category.trim().is_empty() {
        return Err(AppError::BadRequest("category is required".into()));
    }
    let buyer = claims.user_id()?;
    let receipt = with_deadline(
        state.config.request_timeout(),
        purchase(
            state.store.as_ref(),
            &payload.category,
            buyer,
            OffsetDateTime::now_utc(),
        ),
    )
    .await?;
    Ok(Json(receipt))
}
