use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use time::OffsetDateTime;
use tracing::{info, instrument};

use super::{
    claims::TokenKind,
    dto::{AccessTokenResponse, LoginRequest, ProfileResponse, SignUpRequest, SignUpResponse},
    extractors::{
        refresh_cookie, require_refresh_cookie, require_token_header, AuthClaims, BearerToken,
        RefreshCookie,
    },
    services::{normalize_email, sign_up},
    session::SessionManager,
};
use crate::{
    error::{with_deadline, AppError, AppResult},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/user/sign-up", post(register))
        .route("/user/login", post(login).get(login))
}

pub fn refresh_routes() -> Router<AppState> {
    Router::new()
        .route("/user/refresh-token", get(refresh))
        .route_layer(middleware::from_fn(require_token_header))
        .route_layer(middleware::from_fn(require_refresh_cookie))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/user/me", get(get_me))
        .route_layer(middleware::from_fn(require_token_header))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<SignUpRequest>, JsonRejection>,
) -> AppResult<Json<SignUpResponse>> {
    let Json(payload) = payload?;
    let inserted_id = with_deadline(
        state.config.request_timeout(),
        sign_up(
            state.store.as_ref(),
            &state.codec,
            payload,
            OffsetDateTime::now_utc(),
        ),
    )
    .await?;
    Ok(Json(SignUpResponse { inserted_id }))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<(CookieJar, Json<AccessTokenResponse>)> {
    let Json(payload) = payload?;
    let email = normalize_email(&payload.email);
    let manager = SessionManager::from_ref(&state);

    let pair = with_deadline(
        state.config.request_timeout(),
        manager.login(&email, &payload.password, OffsetDateTime::now_utc()),
    )
    .await?;

    // The exchange happens after the refresh token expires, so the cookie
    // has to outlive it by the refresh window.
    let max_age = state.codec.ttl(TokenKind::Refresh)
        + time::Duration::seconds(state.config.jwt.refresh_window_secs);
    let cookie = refresh_cookie(pair.refresh, &state.config.cookie, max_age);
    Ok((
        jar.add(cookie),
        Json(AccessTokenResponse {
            access_token: pair.access,
        }),
    ))
}

#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    Extension(BearerToken(access)): Extension<BearerToken>,
    Extension(RefreshCookie(refresh)): Extension<RefreshCookie>,
) -> AppResult<Json<AccessTokenResponse>> {
    let manager = SessionManager::from_ref(&state);
    let access_token = with_deadline(
        state.config.request_timeout(),
        manager.refresh(&access, &refresh, OffsetDateTime::now_utc()),
    )
    .await?;
    Ok(Json(AccessTokenResponse { access_token }))
}

#[instrument(skip(state, claims))]
pub async fn get_me(
    State(state): State<AppState>,
    claims: AuthClaims,
) -> AppResult<Json<ProfileResponse>> {
    let user_id = claims.user_id()?;
    let store = state.store.clone();
    let profile = with_deadline(state.config.request_timeout(), async move {
        let user = store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;
        let books = store.list_purchases(user_id).await?;
        Ok::<_, AppError>(ProfileResponse { user, books })
    })
    .await?;
    info!(%user_id, books = profile.books.len(), "profile served");
    Ok(Json(profile))
}
