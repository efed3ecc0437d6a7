use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    claims::{Identity, Role, TokenKind},
    dto::SignUpRequest,
    jwt::TokenCodec,
    password,
    session::SessionError,
};
use crate::{
    error::{AppError, AppResult},
    store::{InsertUserError, NewUser, Store},
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

const DUPLICATE_EMAIL: &str = "User with this email already exist!";
const DUPLICATE_PHONE: &str = "User with this phone number already exist!";

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate(req: &SignUpRequest) -> AppResult<()> {
    let required = [
        ("firstName", &req.first_name),
        ("lastName", &req.last_name),
        ("email", &req.email),
        ("password", &req.password),
        ("phone", &req.phone),
    ];
    if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
        return Err(AppError::BadRequest(format!("{field} is required")));
    }
    if req.user_type.is_none() {
        return Err(AppError::BadRequest("userType is required".into()));
    }
    if !is_valid_email(&req.email) {
        return Err(AppError::BadRequest("Invalid email".into()));
    }
    Ok(())
}

/// Registers a user. The password is hashed before it reaches the store and
/// the record starts out holding a freshly minted refresh token.
#[instrument(skip(store, codec, req), fields(email = %req.email))]
pub async fn sign_up(
    store: &dyn Store,
    codec: &TokenCodec,
    mut req: SignUpRequest,
    now: OffsetDateTime,
) -> AppResult<Uuid> {
    req.email = normalize_email(&req.email);
    req.phone = req.phone.trim().to_string();
    validate(&req)?;

    if store.count_users_by_email(&req.email).await? > 0 {
        warn!("email already registered");
        return Err(AppError::BadRequest(DUPLICATE_EMAIL.into()));
    }
    if store.count_users_by_phone(&req.phone).await? > 0 {
        warn!("phone already registered");
        return Err(AppError::BadRequest(DUPLICATE_PHONE.into()));
    }

    let password_hash = password::hash(req.password).await?;
    let refresh = codec
        .issue(&Identity::default(), TokenKind::Refresh, now)
        .map_err(SessionError::from)?;

    let user = store
        .insert_user(NewUser {
            first_name: req.first_name,
            last_name: req.last_name,
            email: req.email,
            phone: req.phone,
            password_hash,
            role: req.user_type.unwrap_or(Role::Member),
            refresh_token: Some(refresh),
        })
        .await
        .map_err(|e| match e {
            // A concurrent sign-up can pass the count checks above first.
            InsertUserError::DuplicateEmail => AppError::BadRequest(DUPLICATE_EMAIL.into()),
            InsertUserError::DuplicatePhone => AppError::BadRequest(DUPLICATE_PHONE.into()),
            InsertUserError::Store(e) => AppError::Internal(e),
        })?;

    info!(user_id = %user.id, role = user.role.as_str(), "user registered");
    Ok(user.id)
}
