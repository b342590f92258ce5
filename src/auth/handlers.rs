use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument};

use super::{
    credentials,
    dto::{
        LoginRequest, LoginResponse, PublicUser, ResendRequest, SignupRequest, SignupResponse,
        UserResponse,
    },
    extractors::AuthSession,
    sessions, verification,
};
use crate::{error::AppResult, repo::Role, state::AppState};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/verify/resend", post(resend_verification))
        .route("/auth/verify/:token", get(verify_email))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<SignupResponse>)> {
    let user =
        credentials::create(&state, &payload.email, &payload.password, Role::Client, false).await?;

    // The account exists either way; a failed delivery can be retried through resend.
    if let Err(e) = verification::issue_and_send(&state, &user).await {
        error!(error = %e, user_id = %user.id, "verification delivery failed");
    }

    info!(user_id = %user.id, "user signed up");
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            user: user.into(),
            message: "check your email for a verification link",
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(payload): Json<ResendRequest>,
) -> AppResult<StatusCode> {
    verification::resend(&state, &payload.email).await?;
    Ok(StatusCode::ACCEPTED)
}

#[instrument(skip_all)]
pub async fn verify_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<UserResponse>> {
    let user = verification::redeem(&state, &token).await?;
    Ok(Json(UserResponse { user: user.into() }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let (session, user) =
        sessions::login(&state, &payload.email, &payload.password, payload.role).await?;
    Ok(Json(LoginResponse {
        token: session.token,
        expires_at: session.expires_at,
        user: user.into(),
    }))
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
) -> AppResult<StatusCode> {
    sessions::logout(&state, &session.token).await?;
    info!(user_id = %session.user_id, "user logged out");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all)]
pub async fn get_me(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
) -> AppResult<Json<UserResponse>> {
    let user = credentials::find(&state, session.user_id).await?;
    Ok(Json(UserResponse {
        user: PublicUser::from(user),
    }))
}
