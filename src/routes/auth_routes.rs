// src/routes/auth_routes.rs

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::{
    auth::{generate_access_token, hash_access_token, hash_password, verify_password},
    db::{ViolationKind, violated_constraint},
    error::ApiError,
    extract::{ApiForm, ApiJson},
    middleware::auth_context::AuthContext,
    models::*,
};

const MIN_PASSWORD_LEN: usize = 8;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/token", post(login_for_access_token))
        .route("/me", get(me))
        .route("/logout", post(logout))
}

fn incorrect_login() -> ApiError {
    ApiError::BadRequest("Incorrect email or password".into())
}

fn email_taken() -> ApiError {
    ApiError::BadRequest("Email already registered".into())
}

fn validate_registration(req: &RegisterRequest) -> Result<Role, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("name is required".into()));
    }
    let email = req.email.trim();
    // shape check only; deliverability is not our concern
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !well_formed {
        return Err(ApiError::Validation("email is not a valid address".into()));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    match req.role.as_deref() {
        None => Ok(Role::Receptionist),
        Some(r) => r.parse::<Role>().map_err(ApiError::Validation),
    }
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<UserOut>), ApiError> {
    let role = validate_registration(&req)?;
    let email = req.email.trim().to_lowercase();

    let existing: Option<i64> = sqlx::query_scalar(r#"SELECT id FROM users WHERE email = $1"#)
        .bind(&email)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?;
    if existing.is_some() {
        return Err(email_taken());
    }

    let pw_hash = hash_password(&req.password)?;

    let user: UserOut = sqlx::query_as::<_, UserOut>(
        r#"
        INSERT INTO users (name, email, role, password)
        VALUES ($1, $2, $3, $4)
        RETURNING id, name, email, role
        "#,
    )
    .bind(req.name.trim())
    .bind(&email)
    .bind(role.as_str())
    .bind(&pw_hash)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match violated_constraint(&e) {
        // lost a race with an identical registration
        Some((ViolationKind::Unique, "users_email_key")) => email_taken(),
        _ => ApiError::db(e),
    })?;

    tracing::info!(user_id = user.id, role = %role, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn find_login(db: &sqlx::PgPool, email: &str) -> Result<Option<LoginRow>, ApiError> {
    sqlx::query_as::<_, LoginRow>("SELECT id, password FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(db)
        .await
        .map_err(ApiError::db)
}

pub async fn login_for_access_token(
    State(state): State<AppState>,
    ApiForm(form): ApiForm<TokenForm>,
) -> Result<Json<TokenResponse>, ApiError> {
    let email = form.username.trim().to_lowercase();
    if email.is_empty() || form.password.is_empty() {
        return Err(incorrect_login());
    }

    let user = find_login(&state.db, &email)
        .await?
        .ok_or_else(incorrect_login)?;

    if !verify_password(&form.password, &user.password) {
        tracing::info!(user_id = user.id, "rejected login");
        return Err(incorrect_login());
    }

    let access_token = generate_access_token();
    let expires_at = Utc::now() + Duration::hours(state.session_ttl_hours);

    sqlx::query(
        r#"
        INSERT INTO session_tokens
            (session_token_id, user_id, session_token_hash, expires_at)
        VALUES
            ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(hash_access_token(&access_token))
    .bind(expires_at)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
    }))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<UserOut>, ApiError> {
    let user: UserOut = sqlx::query_as::<_, UserOut>(
        r#"
        SELECT id, name, email, role
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::invalid_credentials)?;

    Ok(Json(user))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<StatusCode, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE session_tokens
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::invalid_credentials());
    }
    Ok(StatusCode::NO_CONTENT)
}
