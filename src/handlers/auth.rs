use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use futures_util::future::LocalBoxFuture;
use serde_json::json;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{LoginRequest, RegisterRequest, Role, UpdateRoleRequest, User};
use crate::state::AppState;
use crate::util::non_empty;

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.user.id
    }

    pub fn require_staff(&self) -> Result<(), ApiError> {
        if self.user.role.is_staff() { Ok(()) } else { Err(ApiError::Forbidden) }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.user.role == Role::Admin { Ok(()) } else { Err(ApiError::Forbidden) }
    }
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get("Authorization")?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token.to_string()) }
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();
        let token = bearer_token(req);

        Box::pin(async move {
            let state = state.ok_or_else(|| ApiError::Internal("application state missing".into()))?;
            let token = token.ok_or(ApiError::Unauthorized)?;
            let user = resolve_session(&state.pool, &token).await?;
            Ok(AuthUser { user, token })
        })
    }
}

async fn resolve_session(pool: &SqlitePool, token: &str) -> Result<User, ApiError> {
    let row = sqlx::query("SELECT user_id, expires_at FROM sessions WHERE token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let expires_at = row.get::<String, _>("expires_at");
    let expired = DateTime::parse_from_rfc3339(&expires_at)
        .map(|t| t.with_timezone(&Utc) <= Utc::now())
        .unwrap_or(true);
    if expired {
        let _ = sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(pool)
            .await;
        return Err(ApiError::Unauthorized);
    }

    let user_id = row.get::<String, _>("user_id");
    let sql = format!("SELECT {} FROM users WHERE id = ? LIMIT 1", User::COLUMNS);
    let user_row = sqlx::query(&sql)
        .bind(&user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::Unauthorized)?;
    User::from_row(&user_row)
}

async fn hash_password(password: String, cost: u32) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ApiError::Internal(format!("hashing task failed: {}", e)))?
        .map_err(ApiError::from)
}

async fn verify_password(password: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

async fn create_session(pool: &SqlitePool, user_id: &str, ttl_days: i64) -> Result<String, ApiError> {
    let token = Uuid::new_v4().to_string();
    let now = Utc::now();
    let expires_at = now + chrono::Duration::days(ttl_days);

    sqlx::query(
        "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)"
    )
    .bind(&token)
    .bind(user_id)
    .bind(now.to_rfc3339())
    .bind(expires_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(token)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

pub async fn register(
    data: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let req = data.into_inner();
    let pool = &state.pool;
    let email = normalize_email(&req.email);

    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(ApiError::validation("email address is invalid"));
    }
    if req.password.chars().count() < 6 {
        return Err(ApiError::validation("password must be at least 6 characters"));
    }

    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM users WHERE email = ?")
        .bind(&email)
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Err(ApiError::validation("User already exists"));
    }

    let role = if state.config.is_admin_email(&email) { Role::Admin } else { Role::Customer };
    let user = User {
        id: Uuid::new_v4().to_string(),
        email,
        password: hash_password(req.password, state.config.bcrypt_cost).await?,
        role,
        full_name: non_empty(req.full_name),
        phone: non_empty(req.phone),
        branch: non_empty(req.branch),
        created_at: Utc::now().to_rfc3339(),
    };

    sqlx::query(
        "INSERT INTO users (id, email, password, role, full_name, phone, branch, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(&user.password)
    .bind(user.role.as_str())
    .bind(&user.full_name)
    .bind(&user.phone)
    .bind(&user.branch)
    .bind(&user.created_at)
    .execute(pool)
    .await?;

    let token = create_session(pool, &user.id, state.config.session_ttl_days).await?;
    tracing::info!(user_id = %user.id, role = %user.role, "user registered");

    Ok(HttpResponse::Created().json(json!({
        "message": "User registered successfully",
        "user": user,
        "token": token
    })))
}

pub async fn login(
    data: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let req = data.into_inner();
    let pool = &state.pool;

    let sql = format!("SELECT {} FROM users WHERE email = ? LIMIT 1", User::COLUMNS);
    let row = sqlx::query(&sql)
        .bind(normalize_email(&req.email))
        .fetch_optional(pool)
        .await?;

    let user = match row {
        Some(r) => User::from_row(&r)?,
        None => return Err(ApiError::InvalidCredentials),
    };

    if !verify_password(req.password, user.password.clone()).await {
        tracing::warn!(user_id = %user.id, "rejected login");
        return Err(ApiError::InvalidCredentials);
    }

    let token = create_session(pool, &user.id, state.config.session_ttl_days).await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Login successful",
        "user": user,
        "token": token
    })))
}

pub async fn me(auth: AuthUser) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "user": auth.user }))
}

pub async fn logout(auth: AuthUser, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(&auth.token)
        .execute(&state.pool)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "status": "logged_out" })))
}

pub async fn list_users(auth: AuthUser, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;

    let sql = format!("SELECT {} FROM users ORDER BY created_at ASC", User::COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(&state.pool).await?;
    let users = rows.iter().map(User::from_row).collect::<Result<Vec<_>, _>>()?;

    Ok(HttpResponse::Ok().json(json!({ "users": users, "count": users.len() })))
}

pub async fn update_role(
    auth: AuthUser,
    path: web::Path<String>,
    body: web::Json<UpdateRoleRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let user_id = path.into_inner();
    let role = body.into_inner().role;

    if user_id == auth.id() && role != Role::Admin {
        return Err(ApiError::conflict("admins cannot demote themselves"));
    }

    let result = sqlx::query("UPDATE users SET role = ? WHERE id = ?")
        .bind(role.as_str())
        .bind(&user_id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("user"));
    }

    tracing::info!(user_id = %user_id, role = %role, by = %auth.id(), "role changed");
    Ok(HttpResponse::Ok().json(json!({ "status": "updated", "user_id": user_id, "role": role })))
}
