//! Identity and credential handling for the two principal kinds.
//!
//! Admins authenticate with email and password. Voters authenticate with
//! their generated voter ID, national identification number, and its issue
//! date. Both receive a 7-day bearer credential. Login failures are
//! deliberately undifferentiated so callers cannot probe which field was
//! wrong.

use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRequestParts, State},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::IntoResponse,
};
use chrono::{Duration, NaiveDate, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::info;

use crate::{
    error::AppError,
    models::{Admin, Role, Voter},
    state::AppState,
};

const PASSWORD_SYMBOLS: &str = "@$!%*?&#";
const CREDENTIAL_TTL_DAYS: i64 = 7;

pub const PASSWORD_POLICY_MESSAGE: &str = "Password must be at least 8 characters long and \
    contain at least 1 uppercase letter, 1 lowercase letter, 1 number, and 1 special \
    character (@$!%*?&#)";

/// Minimum 8 chars, one upper, one lower, one digit, one symbol from the
/// fixed set, and nothing outside those character classes.
pub fn password_meets_policy(password: &str) -> bool {
    password.len() >= 8
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SYMBOLS.contains(c))
        && password
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SYMBOLS.contains(c))
}

/// National identification numbers are 5 to 20 ASCII digits.
pub fn valid_national_id(national_id: &str) -> bool {
    (5..=20).contains(&national_id.len()) && national_id.chars().all(|c| c.is_ascii_digit())
}

/// `VID-<yyyymmdd>-<5 random uppercase alphanumerics>`.
fn generate_voter_id(date: NaiveDate) -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(char::from)
        .collect::<String>()
        .to_uppercase();

    format!("VID-{}-{random}", date.format("%Y%m%d"))
}

/// Deterministic digest used only for the uniqueness index; the salted
/// bcrypt hash is what login compares against.
fn national_id_digest(national_id: &str) -> String {
    let digest = Sha256::digest(national_id.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: i64,
    pub email: String,
    pub role: Role,
    #[serde(
        rename = "voterId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub voter_id: Option<String>,
    pub exp: i64,
}

pub fn sign_credential(
    id: i64,
    email: &str,
    role: Role,
    voter_id: Option<String>,
    secret: &str,
) -> Result<String, AppError> {
    let claims = Claims {
        id,
        email: email.to_string(),
        role,
        voter_id,
        exp: (Utc::now() + Duration::days(CREDENTIAL_TTL_DAYS)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(e.to_string()))
}

pub fn verify_credential(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Authentication("Token is not valid".into()))
}

/// Authenticated principal, extracted from the `Authorization` header.
/// Downstream handlers see only the decoded claims, never raw secrets.
pub struct AuthPrincipal(pub Claims);

impl FromRequestParts<Arc<AppState>> for AuthPrincipal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::Authentication("No token, authorization denied".into()))?;

        let claims = verify_credential(token, &state.config.jwt_secret)?;

        Ok(AuthPrincipal(claims))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub role: Role,
    pub username: String,
    pub email: String,
    pub password: String,
    pub wallet_address: String,
    pub national_id: Option<String>,
    pub issue_date: Option<NaiveDate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub role: Role,
    pub email: Option<String>,
    pub password: Option<String>,
    pub voter_id: Option<String>,
    pub national_id: Option<String>,
    pub issue_date: Option<NaiveDate>,
}

async fn wallet_taken(pool: &SqlitePool, wallet: &str) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT (SELECT COUNT(*) FROM admins WHERE wallet_address = ?1)
              + (SELECT COUNT(*) FROM voters WHERE wallet_address = ?1)",
    )
    .bind(wallet)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

async fn email_taken(pool: &SqlitePool, email: &str) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT (SELECT COUNT(*) FROM admins WHERE email = ?1)
              + (SELECT COUNT(*) FROM voters WHERE email = ?1)",
    )
    .bind(email)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

pub async fn register_principal(
    pool: &SqlitePool,
    jwt_secret: &str,
    req: RegisterRequest,
) -> Result<(String, Value), AppError> {
    if !password_meets_policy(&req.password) {
        return Err(AppError::Validation(PASSWORD_POLICY_MESSAGE.into()));
    }

    if req.wallet_address.trim().is_empty() {
        return Err(AppError::Validation("Wallet address is required".into()));
    }

    // Wallet and email must be unique across both principal kinds.
    if wallet_taken(pool, &req.wallet_address).await? {
        return Err(AppError::Conflict(
            "Wallet address is already registered".into(),
        ));
    }
    if email_taken(pool, &req.email).await? {
        return Err(AppError::Conflict("Email is already registered".into()));
    }

    match req.role {
        Role::Admin => register_admin(pool, jwt_secret, req).await,
        Role::Voter => register_voter(pool, jwt_secret, req).await,
    }
}

async fn register_admin(
    pool: &SqlitePool,
    jwt_secret: &str,
    req: RegisterRequest,
) -> Result<(String, Value), AppError> {
    let password_hash = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST)?;

    let id = sqlx::query(
        "INSERT INTO admins (username, email, password_hash, wallet_address, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&req.username)
    .bind(&req.email)
    .bind(&password_hash)
    .bind(&req.wallet_address)
    .bind(Utc::now())
    .execute(pool)
    .await?
    .last_insert_rowid();

    let token = sign_credential(id, &req.email, Role::Admin, None, jwt_secret)?;

    info!("Registered admin {id}");

    let user = json!({
        "id": id,
        "username": req.username,
        "email": req.email,
        "walletAddress": req.wallet_address,
        "role": Role::Admin,
    });

    Ok((token, user))
}

async fn register_voter(
    pool: &SqlitePool,
    jwt_secret: &str,
    req: RegisterRequest,
) -> Result<(String, Value), AppError> {
    let (Some(national_id), Some(issue_date)) = (req.national_id, req.issue_date) else {
        return Err(AppError::Validation(
            "National ID and issue date are required for voters".into(),
        ));
    };

    if !valid_national_id(&national_id) {
        return Err(AppError::Validation("National ID must be 5-20 digits".into()));
    }

    let digest = national_id_digest(&national_id);

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM voters WHERE national_id_digest = ?")
        .bind(&digest)
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Err(AppError::Conflict(
            "National ID is already registered".into(),
        ));
    }

    let password_hash = bcrypt::hash(&req.password, bcrypt::DEFAULT_COST)?;
    let national_id_hash = bcrypt::hash(&national_id, bcrypt::DEFAULT_COST)?;
    let voter_id = generate_voter_id(Utc::now().date_naive());

    let id = sqlx::query(
        "INSERT INTO voters (voter_id, username, email, password_hash, national_id_hash,
                             national_id_digest, issue_date, wallet_address, is_eligible,
                             created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
    )
    .bind(&voter_id)
    .bind(&req.username)
    .bind(&req.email)
    .bind(&password_hash)
    .bind(&national_id_hash)
    .bind(&digest)
    .bind(issue_date)
    .bind(&req.wallet_address)
    .bind(Utc::now())
    .execute(pool)
    .await?
    .last_insert_rowid();

    let token = sign_credential(id, &req.email, Role::Voter, Some(voter_id.clone()), jwt_secret)?;

    info!("Registered voter {id} as {voter_id}");

    let user = json!({
        "id": id,
        "voterId": voter_id,
        "username": req.username,
        "email": req.email,
        "walletAddress": req.wallet_address,
        "role": Role::Voter,
        "isEligible": true,
    });

    Ok((token, user))
}

fn invalid_credentials() -> AppError {
    AppError::Authentication("Invalid credentials".into())
}

pub async fn login_principal(
    pool: &SqlitePool,
    jwt_secret: &str,
    req: LoginRequest,
) -> Result<(String, Value), AppError> {
    match req.role {
        Role::Admin => {
            let (Some(email), Some(password)) = (req.email, req.password) else {
                return Err(AppError::Validation(
                    "Email and password are required".into(),
                ));
            };

            let admin = sqlx::query_as::<_, Admin>("SELECT * FROM admins WHERE email = ?")
                .bind(&email)
                .fetch_optional(pool)
                .await?
                .ok_or_else(invalid_credentials)?;

            if !bcrypt::verify(&password, &admin.password_hash)? {
                return Err(invalid_credentials());
            }

            let token = sign_credential(admin.id, &admin.email, Role::Admin, None, jwt_secret)?;
            let user = json!({
                "id": admin.id,
                "username": admin.username,
                "email": admin.email,
                "walletAddress": admin.wallet_address,
                "role": Role::Admin,
            });

            Ok((token, user))
        }
        Role::Voter => {
            let (Some(voter_id), Some(national_id), Some(issue_date)) =
                (req.voter_id, req.national_id, req.issue_date)
            else {
                return Err(AppError::Validation(
                    "Voter ID, national ID, and issue date are required".into(),
                ));
            };

            let voter = sqlx::query_as::<_, Voter>("SELECT * FROM voters WHERE voter_id = ?")
                .bind(&voter_id)
                .fetch_optional(pool)
                .await?
                .ok_or_else(invalid_credentials)?;

            if !bcrypt::verify(&national_id, &voter.national_id_hash)? {
                return Err(invalid_credentials());
            }

            // Calendar-date equality, not timestamp equality.
            if voter.issue_date != issue_date {
                return Err(invalid_credentials());
            }

            let token = sign_credential(
                voter.id,
                &voter.email,
                Role::Voter,
                Some(voter.voter_id.clone()),
                jwt_secret,
            )?;
            let user = json!({
                "id": voter.id,
                "voterId": voter.voter_id,
                "username": voter.username,
                "email": voter.email,
                "walletAddress": voter.wallet_address,
                "role": Role::Voter,
                "isEligible": voter.is_eligible,
            });

            Ok((token, user))
        }
    }
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (token, user) = register_principal(&state.pool, &state.config.jwt_secret, req).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "token": token, "user": user })),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (token, user) = login_principal(&state.pool, &state.config.jwt_secret, req).await?;

    Ok(Json(json!({ "success": true, "token": token, "user": user })))
}

async fn load_profile(pool: &SqlitePool, claims: &Claims) -> Result<Value, AppError> {
    match claims.role {
        Role::Admin => {
            let admin = sqlx::query_as::<_, Admin>("SELECT * FROM admins WHERE id = ?")
                .bind(claims.id)
                .fetch_optional(pool)
                .await?
                .ok_or_else(|| AppError::NotFound("User not found".into()))?;
            Ok(serde_json::to_value(admin).map_err(|e| AppError::Internal(e.to_string()))?)
        }
        Role::Voter => {
            let voter = sqlx::query_as::<_, Voter>("SELECT * FROM voters WHERE id = ?")
                .bind(claims.id)
                .fetch_optional(pool)
                .await?
                .ok_or_else(|| AppError::NotFound("User not found".into()))?;
            Ok(serde_json::to_value(voter).map_err(|e| AppError::Internal(e.to_string()))?)
        }
    }
}

pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(claims): AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    let user = load_profile(&state.pool, &claims).await?;

    Ok(Json(json!({ "success": true, "user": user })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub wallet_address: Option<String>,
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(claims): AuthPrincipal,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let table = match claims.role {
        Role::Admin => "admins",
        Role::Voter => "voters",
    };

    sqlx::query(&format!(
        "UPDATE {table} SET username = COALESCE(?, username),
                            wallet_address = COALESCE(?, wallet_address)
         WHERE id = ?"
    ))
    .bind(&req.username)
    .bind(&req.wallet_address)
    .bind(claims.id)
    .execute(&state.pool)
    .await?;

    let user = load_profile(&state.pool, &claims).await?;

    Ok(Json(json!({ "success": true, "user": user })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWalletRequest {
    pub wallet_address: String,
}

pub async fn update_wallet(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(claims): AuthPrincipal,
    Json(req): Json<UpdateWalletRequest>,
) -> Result<impl IntoResponse, AppError> {
    let table = match claims.role {
        Role::Admin => "admins",
        Role::Voter => "voters",
    };

    sqlx::query(&format!("UPDATE {table} SET wallet_address = ? WHERE id = ?"))
        .bind(&req.wallet_address)
        .bind(claims.id)
        .execute(&state.pool)
        .await?;

    Ok(Json(json!({ "success": true, "message": "Wallet address updated" })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(claims): AuthPrincipal,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let table = match claims.role {
        Role::Admin => "admins",
        Role::Voter => "voters",
    };

    let current_hash: Option<String> =
        sqlx::query_scalar(&format!("SELECT password_hash FROM {table} WHERE id = ?"))
            .bind(claims.id)
            .fetch_optional(&state.pool)
            .await?;
    let current_hash = current_hash.ok_or_else(|| AppError::NotFound("User not found".into()))?;

    if !bcrypt::verify(&req.current_password, &current_hash)? {
        return Err(AppError::Authentication(
            "Current password is incorrect".into(),
        ));
    }

    if !password_meets_policy(&req.new_password) {
        return Err(AppError::Validation(PASSWORD_POLICY_MESSAGE.into()));
    }

    let new_hash = bcrypt::hash(&req.new_password, bcrypt::DEFAULT_COST)?;

    sqlx::query(&format!("UPDATE {table} SET password_hash = ? WHERE id = ?"))
        .bind(&new_hash)
        .bind(claims.id)
        .execute(&state.pool)
        .await?;

    Ok(Json(json!({ "success": true, "message": "Password changed successfully" })))
}
