//! Voting-token lifecycle.
//!
//! An admin mints at most one token per eligible voter per poll. A token
//! moves from `minted` to `collected` exactly once, at the moment its
//! voter's vote for that poll is recorded. Minting is a sequential,
//! per-voter loop: voters who already hold a token are reported in the
//! partial-success summary, never rolled back, so retrying a crashed mint
//! is idempotent.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::{
    auth::{AuthPrincipal, Claims},
    error::{AppError, is_unique_violation},
    models::{Role, TokenStatus, Voter, VotingToken},
    polls::load_poll,
    state::AppState,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintedTokenEntry {
    pub token_id: String,
    pub voter_id: String,
    pub voter_wallet: String,
    pub transaction_signature: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintErrorEntry {
    pub voter_id: String,
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintSummary {
    pub total_voters: usize,
    pub successful_mints: usize,
    pub failed_mints: usize,
    pub minted_tokens: Vec<MintedTokenEntry>,
    pub errors: Vec<MintErrorEntry>,
}

/// Placeholder for the on-chain mint transaction.
fn mock_mint_signature(now: DateTime<Utc>) -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(13)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();

    format!("{}-{random}", now.timestamp_millis())
}

pub async fn mint_tokens_for_poll(
    pool: &SqlitePool,
    admin: &Claims,
    poll_id: i64,
    now: DateTime<Utc>,
) -> Result<MintSummary, AppError> {
    if admin.role != Role::Admin {
        return Err(AppError::Authorization("Only admins can mint tokens".into()));
    }

    let poll = load_poll(pool, poll_id).await?;

    let voters = sqlx::query_as::<_, Voter>("SELECT * FROM voters WHERE is_eligible = 1")
        .fetch_all(pool)
        .await?;

    if voters.is_empty() {
        return Err(AppError::Validation("No eligible voters found".into()));
    }

    let mut minted_tokens = Vec::new();
    let mut errors = Vec::new();

    for voter in &voters {
        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM voting_tokens WHERE voter_id = ? AND poll_id = ?",
        )
        .bind(voter.id)
        .bind(poll.id)
        .fetch_one(pool)
        .await?;

        if existing > 0 {
            errors.push(MintErrorEntry {
                voter_id: voter.voter_id.clone(),
                message: "Token already minted for this poll".into(),
            });
            continue;
        }

        let token_id = format!(
            "VT-{}-{}-{}",
            poll.poll_id,
            voter.voter_id,
            now.timestamp_millis()
        );
        let signature = mock_mint_signature(now);

        let inserted = sqlx::query(
            "INSERT INTO voting_tokens (token_id, voter_id, voter_wallet_address, poll_id,
                                        status, minted_by, mint_transaction_signature,
                                        minted_at)
             VALUES (?, ?, ?, ?, 'minted', ?, ?, ?)",
        )
        .bind(&token_id)
        .bind(voter.id)
        .bind(&voter.wallet_address)
        .bind(poll.id)
        .bind(admin.id)
        .bind(&signature)
        .bind(now)
        .execute(pool)
        .await;

        match inserted {
            Ok(_) => minted_tokens.push(MintedTokenEntry {
                token_id,
                voter_id: voter.voter_id.clone(),
                voter_wallet: voter.wallet_address.clone(),
                transaction_signature: signature,
            }),
            // A concurrent mint can win the (voter, poll) index race.
            Err(e) if is_unique_violation(&e) => errors.push(MintErrorEntry {
                voter_id: voter.voter_id.clone(),
                message: "Token already minted for this poll".into(),
            }),
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        "Minted {} tokens for poll {} ({} skipped)",
        minted_tokens.len(),
        poll.poll_id,
        errors.len()
    );

    Ok(MintSummary {
        total_voters: voters.len(),
        successful_mints: minted_tokens.len(),
        failed_mints: errors.len(),
        minted_tokens,
        errors,
    })
}

pub async fn find_token(
    pool: &SqlitePool,
    voter_id: i64,
    poll_id: i64,
) -> Result<Option<VotingToken>, sqlx::Error> {
    sqlx::query_as::<_, VotingToken>(
        "SELECT * FROM voting_tokens WHERE voter_id = ? AND poll_id = ?",
    )
    .bind(voter_id)
    .bind(poll_id)
    .fetch_optional(pool)
    .await
}

/// Collects the voter's minted token as part of vote casting, stamping the
/// vote's transaction signature. Returns `false` when no minted token
/// exists, which the vote flow has already ruled out; the mismatch is
/// logged, not surfaced.
pub async fn collect_on_vote(
    pool: &SqlitePool,
    voter_id: i64,
    poll_id: i64,
    transaction_signature: &str,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE voting_tokens
         SET status = 'collected', collected_at = ?, transfer_transaction_signature = ?
         WHERE voter_id = ? AND poll_id = ? AND status = 'minted'",
    )
    .bind(now)
    .bind(transaction_signature)
    .bind(voter_id)
    .bind(poll_id)
    .execute(pool)
    .await?
    .rows_affected();

    if updated == 0 {
        warn!("No minted token to collect for voter {voter_id} on poll {poll_id}");
        return Ok(false);
    }

    Ok(true)
}

pub async fn mint_for_poll(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(claims): AuthPrincipal,
    Path(poll_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let summary = mint_tokens_for_poll(&state.pool, &claims, poll_id, Utc::now()).await?;

    Ok(Json(json!({
        "message": "Token minting completed",
        "totalVoters": summary.total_voters,
        "successfulMints": summary.successful_mints,
        "failedMints": summary.failed_mints,
        "mintedTokens": summary.minted_tokens,
        "errors": summary.errors,
    })))
}

#[derive(Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PollTokenRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub token: VotingToken,
    pub voter_code: String,
    pub voter_username: String,
    pub voter_email: String,
}

pub async fn poll_tokens(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(claims): AuthPrincipal,
    Path(poll_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if claims.role != Role::Admin {
        return Err(AppError::Authorization(
            "Only admins can view poll tokens".into(),
        ));
    }

    let tokens = sqlx::query_as::<_, PollTokenRow>(
        "SELECT t.*, v.voter_id AS voter_code, v.username AS voter_username,
                v.email AS voter_email
         FROM voting_tokens t
         JOIN voters v ON v.id = t.voter_id
         WHERE t.poll_id = ?
         ORDER BY t.minted_at DESC",
    )
    .bind(poll_id)
    .fetch_all(&state.pool)
    .await?;

    let count = |status| tokens.iter().filter(|t| t.token.status == status).count();
    let minted = count(TokenStatus::Minted);
    let used = count(TokenStatus::Used);
    let collected = count(TokenStatus::Collected);

    Ok(Json(json!({
        "summary": {
            "total": tokens.len(),
            "minted": minted,
            "used": used,
            "collected": collected,
        },
        "tokens": tokens,
    })))
}

#[derive(Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MyTokenRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub token: VotingToken,
    pub poll_title: String,
    pub poll_external_id: String,
    pub poll_status: String,
}

pub async fn my_tokens(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(claims): AuthPrincipal,
) -> Result<impl IntoResponse, AppError> {
    if claims.role != Role::Voter {
        return Err(AppError::Authorization(
            "Only voters can view their tokens".into(),
        ));
    }

    let tokens = sqlx::query_as::<_, MyTokenRow>(
        "SELECT t.*, p.title AS poll_title, p.poll_id AS poll_external_id,
                p.status AS poll_status
         FROM voting_tokens t
         JOIN polls p ON p.id = t.poll_id
         WHERE t.voter_id = ?
         ORDER BY t.minted_at DESC",
    )
    .bind(claims.id)
    .fetch_all(&state.pool)
    .await?;

    let available = tokens
        .iter()
        .filter(|t| t.token.status == TokenStatus::Minted)
        .count();
    let used = tokens
        .iter()
        .filter(|t| t.token.status == TokenStatus::Collected)
        .count();

    Ok(Json(json!({
        "total": tokens.len(),
        "available": available,
        "used": used,
        "tokens": tokens,
    })))
}

pub async fn token_status(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(claims): AuthPrincipal,
    Path(poll_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if claims.role != Role::Voter {
        return Err(AppError::Authorization(
            "Only voters can check token status".into(),
        ));
    }

    let Some(token) = find_token(&state.pool, claims.id, poll_id).await? else {
        return Ok(Json(json!({
            "hasToken": false,
            "canVote": false,
            "message": "No token found for this poll",
        })));
    };

    Ok(Json(json!({
        "hasToken": true,
        "tokenId": token.token_id,
        "status": token.status,
        "canVote": token.status == TokenStatus::Minted,
        "mintedAt": token.minted_at,
        "collectedAt": token.collected_at,
        "transactionSignature": token.mint_transaction_signature,
    })))
}
