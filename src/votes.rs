//! Vote casting.
//!
//! Local checks run first, in a fixed order: poll exists, time window,
//! duplicate vote, token gating. Only then is the blockchain collaborator
//! asked to confirm the transaction, so requests that were going to fail
//! anyway never pay for the external call.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;

use crate::{
    auth::{AuthPrincipal, Claims},
    chain::{ChainError, ChainVerifier},
    error::{AppError, is_unique_violation},
    models::{Role, TokenStatus, Vote},
    polls::load_poll,
    state::AppState,
    tokens::{collect_on_vote, find_token},
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    pub poll_id: i64,
    pub option_index: i64,
    pub transaction_signature: String,
    pub wallet_address: String,
}

pub async fn cast_vote_record(
    pool: &SqlitePool,
    chain: &dyn ChainVerifier,
    principal: &Claims,
    req: CastVoteRequest,
    now: DateTime<Utc>,
) -> Result<Vote, AppError> {
    let poll = load_poll(pool, req.poll_id).await?;

    if now < poll.start_time {
        return Err(AppError::Precondition("Poll has not started yet".into()));
    }
    if now > poll.end_time {
        return Err(AppError::Precondition("Poll has ended".into()));
    }

    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM votes
         WHERE poll_id = ? AND principal_role = ? AND principal_id = ?",
    )
    .bind(poll.id)
    .bind(principal.role)
    .bind(principal.id)
    .fetch_one(pool)
    .await?;
    if existing > 0 {
        return Err(AppError::Conflict(
            "You have already voted in this poll".into(),
        ));
    }

    // Voter-role principals need a minted token; admins bypass the gate.
    if principal.role == Role::Voter {
        let token = find_token(pool, principal.id, poll.id).await?;
        match token {
            Some(token) if token.status == TokenStatus::Minted => {}
            _ => return Err(AppError::NoToken),
        }
    }

    chain
        .verify_transaction(&req.transaction_signature, &req.wallet_address)
        .await
        .map_err(|e| match e {
            ChainError::NotFound | ChainError::WrongSigner => AppError::Validation(e.to_string()),
            ChainError::Rpc(_) => {
                AppError::Validation("Failed to verify blockchain transaction".into())
            }
        })?;

    let inserted = sqlx::query(
        "INSERT INTO votes (poll_id, principal_role, principal_id, option_index,
                            transaction_signature, wallet_address, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(poll.id)
    .bind(principal.role)
    .bind(principal.id)
    .bind(req.option_index)
    .bind(&req.transaction_signature)
    .bind(&req.wallet_address)
    .bind(now)
    .execute(pool)
    .await;

    let vote_id = match inserted {
        Ok(result) => result.last_insert_rowid(),
        // Signature reuse, or a concurrent vote winning the composite index.
        Err(e) if is_unique_violation(&e) => {
            return Err(AppError::Conflict(
                "Vote conflicts with an existing vote or reuses a transaction signature".into(),
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if principal.role == Role::Voter {
        collect_on_vote(pool, principal.id, poll.id, &req.transaction_signature, now).await?;
    }

    info!(
        "Vote recorded on poll {} by {:?} {}",
        poll.poll_id, principal.role, principal.id
    );

    sqlx::query_as::<_, Vote>("SELECT * FROM votes WHERE id = ?")
        .bind(vote_id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
}

pub async fn check_user_vote(
    pool: &SqlitePool,
    principal: &Claims,
    poll_id: i64,
) -> Result<Option<Vote>, sqlx::Error> {
    sqlx::query_as::<_, Vote>(
        "SELECT * FROM votes
         WHERE poll_id = ? AND principal_role = ? AND principal_id = ?",
    )
    .bind(poll_id)
    .bind(principal.role)
    .bind(principal.id)
    .fetch_optional(pool)
    .await
}

pub async fn cast_vote(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(claims): AuthPrincipal,
    Json(req): Json<CastVoteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let vote = cast_vote_record(&state.pool, state.chain.as_ref(), &claims, req, Utc::now()).await?;

    let message = match claims.role {
        Role::Voter => "Vote cast successfully! Your token has been collected.",
        Role::Admin => "Vote cast successfully!",
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "vote": vote, "message": message })),
    ))
}

pub async fn vote_status(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(claims): AuthPrincipal,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let vote = check_user_vote(&state.pool, &claims, id).await?;

    Ok(Json(json!({
        "success": true,
        "hasVoted": vote.is_some(),
        "vote": vote.map(|v| json!({
            "optionIndex": v.option_index,
            "createdAt": v.created_at,
            "transactionSignature": v.transaction_signature,
        })),
    })))
}

/// Public audit endpoint: looks a signature up on chain and surfaces its
/// confirmation state plus any JSON memo payload it carries.
pub async fn verify_on_chain(
    State(state): State<Arc<AppState>>,
    Path(signature): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state
        .chain
        .fetch_transaction(&signature)
        .await
        .map_err(|e| AppError::External(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("Transaction not found on blockchain".into()))?;

    Ok(Json(json!({
        "success": true,
        "transaction": {
            "signature": signature,
            "blockTime": tx.block_time,
            "slot": tx.slot,
            "status": if tx.confirmed { "confirmed" } else { "failed" },
            "voteData": tx.memo,
        },
    })))
}
