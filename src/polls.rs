//! Poll lifecycle: creation, status derivation, results, history, and the
//! two deletion windows.
//!
//! Status is never advanced by a background job. Every read derives the
//! effective status from the stored value and the clock, and writes it
//! back only when it changed. Once a poll is closed it stays closed.

use std::{collections::HashMap, sync::Arc};

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;

use crate::{
    auth::{AuthPrincipal, Claims},
    error::AppError,
    models::{Poll, PollOption, PollStatus, Role, Vote},
    state::AppState,
};

/// Pure derivation from the stored status and the poll's time window.
/// `closed` is sticky: no clock input re-opens a closed poll.
pub fn derive_status(
    stored: PollStatus,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> PollStatus {
    if stored == PollStatus::Closed {
        return PollStatus::Closed;
    }
    if now > end {
        PollStatus::Closed
    } else if now >= start {
        PollStatus::Active
    } else {
        PollStatus::Pending
    }
}

/// Applies the derived status to the row, writing back only on change.
pub async fn refresh_status(
    pool: &SqlitePool,
    poll: &mut Poll,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let derived = derive_status(poll.status, poll.start_time, poll.end_time, now);
    if derived != poll.status {
        sqlx::query("UPDATE polls SET status = ? WHERE id = ?")
            .bind(derived)
            .bind(poll.id)
            .execute(pool)
            .await?;
        poll.status = derived;
    }
    Ok(())
}

pub async fn load_poll(pool: &SqlitePool, id: i64) -> Result<Poll, AppError> {
    sqlx::query_as::<_, Poll>("SELECT * FROM polls WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Poll not found".into()))
}

async fn load_options(pool: &SqlitePool, poll_id: i64) -> Result<Vec<PollOption>, sqlx::Error> {
    sqlx::query_as::<_, PollOption>(
        "SELECT * FROM options WHERE poll_id = ? ORDER BY option_index",
    )
    .bind(poll_id)
    .fetch_all(pool)
    .await
}

async fn count_votes_per_option(
    pool: &SqlitePool,
    poll_id: i64,
) -> Result<(HashMap<i64, i64>, i64), sqlx::Error> {
    let votes = sqlx::query_as::<_, Vote>("SELECT * FROM votes WHERE poll_id = ?")
        .bind(poll_id)
        .fetch_all(pool)
        .await?;

    let mut counts = HashMap::new();
    for vote in &votes {
        *counts.entry(vote.option_index).or_insert(0) += 1;
    }

    Ok((counts, votes.len() as i64))
}

/// Options may come in as bare strings or as objects with a description
/// and image reference.
#[derive(Deserialize)]
#[serde(untagged)]
pub enum OptionInput {
    Text(String),
    Full {
        text: String,
        description: Option<String>,
        #[serde(rename = "imageUrl")]
        image_url: Option<String>,
    },
}

impl OptionInput {
    fn into_parts(self) -> (String, Option<String>, Option<String>) {
        match self {
            OptionInput::Text(text) => (text, None, None),
            OptionInput::Full {
                text,
                description,
                image_url,
            } => (text, description, image_url),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub title: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub options: Vec<OptionInput>,
}

fn generate_poll_id(now: DateTime<Utc>) -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();

    format!("poll_{}_{random}", now.timestamp_millis())
}

/// Public-key-shaped string used purely as an on-chain identifier.
fn generate_blockchain_address() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    bs58::encode(bytes).into_string()
}

pub async fn create_poll_record(
    pool: &SqlitePool,
    creator: &Claims,
    req: CreatePollRequest,
    now: DateTime<Utc>,
) -> Result<Poll, AppError> {
    if creator.role != Role::Admin {
        return Err(AppError::Authorization("Only admins can create polls".into()));
    }
    if req.options.len() < 2 {
        return Err(AppError::Validation(
            "A poll requires at least 2 options".into(),
        ));
    }

    let status = derive_status(PollStatus::Pending, req.start_time, req.end_time, now);
    let external_id = generate_poll_id(now);
    let address = generate_blockchain_address();

    // Poll and options land together or not at all.
    let mut tx = pool.begin().await?;

    let id = sqlx::query(
        "INSERT INTO polls (poll_id, title, description, creator_id, blockchain_address,
                            start_time, end_time, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&external_id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(creator.id)
    .bind(&address)
    .bind(req.start_time)
    .bind(req.end_time)
    .bind(status)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    for (index, option) in req.options.into_iter().enumerate() {
        let (text, description, image_url) = option.into_parts();
        sqlx::query(
            "INSERT INTO options (poll_id, option_text, option_index, description, image_url)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(text)
        .bind(index as i64)
        .bind(description)
        .bind(image_url)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!("Created poll {external_id} ({status:?})");

    load_poll(pool, id).await
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionResult {
    pub option_text: String,
    pub option_index: i64,
    pub vote_count: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerEntry {
    pub option_text: String,
    pub option_index: i64,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub vote_count: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub end_time: DateTime<Utc>,
    pub total_votes: i64,
    pub winners: Vec<WinnerEntry>,
    pub is_tie: bool,
}

pub async fn compute_results(
    pool: &SqlitePool,
    poll: &Poll,
) -> Result<(Vec<OptionResult>, i64), AppError> {
    let options = load_options(pool, poll.id).await?;
    let (counts, total) = count_votes_per_option(pool, poll.id).await?;

    let results = options
        .into_iter()
        .map(|option| OptionResult {
            vote_count: counts.get(&option.option_index).copied().unwrap_or(0),
            option_text: option.option_text,
            option_index: option.option_index,
        })
        .collect();

    Ok((results, total))
}

/// Winner(s) of a closed poll: the option(s) holding the maximum vote
/// count. Ties are reported, not broken. A poll with no votes has no
/// winners.
pub async fn compute_history_entry(
    pool: &SqlitePool,
    poll: &Poll,
) -> Result<HistoryEntry, AppError> {
    let options = load_options(pool, poll.id).await?;
    let (counts, total) = count_votes_per_option(pool, poll.id).await?;

    let max_votes = counts.values().max().copied().unwrap_or(0);

    let winners: Vec<WinnerEntry> = options
        .into_iter()
        .filter(|option| counts.get(&option.option_index) == Some(&max_votes))
        .map(|option| WinnerEntry {
            vote_count: max_votes,
            option_text: option.option_text,
            option_index: option.option_index,
            description: option.description,
            image_url: option.image_url,
        })
        .collect();

    Ok(HistoryEntry {
        id: poll.id,
        title: poll.title.clone(),
        description: poll.description.clone(),
        end_time: poll.end_time,
        total_votes: total,
        is_tie: winners.len() > 1,
        winners,
    })
}

pub async fn delete_poll_record(
    pool: &SqlitePool,
    requester: &Claims,
    poll_id: i64,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let poll = load_poll(pool, poll_id).await?;

    if poll.creator_id != requester.id || requester.role != Role::Admin {
        return Err(AppError::Authorization(
            "You are not authorized to delete this poll".into(),
        ));
    }
    if now >= poll.start_time {
        return Err(AppError::Precondition(
            "Cannot delete a poll that has already started".into(),
        ));
    }

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM options WHERE poll_id = ?")
        .bind(poll.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM polls WHERE id = ?")
        .bind(poll.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("Deleted poll {} before start", poll.poll_id);

    Ok(())
}

/// Purge from history: removes a closed poll along with its votes and
/// options. Distinct from pre-start deletion.
pub async fn purge_closed_poll_record(
    pool: &SqlitePool,
    requester: &Claims,
    poll_id: i64,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let mut poll = load_poll(pool, poll_id).await?;
    refresh_status(pool, &mut poll, now).await?;

    if poll.creator_id != requester.id || requester.role != Role::Admin {
        return Err(AppError::Authorization(
            "You are not authorized to delete this poll".into(),
        ));
    }
    if poll.status != PollStatus::Closed {
        return Err(AppError::Precondition(
            "Can only delete closed polls from history".into(),
        ));
    }

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM votes WHERE poll_id = ?")
        .bind(poll.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM voting_tokens WHERE poll_id = ?")
        .bind(poll.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM options WHERE poll_id = ?")
        .bind(poll.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM polls WHERE id = ?")
        .bind(poll.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("Purged closed poll {} from history", poll.poll_id);

    Ok(())
}

pub async fn create_poll(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(claims): AuthPrincipal,
    Json(req): Json<CreatePollRequest>,
) -> Result<impl IntoResponse, AppError> {
    let poll = create_poll_record(&state.pool, &claims, req, Utc::now()).await?;
    let options = load_options(&state.pool, poll.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "poll": poll, "options": options })),
    ))
}

pub async fn list_polls(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let mut polls = sqlx::query_as::<_, Poll>("SELECT * FROM polls ORDER BY created_at DESC")
        .fetch_all(&state.pool)
        .await?;

    let mut out = Vec::with_capacity(polls.len());
    for poll in &mut polls {
        refresh_status(&state.pool, poll, now).await?;
        let options = load_options(&state.pool, poll.id).await?;
        let mut value = serde_json::to_value(&*poll).map_err(|e| AppError::Internal(e.to_string()))?;
        value["options"] = serde_json::to_value(options).map_err(|e| AppError::Internal(e.to_string()))?;
        out.push(value);
    }

    Ok(Json(json!({ "success": true, "polls": out })))
}

pub async fn get_poll(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let mut poll = load_poll(&state.pool, id).await?;
    refresh_status(&state.pool, &mut poll, now).await?;

    let options = load_options(&state.pool, poll.id).await?;
    let (_, vote_count) = count_votes_per_option(&state.pool, poll.id).await?;

    let mut value = serde_json::to_value(&poll).map_err(|e| AppError::Internal(e.to_string()))?;
    value["options"] = serde_json::to_value(options).map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(json!({ "success": true, "poll": value, "voteCount": vote_count })))
}

pub async fn poll_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let poll = load_poll(&state.pool, id).await?;
    let (results, total) = compute_results(&state.pool, &poll).await?;

    Ok(Json(json!({
        "success": true,
        "poll": {
            "id": poll.id,
            "title": poll.title,
            "description": poll.description,
            "totalVotes": total,
        },
        "results": results,
    })))
}

pub async fn poll_history(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let closed = sqlx::query_as::<_, Poll>(
        "SELECT * FROM polls WHERE status = 'closed' ORDER BY end_time DESC",
    )
    .fetch_all(&state.pool)
    .await?;

    let mut history = Vec::with_capacity(closed.len());
    for poll in &closed {
        history.push(compute_history_entry(&state.pool, poll).await?);
    }

    Ok(Json(json!({ "success": true, "history": history })))
}

pub async fn delete_poll(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(claims): AuthPrincipal,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    delete_poll_record(&state.pool, &claims, id, Utc::now()).await?;

    Ok(Json(json!({ "success": true, "message": "Poll deleted successfully" })))
}

pub async fn purge_closed_poll(
    State(state): State<Arc<AppState>>,
    AuthPrincipal(claims): AuthPrincipal,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    purge_closed_poll_record(&state.pool, &claims, id, Utc::now()).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Poll deleted from history successfully",
    })))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{
        database::test_pool,
        testutil::{admin_claims, seed_admin, seed_poll, voter_claims},
    };

    fn t() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn derivation_follows_time_window() {
        let start = t() + Duration::hours(1);
        let end = t() + Duration::hours(2);

        let d = |now| derive_status(PollStatus::Pending, start, end, now);

        assert_eq!(d(t()), PollStatus::Pending);
        assert_eq!(d(start), PollStatus::Active);
        assert_eq!(d(start + Duration::minutes(30)), PollStatus::Active);
        assert_eq!(d(end), PollStatus::Active);
        assert_eq!(d(end + Duration::seconds(1)), PollStatus::Closed);
    }

    #[test]
    fn closed_is_sticky() {
        let start = t() + Duration::hours(1);
        let end = t() + Duration::hours(2);

        // Stored closed never re-opens, whatever the clock says.
        for now in [t(), start + Duration::minutes(5), end + Duration::hours(1)] {
            assert_eq!(
                derive_status(PollStatus::Closed, start, end, now),
                PollStatus::Closed
            );
        }
    }

    #[tokio::test]
    async fn status_progression_is_persisted() {
        let pool = test_pool().await;
        let admin = seed_admin(&pool, "a@test").await;

        let created_at = t();
        let mut poll = seed_poll(
            &pool,
            admin,
            created_at + Duration::hours(1),
            created_at + Duration::hours(2),
            PollStatus::Pending,
        )
        .await;

        refresh_status(&pool, &mut poll, created_at + Duration::minutes(90))
            .await
            .unwrap();
        assert_eq!(poll.status, PollStatus::Active);

        let stored = load_poll(&pool, poll.id).await.unwrap();
        assert_eq!(stored.status, PollStatus::Active);

        refresh_status(&pool, &mut poll, created_at + Duration::hours(3))
            .await
            .unwrap();
        assert_eq!(poll.status, PollStatus::Closed);

        let mut stored = load_poll(&pool, poll.id).await.unwrap();
        assert_eq!(stored.status, PollStatus::Closed);

        // Re-reading at an in-window time does not re-open it.
        refresh_status(&pool, &mut stored, created_at + Duration::minutes(90))
            .await
            .unwrap();
        assert_eq!(stored.status, PollStatus::Closed);
    }

    #[tokio::test]
    async fn creation_validates_role_and_option_count() {
        let pool = test_pool().await;
        let admin = seed_admin(&pool, "a@test").await;

        let request = |options: Vec<OptionInput>| CreatePollRequest {
            title: "T".into(),
            description: "D".into(),
            start_time: t() + Duration::hours(1),
            end_time: t() + Duration::hours(2),
            options,
        };

        let too_few = request(vec![OptionInput::Text("only".into())]);
        assert!(matches!(
            create_poll_record(&pool, &admin_claims(admin), too_few, t()).await,
            Err(AppError::Validation(_))
        ));

        let ok = request(vec![
            OptionInput::Text("A".into()),
            OptionInput::Text("B".into()),
        ]);
        assert!(matches!(
            create_poll_record(&pool, &voter_claims(1, "VID-X"), ok, t()).await,
            Err(AppError::Authorization(_))
        ));

        let ok = request(vec![
            OptionInput::Text("A".into()),
            OptionInput::Text("B".into()),
        ]);
        let poll = create_poll_record(&pool, &admin_claims(admin), ok, t())
            .await
            .unwrap();
        assert_eq!(poll.status, PollStatus::Pending);
        assert!(poll.poll_id.starts_with("poll_"));
        assert!(!poll.blockchain_address.is_empty());

        let options = load_options(&pool, poll.id).await.unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].option_index, 0);
        assert_eq!(options[1].option_index, 1);
    }

    #[tokio::test]
    async fn deletion_only_before_start_and_by_creator() {
        let pool = test_pool().await;
        let creator = seed_admin(&pool, "a@test").await;
        let other = seed_admin(&pool, "b@test").await;

        let poll = seed_poll(
            &pool,
            creator,
            t() + Duration::hours(1),
            t() + Duration::hours(2),
            PollStatus::Pending,
        )
        .await;

        assert!(matches!(
            delete_poll_record(&pool, &admin_claims(other), poll.id, t()).await,
            Err(AppError::Authorization(_))
        ));

        delete_poll_record(&pool, &admin_claims(creator), poll.id, t())
            .await
            .unwrap();
        assert!(matches!(
            load_poll(&pool, poll.id).await,
            Err(AppError::NotFound(_))
        ));

        let started = seed_poll(
            &pool,
            creator,
            t() - Duration::hours(1),
            t() + Duration::hours(1),
            PollStatus::Active,
        )
        .await;
        assert!(matches!(
            delete_poll_record(&pool, &admin_claims(creator), started.id, t()).await,
            Err(AppError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn purge_requires_closed_and_cascades() {
        let pool = test_pool().await;
        let creator = seed_admin(&pool, "a@test").await;

        let active = seed_poll(
            &pool,
            creator,
            t() - Duration::hours(1),
            t() + Duration::hours(1),
            PollStatus::Active,
        )
        .await;
        assert!(matches!(
            purge_closed_poll_record(&pool, &admin_claims(creator), active.id, t()).await,
            Err(AppError::Precondition(_))
        ));

        let closed = seed_poll(
            &pool,
            creator,
            t() - Duration::hours(2),
            t() - Duration::hours(1),
            PollStatus::Closed,
        )
        .await;
        sqlx::query(
            "INSERT INTO votes (poll_id, principal_role, principal_id, option_index,
                                transaction_signature, wallet_address, created_at)
             VALUES (?, 'admin', ?, 0, 'sig-1', 'w', ?)",
        )
        .bind(closed.id)
        .bind(creator)
        .bind(t())
        .execute(&pool)
        .await
        .unwrap();

        purge_closed_poll_record(&pool, &admin_claims(creator), closed.id, t())
            .await
            .unwrap();

        let votes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE poll_id = ?")
            .bind(closed.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        let options: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM options WHERE poll_id = ?")
            .bind(closed.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(votes, 0);
        assert_eq!(options, 0);
        assert!(matches!(
            load_poll(&pool, closed.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn history_reports_ties_explicitly() {
        let pool = test_pool().await;
        let creator = seed_admin(&pool, "a@test").await;

        let poll = seed_poll(
            &pool,
            creator,
            t() - Duration::hours(2),
            t() - Duration::hours(1),
            PollStatus::Closed,
        )
        .await;

        for (principal, option) in [(1_i64, 0_i64), (2, 0), (3, 1), (4, 1)] {
            sqlx::query(
                "INSERT INTO votes (poll_id, principal_role, principal_id, option_index,
                                    transaction_signature, wallet_address, created_at)
                 VALUES (?, 'voter', ?, ?, ?, 'w', ?)",
            )
            .bind(poll.id)
            .bind(principal)
            .bind(option)
            .bind(format!("sig-{principal}"))
            .bind(t())
            .execute(&pool)
            .await
            .unwrap();
        }

        let entry = compute_history_entry(&pool, &poll).await.unwrap();
        assert_eq!(entry.total_votes, 4);
        assert!(entry.is_tie);
        assert_eq!(entry.winners.len(), 2);
        assert!(entry.winners.iter().all(|w| w.vote_count == 2));
    }

    #[tokio::test]
    async fn history_without_votes_has_no_winner() {
        let pool = test_pool().await;
        let creator = seed_admin(&pool, "a@test").await;

        let poll = seed_poll(
            &pool,
            creator,
            t() - Duration::hours(2),
            t() - Duration::hours(1),
            PollStatus::Closed,
        )
        .await;

        let entry = compute_history_entry(&pool, &poll).await.unwrap();
        assert_eq!(entry.total_votes, 0);
        assert!(entry.winners.is_empty());
        assert!(!entry.is_tie);
    }

    #[tokio::test]
    async fn results_count_per_option() {
        let pool = test_pool().await;
        let creator = seed_admin(&pool, "a@test").await;

        let poll = seed_poll(
            &pool,
            creator,
            t() - Duration::hours(1),
            t() + Duration::hours(1),
            PollStatus::Active,
        )
        .await;

        for (principal, option) in [(1_i64, 0_i64), (2, 0), (3, 1)] {
            sqlx::query(
                "INSERT INTO votes (poll_id, principal_role, principal_id, option_index,
                                    transaction_signature, wallet_address, created_at)
                 VALUES (?, 'voter', ?, ?, ?, 'w', ?)",
            )
            .bind(poll.id)
            .bind(principal)
            .bind(option)
            .bind(format!("sig-{principal}"))
            .bind(t())
            .execute(&pool)
            .await
            .unwrap();
        }

        let (results, total) = compute_results(&pool, &poll).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(results[0].vote_count, 2);
        assert_eq!(results[1].vote_count, 1);
    }
}
