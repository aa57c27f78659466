//! Row types and enums shared across the handler modules.
//!
//! Enums are stored as lowercase TEXT in SQLite and serialized the same way
//! over the wire, so a row read back from the database and a JSON payload
//! agree on the discriminant.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Voter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Pending,
    Active,
    Closed,
}

/// `Used` is part of the stored enumeration but no transition assigns it;
/// tokens go straight from `Minted` to `Collected` when the vote lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Minted,
    Used,
    Collected,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Admin {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub wallet_address: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Voter {
    pub id: i64,
    /// Human-shareable login code, `VID-<yyyymmdd>-<5 random chars>`.
    pub voter_id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub national_id_hash: String,
    #[serde(skip_serializing)]
    pub national_id_digest: String,
    pub issue_date: NaiveDate,
    pub wallet_address: String,
    pub is_eligible: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: i64,
    /// External identifier, `poll_<millis>_<random>`.
    pub poll_id: String,
    pub title: String,
    pub description: String,
    pub creator_id: i64,
    /// Public-key-shaped on-chain identifier; not a live wallet.
    pub blockchain_address: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: PollStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub id: i64,
    pub poll_id: i64,
    pub option_text: String,
    pub option_index: i64,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: i64,
    pub poll_id: i64,
    pub principal_role: Role,
    pub principal_id: i64,
    pub option_index: i64,
    pub transaction_signature: String,
    pub wallet_address: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VotingToken {
    pub id: i64,
    /// `VT-<poll external id>-<voter id>-<mint millis>`.
    pub token_id: String,
    pub voter_id: i64,
    pub voter_wallet_address: String,
    pub poll_id: i64,
    pub status: TokenStatus,
    pub minted_by: i64,
    pub mint_transaction_signature: String,
    pub transfer_transaction_signature: Option<String>,
    pub minted_at: DateTime<Utc>,
    pub collected_at: Option<DateTime<Utc>>,
}
