//! Shared fixtures for the handler test modules. Rows are inserted
//! directly so tests skip the bcrypt work in the registration path.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;

use crate::{
    auth::Claims,
    models::{Poll, PollStatus, Role},
};

pub async fn seed_admin(pool: &SqlitePool, email: &str) -> i64 {
    sqlx::query(
        "INSERT INTO admins (username, email, password_hash, wallet_address, created_at)
         VALUES (?, ?, 'x', ?, ?)",
    )
    .bind("admin")
    .bind(email)
    .bind(format!("wallet-{email}"))
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

pub async fn seed_voter(pool: &SqlitePool, tag: &str, eligible: bool) -> (i64, String) {
    let voter_id = format!("VID-20260101-{tag}");

    let id = sqlx::query(
        "INSERT INTO voters (voter_id, username, email, password_hash, national_id_hash,
                             national_id_digest, issue_date, wallet_address, is_eligible,
                             created_at)
         VALUES (?, 'voter', ?, 'x', 'x', ?, ?, ?, ?, ?)",
    )
    .bind(&voter_id)
    .bind(format!("{tag}@voters.test"))
    .bind(format!("digest-{tag}"))
    .bind(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())
    .bind(format!("voter-wallet-{tag}"))
    .bind(eligible)
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid();

    (id, voter_id)
}

/// Poll with two options and an explicitly stored status.
pub async fn seed_poll(
    pool: &SqlitePool,
    creator_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    status: PollStatus,
) -> Poll {
    let external_id = format!("poll_test_{}", rand::random::<u32>());

    let id = sqlx::query(
        "INSERT INTO polls (poll_id, title, description, creator_id, blockchain_address,
                            start_time, end_time, status, created_at)
         VALUES (?, 'Test poll', 'A test poll', ?, 'addr', ?, ?, ?, ?)",
    )
    .bind(&external_id)
    .bind(creator_id)
    .bind(start)
    .bind(end)
    .bind(status)
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid();

    for (index, text) in ["Option A", "Option B"].iter().enumerate() {
        sqlx::query(
            "INSERT INTO options (poll_id, option_text, option_index) VALUES (?, ?, ?)",
        )
        .bind(id)
        .bind(text)
        .bind(index as i64)
        .execute(pool)
        .await
        .unwrap();
    }

    sqlx::query_as::<_, Poll>("SELECT * FROM polls WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub fn admin_claims(id: i64) -> Claims {
    Claims {
        id,
        email: format!("admin{id}@test"),
        role: Role::Admin,
        voter_id: None,
        exp: (Utc::now() + chrono::Duration::days(1)).timestamp(),
    }
}

pub fn voter_claims(id: i64, voter_id: &str) -> Claims {
    Claims {
        id,
        email: format!("voter{id}@test"),
        role: Role::Voter,
        voter_id: Some(voter_id.to_string()),
        exp: (Utc::now() + chrono::Duration::days(1)).timestamp(),
    }
}
