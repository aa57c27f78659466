//! Poll and voting-token backend with blockchain-audited vote records.
//!
//! Admins create polls and mint per-poll voting tokens for eligible
//! voters; voters spend a token to cast a vote whose transaction
//! signature is verified against a public ledger RPC endpoint before the
//! vote is persisted.
//!
//! # Layout
//! - [`auth`]: registration, login, credential issuing and verification
//! - [`polls`]: poll lifecycle, results, history, deletion windows
//! - [`tokens`]: voting-token minting and collection
//! - [`votes`]: vote casting and on-chain audit lookups
//! - [`chain`]: the blockchain collaborator behind a capability trait
//!
//! # Setup
//!
//! ```sh
//! cargo doc --open
//! ```

use std::time::Duration;

use axum::{
    Json, Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{delete, get, post, put},
};

use serde_json::json;
use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod chain;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod polls;
pub mod state;
pub mod tokens;
pub mod votes;

#[cfg(test)]
pub mod testutil;

use state::AppState;

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = AppState::new().await;

    info!("Starting server...");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    let app = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route(
            "/api/auth/profile",
            get(auth::get_profile).put(auth::update_profile),
        )
        .route("/api/auth/wallet", put(auth::update_wallet))
        .route("/api/auth/change-password", put(auth::change_password))
        .route("/api/polls", post(polls::create_poll).get(polls::list_polls))
        .route("/api/polls/history/closed", get(polls::poll_history))
        .route("/api/polls/history/{id}", delete(polls::purge_closed_poll))
        .route("/api/polls/vote", post(votes::cast_vote))
        .route("/api/polls/verify/{signature}", get(votes::verify_on_chain))
        .route(
            "/api/polls/{id}",
            get(polls::get_poll).delete(polls::delete_poll),
        )
        .route("/api/polls/{id}/results", get(polls::poll_results))
        .route("/api/polls/{id}/vote-status", get(votes::vote_status))
        .route("/api/tokens/mint/{poll_id}", post(tokens::mint_for_poll))
        .route("/api/tokens/poll/{poll_id}", get(tokens::poll_tokens))
        .route("/api/tokens/my-tokens", get(tokens::my_tokens))
        .route("/api/tokens/status/{poll_id}", get(tokens::token_status))
        .layer(cors)
        .with_state(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    println!("Server shutting down...");
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "OK", "message": "Server is running" }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
