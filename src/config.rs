use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use tracing::{info, warn};

pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub rpc_url: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("CHAINPOLL_PORT", "5000"),
            database_url: try_load("DATABASE_URL", "sqlite:chainpoll.db?mode=rwc"),
            jwt_secret: read_secret("JWT_SECRET"),
            rpc_url: try_load("SOLANA_RPC_URL", "https://api.devnet.solana.com"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

/// Secrets come from a mounted secrets file when deployed, with an
/// environment fallback for local runs.
fn read_secret(secret_name: &str) -> String {
    let path = format!("/run/secrets/{secret_name}");

    if let Ok(s) = read_to_string(&path) {
        return s.trim().to_string();
    }

    var(secret_name).unwrap_or_else(|_| {
        warn!("{secret_name} missing, using insecure development default");
        "secret".to_string()
    })
}
