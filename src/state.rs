use std::sync::Arc;

use sqlx::SqlitePool;

use super::{
    chain::{ChainVerifier, RpcVerifier},
    config::Config,
    database::init_pool,
};

pub struct AppState {
    pub config: Config,
    pub pool: SqlitePool,
    pub chain: Arc<dyn ChainVerifier>,
}

impl AppState {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let pool = init_pool(&config.database_url)
            .await
            .expect("Database misconfigured!");

        let chain: Arc<dyn ChainVerifier> = Arc::new(RpcVerifier::new(&config.rpc_url));

        Arc::new(Self { config, pool, chain })
    }
}
