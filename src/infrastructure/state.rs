use std::sync::Arc;

use crate::infrastructure::{auth::JwtKeys, config::Config, db::PgPool};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub jwt_keys: JwtKeys,
}

impl AppState {
    pub fn new(config: Arc<Config>, pool: PgPool) -> Self {
        let jwt_keys = JwtKeys::new(&config.auth.jwt_secret);
        Self {
            config,
            pool,
            jwt_keys,
        }
    }
}
