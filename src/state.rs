use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use crate::auth::jwt::JwtKeys;
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, ConfigError};
use crate::mail::{Mailer, SmtpMailer};
use crate::users::{PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub mailer: Arc<dyn Mailer>,
    pub clock: Arc<dyn Clock>,
    pub keys: JwtKeys,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;

        let mailer = SmtpMailer::new(&config.mail).context("configure mailer")?;

        let state = Self::from_parts(
            config,
            Arc::new(PgUserStore::new(db)),
            Arc::new(mailer),
            Arc::new(SystemClock),
        )?;
        Ok(state)
    }

    pub fn from_parts(
        config: AppConfig,
        users: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let keys = JwtKeys::from_config(&config.jwt)?;
        Ok(Self {
            config: Arc::new(config),
            users,
            mailer,
            clock,
            keys,
        })
    }
}
