use crate::auth::store::{AccountStore, PgAccountStore};
use crate::config::AppConfig;
use crate::mailer::{Mailer, SmtpMailer};
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn AccountStore>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;

        let store = Arc::new(PgAccountStore::new(db.clone())) as Arc<dyn AccountStore>;
        let mailer = Arc::new(SmtpMailer::new(&config.smtp)?) as Arc<dyn Mailer>;

        Ok(Self {
            db,
            config,
            store,
            mailer,
        })
    }

}
