use std::sync::Arc;

use crate::{
    config::AppConfig,
    db,
    mail::{LogMailer, Mailer},
    tours::repo::{MemoryTourStore, PgTourStore, TourStore},
    users::repo::{MemoryUserStore, PgUserStore, UserStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub tours: Arc<dyn TourStore>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let mailer = Arc::new(LogMailer) as Arc<dyn Mailer>;

        let state = match config.database_url.as_deref() {
            Some(url) => {
                let pool = db::connect(url).await?;
                db::migrate(&pool).await;
                Self {
                    config,
                    users: Arc::new(PgUserStore::new(pool.clone())),
                    tours: Arc::new(PgTourStore::new(pool)),
                    mailer,
                }
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory stores");
                Self {
                    config,
                    users: Arc::new(MemoryUserStore::new()),
                    tours: Arc::new(MemoryTourStore::new()),
                    mailer,
                }
            }
        };
        Ok(state)
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        tours: Arc<dyn TourStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            config,
            users,
            tours,
            mailer,
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::{Environment, JwtConfig},
        mail::testing::RecordingMailer,
    };

    pub fn test_config(environment: Environment) -> AppConfig {
        AppConfig {
            database_url: None,
            environment,
            public_url: "http://tours.test".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 60,
                cookie_ttl_days: 1,
            },
        }
    }

    /// In-memory state plus a handle on the recording mailer.
    pub fn fake_with(environment: Environment) -> (AppState, Arc<RecordingMailer>) {
        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState::from_parts(
            Arc::new(test_config(environment)),
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemoryTourStore::new()),
            mailer.clone(),
        );
        (state, mailer)
    }

    pub fn fake() -> AppState {
        fake_with(Environment::Development).0
    }
}
