use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

use chatrelay_auth::Authenticator;
use chatrelay_config::AppConfig;
use chatrelay_database::initialize_database;

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::INFO)
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// Shared service handles assembled once at startup
#[derive(Clone)]
pub struct BackendServices {
    pub db_pool: SqlitePool,
    pub authenticator: Authenticator,
}

impl BackendServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        let db_pool = initialize_database(&config.database)
            .await
            .context("failed to initialise database")?;

        let authenticator = Authenticator::new(db_pool.clone(), config.auth.clone());

        info!("backend services initialised");

        Ok(Self {
            db_pool,
            authenticator,
        })
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_config::{AppConfig, DatabaseConfig};
    use tempfile::TempDir;

    #[tokio::test]
    async fn services_initialise_against_a_fresh_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("runtime.db");

        let config = AppConfig {
            database: DatabaseConfig {
                url: format!("sqlite://{}", db_path.display()),
                max_connections: 2,
            },
            ..AppConfig::default()
        };

        let services = BackendServices::initialise(&config).await.unwrap();
        assert!(!services.db_pool.is_closed());
    }
}
