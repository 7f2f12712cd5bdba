pub mod domain;
pub mod engine;
pub mod features;
pub mod model;
pub mod provider;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;

    pub const DEFAULT_OPEN_METEO_BASE_URL: &str = "https://api.open-meteo.com";
    pub const DEFAULT_MODEL_PATH: &str = "model/cocoon_price_gbt.json";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub model_path: Option<String>,
        pub open_meteo_base_url: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                model_path: std::env::var("MODEL_PATH").ok(),
                open_meteo_base_url: std::env::var("OPEN_METEO_BASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn model_path(&self) -> &str {
            self.model_path.as_deref().unwrap_or(DEFAULT_MODEL_PATH)
        }

        pub fn open_meteo_base_url(&self) -> &str {
            self.open_meteo_base_url
                .as_deref()
                .unwrap_or(DEFAULT_OPEN_METEO_BASE_URL)
        }
    }
}
