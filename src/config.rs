use serde::Deserialize;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Base URL of the book catalog service (favorites CRUD)
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,

    /// Base URL of the recommendation engine, a separate service from the
    /// catalog backend
    #[serde(default = "default_recommendation_url")]
    pub recommendation_url: String,

    /// Timeout applied to every outbound HTTP request, in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_catalog_url() -> String {
    "http://localhost:4000".to_string()
}

fn default_recommendation_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_http_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }
}
