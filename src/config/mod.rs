use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string for the job store
    pub postgres_url: String,

    /// Redis host for the dispatch queue
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    /// Redis port for the dispatch queue
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    /// HTTP listen port for the API server
    #[serde(default = "default_port")]
    pub port: u16,

    /// CORS allow-list, comma-separated ("*" permits all origins)
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: String,

    /// Outbound target allow-list, comma-separated ("*.x" matches x and
    /// its subdomains; empty permits all hosts)
    #[serde(default)]
    pub allowed_target_hosts: String,

    /// Deployment environment; anything other than "production" enables
    /// detailed error bodies
    #[serde(default = "default_app_env")]
    pub app_env: String,
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_port() -> u16 {
    3000
}

fn default_allowed_origins() -> String {
    "*".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Connection URL for the Redis queue backend.
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }

    /// Address the API server binds to.
    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    /// Whether error responses may carry failure details.
    pub fn detailed_errors(&self) -> bool {
        self.app_env != "production"
    }
}
