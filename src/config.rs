const DEFAULT_DATABASE_URL: &str = "sqlite://roomcast.db";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Environment-driven settings, read once at startup. Every variable has a
/// default so a bare `cargo run` works.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: dotenv::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_owned()),
            bind_addr: dotenv::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_owned()),
        }
    }
}
