// src/config.rs

use std::env;
use std::net::SocketAddr;

use dotenvy::dotenv;

/// Warning threshold applied when an exam does not configure one.
pub const DEFAULT_WARNING_THRESHOLD: u32 = 3;

/// Upper bound accepted for an exam's warning threshold.
pub const MAX_WARNING_THRESHOLD: u32 = 10;

/// Default per-wrong-answer deduction when negative marking is enabled.
pub const DEFAULT_NEGATIVE_DEDUCTION: f64 = 0.25;

/// Conditional session writes retried this many times on a version mismatch.
pub const MAX_WRITE_RETRIES: usize = 5;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. When absent the in-memory store is used.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub rust_log: String,
    pub bind_addr: SocketAddr,
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 5000)));

        let cors_origins = env::var("CORS_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_else(|_| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://127.0.0.1:3000".to_string(),
                ]
            });

        Self {
            database_url,
            jwt_secret,
            rust_log,
            bind_addr,
            cors_origins,
        }
    }
}
