//! Environment-driven configuration.
//!
//! All settings come from the process environment (spec'd by the deployment,
//! not a config file). Storage settings are mandatory; the server refuses to
//! start without them.

use std::env;

/// Runtime configuration resolved from environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    /// Full URL of the S3/MinIO endpoint, e.g. `http://localhost:9000`.
    pub s3_endpoint: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    /// AWS/MinIO region; MinIO accepts any value but SigV4 needs one.
    pub s3_region: String,
    pub s3_bucket: String,
    pub host: String,
    pub port: u16,
    pub debug: bool,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// `S3_ENDPOINT`, `S3_ACCESS_KEY`, `S3_SECRET_KEY`, and `S3_BUCKET` are
    /// required. `S3_REGION` defaults to `us-east-1`, `HOST` to `0.0.0.0`,
    /// `PORT` to 5000, `DEBUG` to false.
    pub fn from_env() -> Result<Self, String> {
        let s3_endpoint = require("S3_ENDPOINT")?;
        let s3_access_key = require("S3_ACCESS_KEY")?;
        let s3_secret_key = require("S3_SECRET_KEY")?;
        let s3_bucket = require("S3_BUCKET")?;
        let s3_region = env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = match env::var("PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|_| format!("Invalid PORT value '{raw}'"))?,
            Err(_) => 5000,
        };
        let debug = parse_bool(env::var("DEBUG").ok().as_deref());

        Ok(Self {
            s3_endpoint,
            s3_access_key,
            s3_secret_key,
            s3_region,
            s3_bucket,
            host,
            port,
            debug,
        })
    }
}

fn require(name: &str) -> Result<String, String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(format!("Missing required environment variable: {name}")),
    }
}

fn parse_bool(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}
