use anyhow::Context;
use serde::Deserialize;
use time::Duration;

/// S3/MinIO connection settings. Absent means in-memory object storage.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

/// Credentials of the operations account created at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationsSeed {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenTtls {
    pub session: Duration,
    pub verification: Duration,
    pub download: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub public_base_url: String,
    pub database_url: Option<String>,
    pub ttl: TokenTtls,
    /// How long expired tokens are kept so late redemptions still report `Expired`.
    pub expired_token_retention: Duration,
    pub max_upload_bytes: usize,
    pub sweep_interval_secs: u64,
    pub require_email_verification: bool,
    pub operations_seed: Option<OperationsSeed>,
    pub storage: Option<StorageConfig>,
}

fn var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match var_opt(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", key, e)),
        None => Ok(default),
    }
}

// Ten years. Keeps `now + ttl` well inside the representable date range.
const MAX_MINUTES: i64 = 60 * 24 * 365 * 10;

fn minutes(key: &str, default: i64) -> anyhow::Result<Duration> {
    let value = parse_or::<i64>(key, default)?;
    anyhow::ensure!(value >= 0, "{} must not be negative", key);
    anyhow::ensure!(value <= MAX_MINUTES, "{} must be at most {} minutes", key, MAX_MINUTES);
    Ok(Duration::minutes(value))
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let ttl = TokenTtls {
            session: minutes("SESSION_TTL_MINUTES", 60 * 24)?,
            verification: minutes("VERIFICATION_TTL_MINUTES", 60 * 24)?,
            download: minutes("DOWNLOAD_TTL_MINUTES", 60 * 24)?,
        };

        let operations_seed = match (var_opt("OPERATIONS_EMAIL"), var_opt("OPERATIONS_PASSWORD")) {
            (Some(email), Some(password)) => Some(OperationsSeed { email, password }),
            (None, None) => None,
            _ => anyhow::bail!("OPERATIONS_EMAIL and OPERATIONS_PASSWORD must be set together"),
        };

        let storage = match var_opt("MINIO_ENDPOINT") {
            Some(endpoint) => Some(StorageConfig {
                endpoint,
                bucket: var_opt("MINIO_BUCKET").unwrap_or_else(|| "secureshare".into()),
                access_key: std::env::var("MINIO_ACCESS_KEY").context("MINIO_ACCESS_KEY")?,
                secret_key: std::env::var("MINIO_SECRET_KEY").context("MINIO_SECRET_KEY")?,
                region: var_opt("MINIO_REGION").unwrap_or_else(|| "us-east-1".into()),
            }),
            None => None,
        };

        Ok(Self {
            host: var_opt("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or("APP_PORT", 8080)?,
            public_base_url: var_opt("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8080".into()),
            database_url: var_opt("DATABASE_URL"),
            ttl,
            expired_token_retention: minutes("EXPIRED_TOKEN_RETENTION_MINUTES", 60 * 24 * 7)?,
            max_upload_bytes: parse_or("MAX_UPLOAD_BYTES", 50 * 1024 * 1024)?,
            sweep_interval_secs: parse_or("SWEEP_INTERVAL_SECS", 300)?,
            require_email_verification: parse_or("REQUIRE_EMAIL_VERIFICATION", true)?,
            operations_seed,
            storage,
        })
    }

    /// Settings used by `AppState::fake()`.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            public_base_url: "http://test.local".into(),
            database_url: None,
            ttl: TokenTtls {
                session: Duration::minutes(5),
                verification: Duration::minutes(5),
                download: Duration::minutes(5),
            },
            expired_token_retention: Duration::hours(1),
            max_upload_bytes: 1024 * 1024,
            sweep_interval_secs: 60,
            require_email_verification: true,
            operations_seed: None,
            storage: None,
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_address_joins_host_and_port() {
        let mut cfg = AppConfig::for_tests();
        cfg.port = 9000;
        assert_eq!(cfg.server_address(), "127.0.0.1:9000");
    }

    #[test]
    fn minutes_rejects_out_of_range_values() {
        std::env::set_var("SECURESHARE_TEST_HUGE_TTL_MINUTES", "10000000000");
        assert!(minutes("SECURESHARE_TEST_HUGE_TTL_MINUTES", 60).is_err());

        std::env::set_var("SECURESHARE_TEST_NEGATIVE_TTL_MINUTES", "-1");
        assert!(minutes("SECURESHARE_TEST_NEGATIVE_TTL_MINUTES", 60).is_err());

        std::env::set_var("SECURESHARE_TEST_CAPPED_TTL_MINUTES", MAX_MINUTES.to_string());
        let ttl = minutes("SECURESHARE_TEST_CAPPED_TTL_MINUTES", 60).unwrap();
        assert!(time::OffsetDateTime::now_utc().checked_add(ttl).is_some());
    }

    #[test]
    fn parse_or_falls_back_to_default_for_missing_key() {
        let v: u64 = parse_or("SECURESHARE_TEST_SURELY_UNSET_KEY", 42).unwrap();
        assert_eq!(v, 42);
    }
}
