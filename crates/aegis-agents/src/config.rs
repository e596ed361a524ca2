use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use coordination::notify::Origin;

/// Deployment environment. Production hides error details from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Endpoints of the external analysis services. A stage without an
/// endpoint is not started.
#[derive(Debug, Clone, Default)]
pub struct ServiceEndpoints {
    pub vision: Option<String>,
    pub audio: Option<String>,
    pub severity: Option<String>,
    pub geocoder: Option<String>,
}

/// Poll intervals for each loop.
#[derive(Debug, Clone)]
pub struct PollIntervals {
    pub vision: Duration,
    pub audio: Duration,
    pub severity: Duration,
    pub dispatch: Duration,
}

/// Top-level runtime configuration.
#[derive(Debug, Clone)]
pub struct AegisConfig {
    pub db_path: PathBuf,
    pub bind: SocketAddr,
    pub environment: Environment,
    pub services: ServiceEndpoints,
    pub intervals: PollIntervals,
    /// Hard timeout per analysis call.
    pub analysis_timeout: Duration,
    /// Hard timeout per station push.
    pub delivery_timeout: Duration,
    /// Failed claims before a report moves to `Error`.
    pub max_analysis_attempts: u32,
    /// Dispatch passes that found no station before an incident is parked.
    pub max_dispatch_attempts: u32,
    /// Age after which a claim is considered abandoned.
    pub claim_lease: Duration,
    /// Stop each loop after this many polls (0 = run until cancelled).
    pub max_cycles: u64,
    pub origin: Origin,
    pub rate_limit_per_minute: u32,
}

impl AegisConfig {
    /// Build from `AEGIS_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or_default = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());
        let secs = |key: &str, default: u64| -> Result<Duration> {
            match var(key) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .with_context(|| format!("{key} must be a whole number of seconds, got '{v}'")),
                None => Ok(Duration::from_secs(default)),
            }
        };
        let number = |key: &str, default: u64| -> Result<u64> {
            match var(key) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("{key} must be a non-negative integer, got '{v}'")),
                None => Ok(default),
            }
        };

        let bind = or_default("AEGIS_BIND", "0.0.0.0:8080");
        let environment = or_default("AEGIS_ENV", "development");

        Ok(Self {
            db_path: PathBuf::from(or_default("AEGIS_DB_PATH", "aegis.db")),
            bind: bind
                .parse::<SocketAddr>()
                .with_context(|| format!("AEGIS_BIND is not a socket address: '{bind}'"))?,
            environment: environment
                .parse::<Environment>()
                .map_err(anyhow::Error::msg)
                .context("AEGIS_ENV")?,
            services: ServiceEndpoints {
                vision: var("AEGIS_VISION_URL"),
                audio: var("AEGIS_AUDIO_URL"),
                severity: var("AEGIS_SEVERITY_URL"),
                geocoder: var("AEGIS_GEOCODER_URL"),
            },
            intervals: PollIntervals {
                vision: secs("AEGIS_VISION_INTERVAL_SECS", 2)?,
                audio: secs("AEGIS_AUDIO_INTERVAL_SECS", 3)?,
                severity: secs("AEGIS_SEVERITY_INTERVAL_SECS", 3)?,
                dispatch: secs("AEGIS_DISPATCH_INTERVAL_SECS", 5)?,
            },
            analysis_timeout: secs("AEGIS_ANALYSIS_TIMEOUT_SECS", 30)?,
            delivery_timeout: secs("AEGIS_DELIVERY_TIMEOUT_SECS", 10)?,
            max_analysis_attempts: number("AEGIS_MAX_ANALYSIS_ATTEMPTS", 3)?.max(1) as u32,
            max_dispatch_attempts: number("AEGIS_MAX_DISPATCH_ATTEMPTS", 3)?.max(1) as u32,
            claim_lease: secs("AEGIS_CLAIM_LEASE_SECS", 300)?,
            max_cycles: number("AEGIS_MAX_CYCLES", 0)?,
            origin: Origin {
                name: or_default("AEGIS_ORIGIN_NAME", "Aegis Command Center"),
                origin_type: or_default("AEGIS_ORIGIN_TYPE", "command_center"),
            },
            rate_limit_per_minute: number("AEGIS_RATE_LIMIT_PER_MINUTE", 30)? as u32,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}
