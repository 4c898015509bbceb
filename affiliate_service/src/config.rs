use anyhow::Context;
use std::{str::FromStr, time::Duration};
use strum::{Display, EnumString};

/// The environment the service is deployed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum Environment {
    #[strum(serialize = "prod")]
    Production,
    #[strum(serialize = "dev")]
    Develop,
    #[strum(serialize = "local")]
    Local,
}

impl Environment {
    /// read `ENVIRONMENT`, falling back to production when it is missing or unknown
    pub fn new_or_prod() -> Self {
        std::env::var("ENVIRONMENT")
            .ok()
            .and_then(|v| Environment::from_str(&v).ok())
            .unwrap_or(Environment::Production)
    }
}

pub struct Config {
    pub environment: Environment,
    pub database_url: String,
    pub port: u16,
    /// how often expired referrals are swept and unpaid rewards retried
    pub maintenance_interval: Duration,
    pub db_max_connections: u32,
}

fn parse_or<T: FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(v) => v
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value {v}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env(environment: Environment) -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be provided")?;
        let port = parse_or("PORT", 8080)?;
        let maintenance_interval =
            Duration::from_secs(parse_or("REFERRAL_SWEEP_INTERVAL_SECS", 300)?);
        let default_connections = match environment {
            Environment::Production => 50,
            Environment::Develop | Environment::Local => 10,
        };
        let db_max_connections = parse_or("DB_MAX_CONNECTIONS", default_connections)?;

        Ok(Config {
            environment,
            database_url,
            port,
            maintenance_interval,
            db_max_connections,
        })
    }
}
