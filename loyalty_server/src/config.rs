//! Server configuration.
//!
//! | Variable                   | Flag | Default                   |
//! |----------------------------|------|---------------------------|
//! | `RUN_ADDRESS`              | `-a` | `localhost:8080`          |
//! | `DATABASE_URI`             | `-d` | `sqlite://data/loyalty.db`|
//! | `ACCRUAL_SYSTEM_ADDRESS`   | `-r` | `http://localhost:8081`   |
//! | `ACCRUAL_POLL_INTERVAL`    |      | 10 (seconds)              |
//! | `ACCRUAL_WORKERS`          |      | 10                        |
//! | `ACCRUAL_QUEUE_CAPACITY`   |      | 100                       |
//! | `ACCRUAL_SHUTDOWN_TIMEOUT` |      | 30 (seconds)              |
//! | `ACCRUAL_SKIP_MIGRATIONS`  |      | false                     |
//!
//! Environment variables take precedence over flags.
use std::{env, fmt::Display, str::FromStr, time::Duration};

use log::*;
use loyalty_common::{helpers::parse_boolean_flag, Secret};
use loyalty_engine::accrual::{ReconciliationConfig, RetryPolicy, WorkerPoolConfig};

use crate::{cli::Cli, errors::ServerError};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATABASE_URI: &str = "sqlite://data/loyalty.db";
const DEFAULT_ACCRUAL_ADDRESS: &str = "http://localhost:8081";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_WORKERS: usize = 10;
const DEFAULT_QUEUE_CAPACITY: usize = 100;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: Secret<String>,
    /// If true, the database schema is assumed to be up to date, and migrations are not run at startup.
    pub skip_migrations: bool,
    pub accrual: AccrualConfig,
}

#[derive(Clone, Debug)]
pub struct AccrualConfig {
    /// The base URL of the accrual service
    pub base_url: String,
    pub poll_interval: Duration,
    pub workers: usize,
    pub queue_capacity: usize,
    /// How long shutdown waits for in-flight polls before the process gives up
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database_url: Secret::new(DEFAULT_DATABASE_URI.to_string()),
            skip_migrations: false,
            accrual: AccrualConfig::default(),
        }
    }
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ACCRUAL_ADDRESS.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl AccrualConfig {
    pub fn reconciliation_config(&self) -> ReconciliationConfig {
        let mut config = ReconciliationConfig::new(self.base_url.clone());
        config.poll_interval = self.poll_interval;
        config.pool = WorkerPoolConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            shutdown_timeout: self.shutdown_timeout,
            retry: RetryPolicy::default(),
        };
        config
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    /// Reads the configuration from the environment only
    pub fn from_env_or_default() -> Self {
        Self::from_cli_and_env(&Cli::default())
    }

    pub fn from_cli_and_env(cli: &Cli) -> Self {
        Self::from_sources(cli, |name| env::var(name).ok())
    }

    /// Resolves every setting from, in order of precedence, the environment (`env`), the command line, and the
    /// defaults. Invalid values are logged and replaced by the default.
    pub fn from_sources<E>(cli: &Cli, env: E) -> Self
    where E: Fn(&str) -> Option<String> {
        let run_address = env("RUN_ADDRESS").or_else(|| cli.run_address.clone());
        let (host, port) = run_address
            .map(|addr| {
                split_address(&addr).unwrap_or_else(|e| {
                    error!("🪛️ {addr} is not a valid address for RUN_ADDRESS. {e} Using the default instead.");
                    (DEFAULT_HOST.to_string(), DEFAULT_PORT)
                })
            })
            .unwrap_or_else(|| {
                info!("🪛️ RUN_ADDRESS is not set. Listening on {DEFAULT_HOST}:{DEFAULT_PORT}");
                (DEFAULT_HOST.to_string(), DEFAULT_PORT)
            });
        let database_url = env("DATABASE_URI").or_else(|| cli.database_uri.clone()).unwrap_or_else(|| {
            warn!("🪛️ DATABASE_URI is not set. Using the default, {DEFAULT_DATABASE_URI}");
            DEFAULT_DATABASE_URI.to_string()
        });
        let base_url = env("ACCRUAL_SYSTEM_ADDRESS").or_else(|| cli.accrual_address.clone()).unwrap_or_else(|| {
            warn!("🪛️ ACCRUAL_SYSTEM_ADDRESS is not set. Using the default, {DEFAULT_ACCRUAL_ADDRESS}");
            DEFAULT_ACCRUAL_ADDRESS.to_string()
        });
        let accrual = AccrualConfig {
            base_url: normalize_base_url(&base_url),
            poll_interval: Duration::from_secs(parse_or_default(
                "ACCRUAL_POLL_INTERVAL",
                env("ACCRUAL_POLL_INTERVAL"),
                DEFAULT_POLL_INTERVAL.as_secs(),
            )),
            workers: parse_or_default("ACCRUAL_WORKERS", env("ACCRUAL_WORKERS"), DEFAULT_WORKERS),
            queue_capacity: parse_or_default("ACCRUAL_QUEUE_CAPACITY", env("ACCRUAL_QUEUE_CAPACITY"), DEFAULT_QUEUE_CAPACITY),
            shutdown_timeout: Duration::from_secs(parse_or_default(
                "ACCRUAL_SHUTDOWN_TIMEOUT",
                env("ACCRUAL_SHUTDOWN_TIMEOUT"),
                DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
            )),
        };
        let skip_migrations = parse_boolean_flag(env("ACCRUAL_SKIP_MIGRATIONS"), false);
        Self { host, port, database_url: Secret::new(database_url), skip_migrations, accrual }
    }

    /// Rejects configurations the server cannot run with
    pub fn validate(&self) -> Result<(), ServerError> {
        let base_url = self.accrual.base_url.as_str();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ServerError::ConfigurationError(format!(
                "The accrual service address must be an http(s) URL. Got '{base_url}'"
            )));
        }
        if self.accrual.workers == 0 || self.accrual.queue_capacity == 0 {
            return Err(ServerError::ConfigurationError(
                "ACCRUAL_WORKERS and ACCRUAL_QUEUE_CAPACITY must be greater than zero".into(),
            ));
        }
        if self.accrual.poll_interval.is_zero() {
            return Err(ServerError::ConfigurationError("ACCRUAL_POLL_INTERVAL must be greater than zero".into()));
        }
        Ok(())
    }
}

fn parse_or_default<T>(name: &str, value: Option<String>, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match value {
        None => default,
        Some(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            error!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
            default
        }),
    }
}

/// Splits `host:port`. An empty host (`:8080`) listens on all interfaces.
fn split_address(addr: &str) -> Result<(String, u16), String> {
    let (host, port) = addr.trim().rsplit_once(':').ok_or_else(|| "Expected host:port.".to_string())?;
    let port = port.parse::<u16>().map_err(|e| format!("Invalid port. {e}."))?;
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    Ok((host.to_string(), port))
}

/// The accrual address may be given without a scheme, e.g. `localhost:8081`
fn normalize_base_url(addr: &str) -> String {
    let addr = addr.trim().trim_end_matches('/');
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}
