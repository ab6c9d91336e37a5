//! Relay configuration from environment variables
//!
//! `.env` is loaded by `main` through dotenvy before this is read.

use alloy::primitives::Address;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const ENV_DATABASE_URL: &str = "DATABASE_URL";
const ENV_BIND_ADDR: &str = "BIND_ADDR";
const ENV_RPC_URL: &str = "RPC_URL";
const ENV_RELAYER_PRIVATE_KEY: &str = "RELAYER_PRIVATE_KEY";
const ENV_ENTRY_POINT_ADDRESS: &str = "ENTRY_POINT_ADDRESS";
const ENV_BENEFICIARY_ADDRESS: &str = "BENEFICIARY_ADDRESS";
const ENV_RELAY_GAS_LIMIT: &str = "RELAY_GAS_LIMIT";
const ENV_WORKER_CONCURRENCY: &str = "WORKER_CONCURRENCY";
const ENV_INCLUSION_TIMEOUT: &str = "INCLUSION_TIMEOUT_SECS";
const ENV_RECEIPT_POLL_INTERVAL: &str = "RECEIPT_POLL_INTERVAL_MS";

const DEFAULT_DATABASE_URL: &str = "sqlite://ops.db?mode=rwc";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
/// EntryPoint v0.6, same address on every chain
const DEFAULT_ENTRY_POINT: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";
const DEFAULT_RELAY_GAS_LIMIT: u64 = 1_000_000;
const DEFAULT_WORKER_CONCURRENCY: usize = 8;
const DEFAULT_INCLUSION_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RECEIPT_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone)]
pub struct RelayConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub rpc_url: String,
    pub relayer_private_key: String,
    pub entry_point: Address,
    /// Defaults to the relayer address when unset
    pub beneficiary: Option<Address>,
    pub relay_gas_limit: u64,
    pub worker_concurrency: usize,
    pub inclusion_timeout: Duration,
    pub receipt_poll_interval: Duration,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("database_url", &self.database_url)
            .field("bind_addr", &self.bind_addr)
            .field("rpc_url", &self.rpc_url)
            .field("relayer_private_key", &"<redacted>")
            .field("entry_point", &self.entry_point)
            .field("beneficiary", &self.beneficiary)
            .field("relay_gas_limit", &self.relay_gas_limit)
            .field("worker_concurrency", &self.worker_concurrency)
            .field("inclusion_timeout", &self.inclusion_timeout)
            .field("receipt_poll_interval", &self.receipt_poll_interval)
            .finish()
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any key lookup (environment, map in tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        Ok(Self {
            database_url: get(ENV_DATABASE_URL).unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            bind_addr: parse_or(ENV_BIND_ADDR, get(ENV_BIND_ADDR), DEFAULT_BIND_ADDR.parse().ok())?,
            rpc_url: required(ENV_RPC_URL)?,
            relayer_private_key: required(ENV_RELAYER_PRIVATE_KEY)?,
            entry_point: parse_or(
                ENV_ENTRY_POINT_ADDRESS,
                get(ENV_ENTRY_POINT_ADDRESS),
                DEFAULT_ENTRY_POINT.parse().ok(),
            )?,
            beneficiary: get(ENV_BENEFICIARY_ADDRESS)
                .map(|v| parse_value(ENV_BENEFICIARY_ADDRESS, &v))
                .transpose()?,
            relay_gas_limit: parse_or(
                ENV_RELAY_GAS_LIMIT,
                get(ENV_RELAY_GAS_LIMIT),
                Some(DEFAULT_RELAY_GAS_LIMIT),
            )?,
            worker_concurrency: parse_or(
                ENV_WORKER_CONCURRENCY,
                get(ENV_WORKER_CONCURRENCY),
                Some(DEFAULT_WORKER_CONCURRENCY),
            )?,
            inclusion_timeout: Duration::from_secs(parse_or(
                ENV_INCLUSION_TIMEOUT,
                get(ENV_INCLUSION_TIMEOUT),
                Some(DEFAULT_INCLUSION_TIMEOUT_SECS),
            )?),
            receipt_poll_interval: Duration::from_millis(parse_or(
                ENV_RECEIPT_POLL_INTERVAL,
                get(ENV_RECEIPT_POLL_INTERVAL),
                Some(DEFAULT_RECEIPT_POLL_INTERVAL_MS),
            )?),
        })
    }
}

/// Parse `raw` when present, otherwise fall back to `default`
fn parse_or<T>(name: &'static str, raw: Option<String>, default: Option<T>) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => parse_value(name, &raw),
        None => default.ok_or(ConfigError::Missing(name)),
    }
}

fn parse_value<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}
