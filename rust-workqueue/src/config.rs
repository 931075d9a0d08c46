//! Configuration module for environment variable parsing.
//!
//! Every setting comes from the environment. Optional settings fall back to a
//! default when unset, but a value that is present and malformed is rejected
//! instead of being silently replaced.

use std::env;
use std::fmt;
use std::time::Duration;

use lapin::uri::{AMQPAuthority, AMQPScheme, AMQPUri, AMQPUserInfo};

use crate::error::ConfigError;
use crate::queue::QueueSpec;

/// Queue name used when `QUEUE_NAME` is unset.
pub const DEFAULT_QUEUE_NAME: &str = "test-queue";

/// Extra connection attempts after the first one.
pub const DEFAULT_CONNECT_RETRIES: u32 = 5;

/// Where and how to reach the broker.
#[derive(Clone)]
pub struct BrokerSettings {
    pub uri: AMQPUri,
    /// Connection attempts after the first failed one
    pub connect_retries: u32,
}

impl BrokerSettings {
    /// Endpoint description safe for logs and error messages (no password).
    pub fn endpoint(&self) -> String {
        let scheme = match self.uri.scheme {
            AMQPScheme::AMQP => "amqp",
            AMQPScheme::AMQPS => "amqps",
        };
        let authority = &self.uri.authority;
        format!(
            "{}://{}@{}:{}/{}",
            scheme,
            authority.userinfo.username,
            authority.host,
            authority.port,
            self.uri.vhost.trim_start_matches('/'),
        )
    }
}

impl fmt::Debug for BrokerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerSettings")
            .field("endpoint", &self.endpoint())
            .field("connect_retries", &self.connect_retries)
            .finish()
    }
}

/// Settings shared by the publisher and the worker.
#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerSettings,
    pub queue: QueueSpec,
}

impl Config {
    /// Load configuration from environment variables (and `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(env_lookup)
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let uri = match lookup("BROKER_URL") {
            Some(url) => url
                .parse::<AMQPUri>()
                .map_err(|e| ConfigError::new("BROKER_URL", e.to_string()))?,
            None => {
                let default_port = AMQPAuthority::default().port;
                AMQPUri {
                    authority: AMQPAuthority {
                        userinfo: AMQPUserInfo {
                            username: lookup("BROKER_USER").unwrap_or_else(|| "guest".to_string()),
                            password: lookup("BROKER_PASS").unwrap_or_else(|| "guest".to_string()),
                        },
                        host: lookup("BROKER_HOST").unwrap_or_else(|| "localhost".to_string()),
                        port: parse_or(&lookup, "BROKER_PORT", default_port)?,
                    },
                    vhost: lookup("BROKER_VHOST").unwrap_or_else(|| "/".to_string()),
                    ..Default::default()
                }
            }
        };

        let name = lookup("QUEUE_NAME").unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string());
        if name.trim().is_empty() {
            return Err(ConfigError::new("QUEUE_NAME", "must not be empty"));
        }

        Ok(Config {
            broker: BrokerSettings {
                uri,
                connect_retries: parse_or(&lookup, "BROKER_CONNECT_RETRIES", DEFAULT_CONNECT_RETRIES)?,
            },
            queue: QueueSpec {
                name,
                durable: parse_bool_or(&lookup, "QUEUE_DURABLE", true)?,
            },
        })
    }
}

/// Publisher configuration.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub common: Config,
    /// Pause between two publishes
    pub publish_interval: Duration,
}

impl PublisherConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let publish_interval = match lookup("PUBLISH_INTERVAL_SECONDS") {
            Some(raw) => parse_seconds("PUBLISH_INTERVAL_SECONDS", &raw)?,
            None => Duration::from_secs(1),
        };

        Ok(PublisherConfig {
            common: Config::from_lookup(&lookup)?,
            publish_interval,
        })
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub common: Config,
    /// Simulated processing time per message
    pub processing_time: Duration,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(env_lookup)
    }

    /// `PROCESSING_TIME_SECONDS` has no default: the worker refuses to start
    /// without it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = lookup("PROCESSING_TIME_SECONDS")
            .ok_or_else(|| ConfigError::new("PROCESSING_TIME_SECONDS", "must be set"))?;

        Ok(WorkerConfig {
            processing_time: parse_seconds("PROCESSING_TIME_SECONDS", &raw)?,
            common: Config::from_lookup(&lookup)?,
        })
    }
}

fn env_lookup(name: &str) -> Option<String> {
    env::var(name).ok()
}

/// Parse a value if present, otherwise return the default.
fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::new(name, format!("{e} (got {raw:?})"))),
        None => Ok(default),
    }
}

fn parse_bool_or<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).as_deref().map(str::trim) {
        None => Ok(default),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(ConfigError::new(
            name,
            format!("expected true/false, got {other:?}"),
        )),
    }
}

/// Parse a non-negative number of seconds, fractions allowed.
fn parse_seconds(name: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::new(name, format!("expected a number of seconds, got {raw:?}")))?;

    Duration::try_from_secs_f64(secs)
        .map_err(|_| ConfigError::new(name, format!("must be a non-negative number, got {raw:?}")))
}
