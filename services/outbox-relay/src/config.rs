use std::time::Duration;

/// Module list used when `OUTBOX_MODULES` is unset.
const DEFAULT_MODULES: &str = "patients,appointments,prescriptions";

/// `<MODULE>_DATABASE_URL` value selecting the process-local store.
pub const MEMORY_DATABASE_URL: &str = "memory";

/// Startup configuration errors. The only errors allowed to stop the relay.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var: {0}")]
    Missing(String),
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: &'static str,
    },
}

/// One module whose outbox the relay drains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleConfig {
    /// Module name, also written to `source_module` by its producers.
    pub name: String,
    /// sea-orm connection URL, or [`MEMORY_DATABASE_URL`].
    pub database_url: String,
}

impl ModuleConfig {
    pub fn is_in_memory(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }
}

/// Relay configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Redis connection URL (broker). Env var: `REDIS_URL`.
    pub redis_url: String,
    /// Modules to drain, from `OUTBOX_MODULES` plus one `<MODULE>_DATABASE_URL` each.
    pub modules: Vec<ModuleConfig>,
    /// Time between ticks (default 5s). Env var: `OUTBOX_TICK_INTERVAL_SECS`.
    pub tick_interval: Duration,
    /// Max messages fetched per module per tick (default 100). Env var: `OUTBOX_MAX_BATCH_SIZE`.
    pub max_batch_size: usize,
    /// Delivery attempts before quarantine (default 5). Env var: `OUTBOX_MAX_ATTEMPTS`.
    pub max_attempts: u32,
    /// Stream name prefix; events go to `<prefix>:<event_type>`. Env var: `OUTBOX_STREAM_PREFIX`.
    pub stream_prefix: String,
    /// Approximate per-stream length cap (default 100000). Env var: `OUTBOX_STREAM_MAXLEN`.
    pub stream_max_len: usize,
    /// Bound on waiting for the in-flight tick at shutdown (default 30s).
    /// Env var: `OUTBOX_SHUTDOWN_TIMEOUT_SECS`.
    pub shutdown_timeout: Duration,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (env, tests, files).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let redis_url = required(&lookup, "REDIS_URL")?;

        let module_list = lookup("OUTBOX_MODULES").unwrap_or_else(|| DEFAULT_MODULES.to_owned());
        let mut modules = Vec::new();
        for name in module_list
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
        {
            if modules.iter().any(|m: &ModuleConfig| m.name == name) {
                return Err(ConfigError::Invalid {
                    key: "OUTBOX_MODULES".to_owned(),
                    value: module_list.clone(),
                    reason: "duplicate module",
                });
            }
            let key = format!("{}_DATABASE_URL", name.to_uppercase());
            modules.push(ModuleConfig {
                name: name.to_owned(),
                database_url: required(&lookup, &key)?,
            });
        }
        if modules.is_empty() {
            return Err(ConfigError::Invalid {
                key: "OUTBOX_MODULES".to_owned(),
                value: module_list,
                reason: "at least one module is required",
            });
        }

        Ok(Self {
            redis_url,
            modules,
            tick_interval: Duration::from_secs(positive(&lookup, "OUTBOX_TICK_INTERVAL_SECS", 5)?),
            max_batch_size: positive(&lookup, "OUTBOX_MAX_BATCH_SIZE", 100)?,
            max_attempts: positive(&lookup, "OUTBOX_MAX_ATTEMPTS", 5)?,
            stream_prefix: lookup("OUTBOX_STREAM_PREFIX")
                .unwrap_or_else(|| "clinic.events".to_owned()),
            stream_max_len: positive(&lookup, "OUTBOX_STREAM_MAXLEN", 100_000)?,
            shutdown_timeout: Duration::from_secs(positive(
                &lookup,
                "OUTBOX_SHUTDOWN_TIMEOUT_SECS",
                30,
            )?),
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::Missing(key.to_owned()))
}

/// Parse an optional positive integer, falling back to `default` when unset.
fn positive<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Default,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let value: T = raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_owned(),
        value: raw.clone(),
        reason: "not a number",
    })?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            key: key.to_owned(),
            value: raw,
            reason: "must be greater than zero",
        });
    }
    Ok(value)
}
