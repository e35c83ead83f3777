use anyhow::{Context, Result};

const DEFAULT_PENDING_EXPIRY_DAYS: i64 = 30;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub http_addr: String,
    pub validators: Vec<String>,
    /// `(member id, display name)` pairs served by the member directory.
    pub members: Vec<(String, String)>,
    pub pending_expiry_days: i64,
    pub sweep_interval_secs: u64,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        Self::from_lookup(default_http_addr, |key| std::env::var(key).ok())
    }

    pub fn worker_from_env() -> Result<Self> {
        let config = Self::from_env("")?;
        if config.database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required");
        }
        Ok(config)
    }

    fn from_lookup<F>(default_http_addr: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let validators = non_empty("DAARA_VALIDATORS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let members = match non_empty("DAARA_MEMBERS") {
            Some(raw) => parse_members(&raw)?,
            None => Vec::new(),
        };

        let pending_expiry_days = match non_empty("DAARA_PENDING_EXPIRY_DAYS") {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .context("DAARA_PENDING_EXPIRY_DAYS must be a whole number of days")?,
            None => DEFAULT_PENDING_EXPIRY_DAYS,
        };
        if pending_expiry_days <= 0 {
            anyhow::bail!("DAARA_PENDING_EXPIRY_DAYS must be positive");
        }

        let sweep_interval_secs = match non_empty("DAARA_SWEEP_INTERVAL_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .context("DAARA_SWEEP_INTERVAL_SECS must be a whole number of seconds")?,
            None => DEFAULT_SWEEP_INTERVAL_SECS,
        };
        if sweep_interval_secs == 0 {
            anyhow::bail!("DAARA_SWEEP_INTERVAL_SECS must be positive");
        }

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            redis_url: non_empty("REDIS_URL"),
            http_addr: non_empty("HTTP_ADDR").unwrap_or_else(|| default_http_addr.to_string()),
            validators,
            members,
            pending_expiry_days,
            sweep_interval_secs,
        })
    }
}

fn parse_members(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, name) = entry
                .split_once('=')
                .with_context(|| format!("DAARA_MEMBERS entry {entry:?} is not id=name"))?;
            Ok((id.trim().to_string(), name.trim().to_string()))
        })
        .collect()
}
