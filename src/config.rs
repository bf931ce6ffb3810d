use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use crate::client::ClientSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub admin_token: Option<String>,
    pub api: ApiConfig,
    pub queue: QueueConfig,
}

/// Remote CRM connection parameters.
#[derive(Clone)]
pub struct ApiConfig {
    pub api_url: String,
    pub endpoint_id: String,
    /// endpoint id -> secret key
    pub secret_keys: HashMap<String, String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub retry_interval: Duration,
    pub tick_interval: Duration,
    pub batch_size: usize,
    pub lock_duration: Duration,
    pub log_channel: String,
}

pub const MIN_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound for the retry interval and the lease length.
pub const MAX_QUEUE_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

const MAX_TIMEOUT_SECS: u64 = i32::MAX as u64;

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(900),
            tick_interval: Duration::from_secs(300),
            batch_size: 50,
            lock_duration: Duration::from_secs(300),
            log_channel: "crm".to_string(),
        }
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut endpoints: Vec<&String> = self.secret_keys.keys().collect();
        endpoints.sort();
        f.debug_struct("ApiConfig")
            .field("api_url", &self.api_url)
            .field("endpoint_id", &self.endpoint_id)
            .field("secret_keys_for", &endpoints)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ApiConfig {
    pub fn new(api_url: impl Into<String>, endpoint_id: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            endpoint_id: endpoint_id.into(),
            secret_keys: HashMap::new(),
            timeout: crate::client::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_secret_key(
        mut self,
        endpoint_id: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        self.secret_keys.insert(endpoint_id.into(), key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Same credentials, different endpoint.
    pub fn with_endpoint(&self, endpoint_id: impl Into<String>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            ..self.clone()
        }
    }

    pub fn secret_key_for(&self, endpoint_id: &str) -> Option<&str> {
        self.secret_keys
            .get(endpoint_id)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }

    /// Timeout in whole seconds, rounded up. Queue rows store this value, so
    /// immediate calls use it too and a replay runs under the same bound.
    pub fn timeout_secs(&self) -> u64 {
        let secs = self.timeout.as_secs() + u64::from(self.timeout.subsec_nanos() > 0);
        secs.clamp(1, MAX_TIMEOUT_SECS)
    }

    /// Client settings for the configured endpoint.
    pub fn settings(&self) -> ClientSettings {
        self.settings_for(
            &self.api_url,
            &self.endpoint_id,
            Duration::from_secs(self.timeout_secs()),
        )
    }

    /// Client settings for a frozen (api_url, endpoint_id, timeout) triple,
    /// with the secret key looked up from current configuration.
    pub fn settings_for(
        &self,
        api_url: &str,
        endpoint_id: &str,
        timeout: Duration,
    ) -> ClientSettings {
        ClientSettings {
            api_url: api_url.to_string(),
            endpoint_id: endpoint_id.to_string(),
            secret_key: self.secret_key_for(endpoint_id).map(str::to_string),
            timeout,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.api_url.trim().is_empty() {
            return Err("CRM_API_URL must not be empty".to_string());
        }
        if self.endpoint_id.trim().is_empty() {
            return Err("CRM_ENDPOINT_ID must not be empty".to_string());
        }
        if self.timeout.is_zero() {
            return Err("CRM_TIMEOUT_SECS must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build and validate configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| format!("Missing required environment variable: {key}"))
        };
        let or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let database_url = required("DATABASE_URL")?;

        let host: IpAddr = or("CRM_RELAY_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid CRM_RELAY_HOST: {e}"))?;
        let port: u16 = or("CRM_RELAY_PORT", "3000")
            .parse()
            .map_err(|e| format!("Invalid CRM_RELAY_PORT: {e}"))?;
        let log_level = or("CRM_RELAY_LOG_LEVEL", "info");
        let admin_token = lookup("CRM_RELAY_ADMIN_TOKEN").filter(|t| !t.is_empty());

        let endpoint_id = required("CRM_ENDPOINT_ID")?.trim().to_string();
        let mut secret_keys = parse_secret_keys(&or("CRM_SECRET_KEYS", ""))?;
        if let Some(key) = lookup("CRM_SECRET_KEY").filter(|k| !k.is_empty()) {
            secret_keys.insert(endpoint_id.clone(), key);
        }

        let api = ApiConfig {
            api_url: or("CRM_API_URL", "api.mindbox.ru").trim().to_string(),
            endpoint_id,
            secret_keys,
            timeout: secs(&or("CRM_TIMEOUT_SECS", "5"), "CRM_TIMEOUT_SECS")?,
        };
        api.validate()?;

        let defaults = QueueConfig::default();
        let queue = QueueConfig {
            retry_interval: secs(
                &or(
                    "CRM_QUEUE_RETRY_INTERVAL_SECS",
                    &defaults.retry_interval.as_secs().to_string(),
                ),
                "CRM_QUEUE_RETRY_INTERVAL_SECS",
            )?,
            tick_interval: secs(
                &or("CRM_QUEUE_TICK_INTERVAL_SECS", &defaults.tick_interval.as_secs().to_string()),
                "CRM_QUEUE_TICK_INTERVAL_SECS",
            )?
            .max(MIN_TICK_INTERVAL),
            batch_size: or("CRM_QUEUE_BATCH_SIZE", &defaults.batch_size.to_string())
                .parse()
                .map_err(|e| format!("Invalid CRM_QUEUE_BATCH_SIZE: {e}"))?,
            lock_duration: secs(
                &or("CRM_QUEUE_LOCK_SECS", &defaults.lock_duration.as_secs().to_string()),
                "CRM_QUEUE_LOCK_SECS",
            )?,
            log_channel: or("CRM_RELAY_LOG_CHANNEL", &defaults.log_channel),
        };
        queue.validate()?;

        Ok(Config {
            database_url,
            host,
            port,
            log_level,
            admin_token,
            api,
            queue,
        })
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.retry_interval.is_zero() {
            return Err("CRM_QUEUE_RETRY_INTERVAL_SECS must be greater than 0".to_string());
        }
        if self.retry_interval > MAX_QUEUE_INTERVAL {
            return Err(format!(
                "CRM_QUEUE_RETRY_INTERVAL_SECS must be at most {}",
                MAX_QUEUE_INTERVAL.as_secs()
            ));
        }
        if self.batch_size == 0 {
            return Err("CRM_QUEUE_BATCH_SIZE must be greater than 0".to_string());
        }
        if self.lock_duration.is_zero() {
            return Err("CRM_QUEUE_LOCK_SECS must be greater than 0".to_string());
        }
        if self.lock_duration > MAX_QUEUE_INTERVAL {
            return Err(format!(
                "CRM_QUEUE_LOCK_SECS must be at most {}",
                MAX_QUEUE_INTERVAL.as_secs()
            ));
        }
        Ok(())
    }
}

fn secs(value: &str, key: &str) -> Result<Duration, String> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| format!("Invalid {key}: {e}"))
}

/// `endpointA=key1,endpointB=key2`
fn parse_secret_keys(raw: &str) -> Result<HashMap<String, String>, String> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|pair| {
            pair.split_once('=')
                .map(|(endpoint, key)| (endpoint.trim().to_string(), key.trim().to_string()))
                .filter(|(endpoint, _)| !endpoint.is_empty())
                .ok_or_else(|| format!("Invalid CRM_SECRET_KEYS entry '{}'", pair.trim()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const BASE: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/crm"),
        ("CRM_ENDPOINT_ID", "shop.Website"),
    ];

    #[test]
    fn applies_defaults() {
        let cfg = config(&BASE).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.api.api_url, "api.mindbox.ru");
        assert_eq!(cfg.api.timeout, Duration::from_secs(5));
        assert_eq!(cfg.queue.retry_interval, Duration::from_secs(900));
        assert_eq!(cfg.queue.tick_interval, Duration::from_secs(300));
        assert_eq!(cfg.queue.batch_size, 50);
        assert_eq!(cfg.queue.lock_duration, Duration::from_secs(300));
        assert_eq!(cfg.queue.log_channel, "crm");
        assert!(cfg.admin_token.is_none());
    }

    #[test]
    fn requires_endpoint_and_database() {
        assert!(config(&[("DATABASE_URL", "postgres://x")]).is_err());
        assert!(config(&[("CRM_ENDPOINT_ID", "shop.Website")]).is_err());
    }

    #[test]
    fn resolves_secret_keys_per_endpoint() {
        let mut vars = BASE.to_vec();
        vars.push(("CRM_SECRET_KEYS", "other.Endpoint=k2, shop.Website=old"));
        vars.push(("CRM_SECRET_KEY", "k1"));
        let cfg = config(&vars).unwrap();

        assert_eq!(cfg.api.secret_key_for("shop.Website"), Some("k1"));
        assert_eq!(cfg.api.secret_key_for("other.Endpoint"), Some("k2"));
        assert_eq!(cfg.api.secret_key_for("missing"), None);

        let settings = cfg.api.settings_for("x", "other.Endpoint", Duration::from_secs(3));
        assert_eq!(settings.secret_key.as_deref(), Some("k2"));
        assert_eq!(settings.timeout, Duration::from_secs(3));
    }

    #[test]
    fn rejects_bad_values() {
        for (key, value) in [
            ("CRM_TIMEOUT_SECS", "0"),
            ("CRM_TIMEOUT_SECS", "-1"),
            ("CRM_QUEUE_BATCH_SIZE", "0"),
            ("CRM_QUEUE_LOCK_SECS", "0"),
            ("CRM_QUEUE_LOCK_SECS", "31536001"),
            ("CRM_QUEUE_RETRY_INTERVAL_SECS", "10000000000000"),
            ("CRM_QUEUE_RETRY_INTERVAL_SECS", "soon"),
            ("CRM_SECRET_KEYS", "no-equals-sign"),
            ("CRM_RELAY_PORT", "99999"),
        ] {
            let mut vars = BASE.to_vec();
            vars.push((key, value));
            assert!(config(&vars).is_err(), "{key}={value} should be rejected");
        }
    }

    #[test]
    fn clamps_tick_interval() {
        let mut vars = BASE.to_vec();
        vars.push(("CRM_QUEUE_TICK_INTERVAL_SECS", "5"));
        assert_eq!(config(&vars).unwrap().queue.tick_interval, MIN_TICK_INTERVAL);
    }

    #[test]
    fn accepts_maximum_queue_interval() {
        let mut vars = BASE.to_vec();
        vars.push(("CRM_QUEUE_RETRY_INTERVAL_SECS", "31536000"));
        assert_eq!(config(&vars).unwrap().queue.retry_interval, MAX_QUEUE_INTERVAL);
    }

    #[test]
    fn timeout_rounds_up_to_whole_seconds() {
        let api = ApiConfig::new("api.example.test", "shop.Website");
        assert_eq!(api.timeout_secs(), 5);
        assert_eq!(api.settings().timeout, Duration::from_secs(5));

        let api = api.with_timeout(Duration::from_millis(1500));
        assert_eq!(api.timeout_secs(), 2);
        assert_eq!(api.settings().timeout, Duration::from_secs(2));

        let api = api.with_timeout(Duration::from_millis(200));
        assert_eq!(api.settings().timeout, Duration::from_secs(1));
    }

    #[test]
    fn debug_output_hides_secret_keys() {
        let api = ApiConfig::new("api.example.test", "shop.Website")
            .with_secret_key("shop.Website", "hunter2");
        assert!(!format!("{api:?}").contains("hunter2"));
    }
}
