use std::{env, time::Duration};

use url::Url;

use super::env::{
    AppConfig, ConfigError, DirectoryConfig, LoggingConfig, ScanConfig, SupabaseConfig,
    WebhookConfig,
};

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_source(|key| env::var(key).ok())
}

impl AppConfig {
    /// Builds the configuration from any key lookup; `load_config` feeds it the process env.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let supabase_url = get("SUPABASE_URL").ok_or(ConfigError::Missing("SUPABASE_URL"))?;
        validate_http_url("SUPABASE_URL", &supabase_url)?;
        let anon_key =
            get("SUPABASE_ANON_KEY").ok_or(ConfigError::Missing("SUPABASE_ANON_KEY"))?;
        let webhook_url = get("WEBHOOK_URL").ok_or(ConfigError::Missing("WEBHOOK_URL"))?;
        validate_http_url("WEBHOOK_URL", &webhook_url)?;

        let supabase = SupabaseConfig {
            url: supabase_url.trim_end_matches('/').to_string(),
            anon_key,
            schema: get("SUPABASE_SCHEMA").unwrap_or_else(|| "public".to_string()),
            table: get("DOMAINS_TABLE").unwrap_or_else(|| "domains".to_string()),
            channel: get("REALTIME_CHANNEL").unwrap_or_else(|| "domain_updates".to_string()),
            join_timeout: Duration::from_secs(parse_u64(&get, "REALTIME_JOIN_TIMEOUT", 10)),
            request_timeout: Duration::from_secs(parse_u64(&get, "SUPABASE_TIMEOUT", 30)),
        };

        let webhook = WebhookConfig {
            url: webhook_url,
            timeout: Duration::from_millis(parse_u64(&get, "WEBHOOK_TIMEOUT", 10_000)),
        };

        let scan = ScanConfig {
            stall_timeout: Duration::from_secs(parse_u64(&get, "SCAN_STALL_TIMEOUT", 300)),
        };

        let directories = DirectoryConfig {
            logs_dir: get("LOGS_DIR").unwrap_or_else(|| "logs".to_string()),
            data_dir: get("DATA_DIR").unwrap_or_else(|| "data".to_string()),
            db_filename: get("DB_FILENAME").unwrap_or_else(|| "history.db".to_string()),
        };

        let logging = LoggingConfig {
            level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        };

        let timezone = get("DISPLAY_TIMEZONE").unwrap_or_else(|| "UTC".to_string());

        Ok(Self {
            supabase,
            webhook,
            scan,
            directories,
            logging,
            timezone,
        })
    }
}

fn parse_u64<G>(get: &G, key: &str, default: u64) -> u64
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn validate_http_url(key: &'static str, value: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(value).map_err(|err| ConfigError::Invalid {
        key,
        reason: err.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            key,
            reason: format!("unsupported scheme {}", parsed.scheme()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn source(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("SUPABASE_URL", "https://demo.supabase.co/"),
        ("SUPABASE_ANON_KEY", "anon"),
        ("WEBHOOK_URL", "https://hooks.example.com/scan"),
    ];

    #[test]
    fn defaults_apply_when_optional_keys_are_absent() {
        let config = AppConfig::from_source(source(&REQUIRED)).unwrap();
        assert_eq!(config.supabase.url, "https://demo.supabase.co");
        assert_eq!(config.supabase.table, "domains");
        assert_eq!(config.supabase.channel, "domain_updates");
        assert_eq!(config.webhook.timeout, Duration::from_millis(10_000));
        assert_eq!(config.supabase.request_timeout, Duration::from_secs(30));
        assert_eq!(config.scan.stall_timeout, Duration::from_secs(300));
        assert_eq!(config.directories.db_filename, "history.db");
        assert_eq!(config.timezone, "UTC");
    }

    #[test]
    fn missing_key_is_reported_by_name() {
        let err = AppConfig::from_source(source(&REQUIRED[..2])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("WEBHOOK_URL")));
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SCAN_STALL_TIMEOUT", "soon"));
        pairs.push(("WEBHOOK_TIMEOUT", "2500"));
        let config = AppConfig::from_source(source(&pairs)).unwrap();
        assert_eq!(config.scan.stall_timeout, Duration::from_secs(300));
        assert_eq!(config.webhook.timeout, Duration::from_millis(2500));
    }

    #[test]
    fn non_http_webhook_is_rejected() {
        let pairs = [
            REQUIRED[0],
            REQUIRED[1],
            ("WEBHOOK_URL", "ftp://hooks.example.com"),
        ];
        let err = AppConfig::from_source(source(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "WEBHOOK_URL", .. }));
    }
}
