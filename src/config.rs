use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How the server treats TLS on a listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// No `TlsProvider` configured; STARTTLS is never advertised.
    Disabled,
    /// STARTTLS is advertised and optional.
    StarttlsOffered,
    /// STARTTLS is advertised and mail transactions are refused until upgraded.
    StarttlsRequired,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub hostname: String,
    pub listen_addrs: Vec<String>,
    pub max_conns: usize,
    pub max_recipients: usize,
    pub max_message_size: usize,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub data_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub rate_limit_window: Duration,
    pub rate_limit_count: usize,
    #[serde(default = "default_ipv6_prefix")]
    pub rate_limit_ipv6_prefix: u8,
    pub tls_mode: TlsMode,
    pub auth_required: bool,
    pub allow_plain_without_tls: bool,
    #[serde(with = "duration_secs", default = "default_grace_period")]
    pub shutdown_grace_period: Duration,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

fn default_max_line_length() -> usize {
    1000
}

fn default_ipv6_prefix() -> u8 {
    64
}

fn default_grace_period() -> Duration {
    Duration::from_secs(10)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::SmtpError::Config(e.to_string()))?;

        toml::from_str(&content).map_err(|e| crate::error::SmtpError::Config(e.to_string()))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "mail.localhost".to_string(),
            listen_addrs: vec!["0.0.0.0:2525".to_string(), "[::]:2525".to_string()],
            max_conns: 1024,
            max_recipients: 100,
            max_message_size: 10 * 1024 * 1024,
            max_line_length: default_max_line_length(),
            idle_timeout: Duration::from_secs(300),
            data_timeout: Duration::from_secs(600),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_count: 30,
            rate_limit_ipv6_prefix: default_ipv6_prefix(),
            tls_mode: TlsMode::Disabled,
            auth_required: false,
            allow_plain_without_tls: false,
            shutdown_grace_period: default_grace_period(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_conservative() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.tls_mode, TlsMode::Disabled);
        assert!(!cfg.allow_plain_without_tls);
        assert_eq!(cfg.max_line_length, 1000);
    }

    #[test]
    fn parses_from_toml() {
        let toml_str = r#"
            hostname = "mx.example.com"
            listen_addrs = ["0.0.0.0:25"]
            max_conns = 500
            max_recipients = 50
            max_message_size = 26214400
            idle_timeout = 300
            data_timeout = 600
            rate_limit_window = 60
            rate_limit_count = 20
            tls_mode = "starttls_offered"
            auth_required = false
            allow_plain_without_tls = false

            [logging]
            level = "debug"
            format = "json"
        "#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.hostname, "mx.example.com");
        assert_eq!(cfg.tls_mode, TlsMode::StarttlsOffered);
        assert_eq!(cfg.rate_limit_ipv6_prefix, 64);
    }
}
