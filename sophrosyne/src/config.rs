//! Layered configuration.
//!
//! Values come from an optional `sophrosyne.yaml` flattened to
//! dot-separated keys, overlaid by environment variables with the `SOPH_`
//! prefix and `_` as the key delimiter (`SOPH_SERVER_PORT` →
//! `server.port`). Key matching is case-insensitive. The typed [`Config`]
//! is validated once at startup; a process that cannot validate its
//! configuration exits non-zero instead of serving.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use soph_core::{Error, ValidationReport};
use soph_security::KeyType;

/// Default configuration file, read when present.
pub const CONFIG_FILE: &str = "sophrosyne.yaml";
/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SOPH_";

const DEFAULT_PORT: u16 = 8443;
const DEFAULT_MAX_BODY_SIZE: usize = 20 * 1024 * 1024;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_CACHE_CLEANUP_SECS: u64 = 300;
const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 5;
const DEFAULT_METRICS_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub max_body_size: usize,
    pub advertised_host: String,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            other => Err(format!("unknown log level {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub level: LogLevel,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryOutput {
    Stdout,
    Http,
}

impl FromStr for TelemetryOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdout" => Ok(TelemetryOutput::Stdout),
            "http" => Ok(TelemetryOutput::Http),
            other => Err(format!("unknown telemetry output {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub enabled: bool,
    pub batch_timeout: Duration,
    pub output: TelemetryOutput,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub output: TelemetryOutput,
}

#[derive(Debug, Clone)]
pub struct RootPrincipalConfig {
    pub name: String,
    pub email: String,
    /// Recreate the root user (with a fresh token) even if it exists.
    pub recreate: bool,
}

#[derive(Debug, Clone)]
pub struct EntityServiceConfig {
    pub page_size: usize,
    pub cache_ttl: Duration,
    pub cache_cleanup_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ServicesConfig {
    pub users: EntityServiceConfig,
    pub profiles: EntityServiceConfig,
    pub checks: EntityServiceConfig,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub key_type: KeyType,
    pub certificate_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

#[derive(Clone)]
pub struct SecurityConfig {
    /// Exactly 64 bytes. Never logged.
    pub site_key: Vec<u8>,
    /// Exactly 32 bytes. Never logged.
    pub salt: Vec<u8>,
    pub tls: TlsConfig,
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct DevelopmentConfig {
    pub enabled: bool,
    /// Fixed root token for local work. Ignored outside development mode.
    pub static_root_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub tracing: TracingConfig,
    pub metrics: MetricsConfig,
    pub root: RootPrincipalConfig,
    pub services: ServicesConfig,
    pub security: SecurityConfig,
    pub development: DevelopmentConfig,
}

impl Config {
    /// Load from `sophrosyne.yaml` (if present) and the `SOPH_` environment.
    pub fn load() -> Result<Self, Error> {
        let mut raw = RawConfig::default();
        raw.load_yaml_file(Path::new(CONFIG_FILE))?;
        raw.load_env(std::env::vars());
        Self::from_raw(&raw)
    }

    /// Assemble and validate the typed configuration.
    pub fn from_raw(raw: &RawConfig) -> Result<Self, Error> {
        let mut report = ValidationReport::default();

        let database = DatabaseConfig {
            user: raw.string_or("database.user", "sophrosyne"),
            password: raw.string_or("database.password", ""),
            host: raw.string_or("database.host", "localhost"),
            port: raw.parse_or("database.port", 5432, &mut report),
            name: raw.string_or("database.name", "sophrosyne"),
        };

        let server = ServerConfig {
            port: raw.parse_or("server.port", DEFAULT_PORT, &mut report),
            max_body_size: raw.parse_or("server.maxbodysize", DEFAULT_MAX_BODY_SIZE, &mut report),
            advertised_host: raw.string_or("server.advertisedhost", "localhost"),
            shutdown_timeout: Duration::from_secs(raw.parse_or(
                "server.shutdowntimeout",
                DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                &mut report,
            )),
        };

        let logging = LoggingConfig {
            enabled: raw.parse_or("logging.enabled", true, &mut report),
            level: raw.parse_or("logging.level", LogLevel::Info, &mut report),
            format: raw.parse_or("logging.format", LogFormat::Text, &mut report),
        };

        let tracing = TracingConfig {
            enabled: raw.parse_or("tracing.enabled", false, &mut report),
            batch_timeout: Duration::from_secs(raw.parse_or(
                "tracing.batch.timeout",
                DEFAULT_BATCH_TIMEOUT_SECS,
                &mut report,
            )),
            output: raw.parse_or("tracing.output", TelemetryOutput::Stdout, &mut report),
        };

        let metrics = MetricsConfig {
            enabled: raw.parse_or("metrics.enabled", false, &mut report),
            interval: Duration::from_secs(raw.parse_or(
                "metrics.interval",
                DEFAULT_METRICS_INTERVAL_SECS,
                &mut report,
            )),
            output: raw.parse_or("metrics.output", TelemetryOutput::Stdout, &mut report),
        };

        let root = RootPrincipalConfig {
            name: raw.string_or("principals.root.name", "root"),
            email: raw.string_or("principals.root.email", "root@localhost"),
            recreate: raw.parse_or("principals.root.recreate", false, &mut report),
        };

        let services = ServicesConfig {
            users: entity_service(raw, "users", &mut report),
            profiles: entity_service(raw, "profiles", &mut report),
            checks: entity_service(raw, "checks", &mut report),
        };

        let site_key = raw.string_or("security.sitekey", "").into_bytes();
        if site_key.len() != soph_security::SITE_KEY_LEN {
            report.push(
                "security.siteKey",
                format!(
                    "must be exactly {} bytes, got {}",
                    soph_security::SITE_KEY_LEN,
                    site_key.len()
                ),
            );
        }
        let salt = raw.string_or("security.salt", "").into_bytes();
        if salt.len() != soph_security::SALT_LEN {
            report.push(
                "security.salt",
                format!(
                    "must be exactly {} bytes, got {}",
                    soph_security::SALT_LEN,
                    salt.len()
                ),
            );
        }

        let key_type = match raw.get("security.tls.keytype") {
            Some(value) => match value.parse::<KeyType>() {
                Ok(kind) => kind,
                Err(err) => {
                    report.push("security.tls.keyType", err.to_string());
                    KeyType::EcP384
                }
            },
            None => KeyType::EcP384,
        };
        let security = SecurityConfig {
            site_key,
            salt,
            tls: TlsConfig {
                key_type,
                certificate_path: raw.path("security.tls.certificatepath"),
                key_path: raw.path("security.tls.keypath"),
                insecure_skip_verify: raw.parse_or(
                    "security.tls.insecureskipverify",
                    false,
                    &mut report,
                ),
            },
        };

        let development = DevelopmentConfig {
            enabled: raw.parse_or("development.enabled", false, &mut report),
            static_root_token: raw
                .get("development.staticroottoken")
                .map(str::to_string)
                .filter(|s| !s.is_empty()),
        };

        if !report.is_empty() {
            return Err(Error::validation(report));
        }
        Ok(Config {
            database,
            server,
            logging,
            tracing,
            metrics,
            root,
            services,
            security,
            development,
        })
    }
}

fn entity_service(
    raw: &RawConfig,
    name: &str,
    report: &mut ValidationReport,
) -> EntityServiceConfig {
    let page_size = raw.parse_or(
        &format!("services.{name}.pagesize"),
        soph_services::DEFAULT_PAGE_SIZE,
        report,
    );
    if page_size < soph_services::MIN_PAGE_SIZE {
        report.push(
            format!("services.{name}.pageSize"),
            format!("must be at least {}", soph_services::MIN_PAGE_SIZE),
        );
    }
    EntityServiceConfig {
        page_size,
        cache_ttl: Duration::from_secs(raw.parse_or(
            &format!("services.{name}.cache.ttl"),
            DEFAULT_CACHE_TTL_SECS,
            report,
        )),
        cache_cleanup_interval: Duration::from_secs(raw.parse_or(
            &format!("services.{name}.cache.cleanupinterval"),
            DEFAULT_CACHE_CLEANUP_SECS,
            report,
        )),
    }
}

/// The flattened key/value layer beneath [`Config`].
#[derive(Debug, Default, Clone)]
pub struct RawConfig {
    values: HashMap<String, String>,
}

impl RawConfig {
    /// Set one flattened key. Later writes win, which is what gives the
    /// environment precedence over the file.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    /// Load and flatten a YAML file if it exists.
    pub fn load_yaml_file(&mut self, path: &Path) -> Result<(), Error> {
        if !path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::internal(format!("cannot read {}", path.display())).with_source(e))?;
        self.load_yaml_str(&content)
    }

    pub fn load_yaml_str(&mut self, content: &str) -> Result<(), Error> {
        let yaml: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| Error::internal("malformed configuration file").with_source(e))?;
        self.flatten_yaml("", &yaml);
        Ok(())
    }

    fn flatten_yaml(&mut self, prefix: &str, value: &serde_yaml::Value) {
        match value {
            serde_yaml::Value::Mapping(map) => {
                for (k, v) in map {
                    let key = match k {
                        serde_yaml::Value::String(s) => s.clone(),
                        other => format!("{other:?}"),
                    };
                    let full = if prefix.is_empty() {
                        key
                    } else {
                        format!("{prefix}.{key}")
                    };
                    self.flatten_yaml(&full, v);
                }
            }
            serde_yaml::Value::String(s) => {
                if !prefix.is_empty() {
                    self.set(prefix, s.clone());
                }
            }
            serde_yaml::Value::Bool(b) => {
                if !prefix.is_empty() {
                    self.set(prefix, b.to_string());
                }
            }
            serde_yaml::Value::Number(n) => {
                if !prefix.is_empty() {
                    self.set(prefix, n.to_string());
                }
            }
            _ => {}
        }
    }

    /// Overlay `SOPH_*` variables, mapping `_` to the key delimiter.
    pub fn load_env(&mut self, vars: impl Iterator<Item = (String, String)>) {
        for (key, value) in vars {
            if let Some(rest) = key.strip_prefix(ENV_PREFIX) {
                let flattened = rest.replace('_', ".");
                self.set(&flattened, value);
            }
        }
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).filter(|s| !s.is_empty()).map(PathBuf::from)
    }

    fn parse_or<T>(&self, key: &str, default: T, report: &mut ValidationReport) -> T
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => default,
            Some(value) => match value.parse() {
                Ok(parsed) => parsed,
                Err(err) => {
                    report.push(key, err.to_string());
                    default
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_raw() -> RawConfig {
        let mut raw = RawConfig::default();
        raw.set("security.sitekey", "k".repeat(64));
        raw.set("security.salt", "s".repeat(32));
        raw
    }

    #[test]
    fn defaults_apply_with_minimal_input() {
        let config = Config::from_raw(&minimal_raw()).unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.max_body_size, DEFAULT_MAX_BODY_SIZE);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.services.users.page_size, soph_services::DEFAULT_PAGE_SIZE);
        assert!(!config.development.enabled);
    }

    #[test]
    fn env_overrides_yaml() {
        let mut raw = minimal_raw();
        raw.load_yaml_str("server:\n  port: 9000\n").unwrap();
        raw.load_env(vec![("SOPH_SERVER_PORT".to_string(), "9443".to_string())].into_iter());
        let config = Config::from_raw(&raw).unwrap();
        assert_eq!(config.server.port, 9443);
    }

    #[test]
    fn camel_case_yaml_keys_match() {
        let mut raw = minimal_raw();
        raw.load_yaml_str("server:\n  maxBodySize: 1024\n  advertisedHost: api.example.com\n")
            .unwrap();
        let config = Config::from_raw(&raw).unwrap();
        assert_eq!(config.server.max_body_size, 1024);
        assert_eq!(config.server.advertised_host, "api.example.com");
    }

    #[test]
    fn site_key_must_be_exactly_64_bytes() {
        let mut raw = RawConfig::default();
        raw.set("security.sitekey", "short");
        raw.set("security.salt", "s".repeat(32));
        let err = Config::from_raw(&raw).unwrap_err();
        assert_eq!(err.kind(), soph_core::ErrorKind::Validation);
        assert!(err.fields().iter().any(|f| f.field == "security.siteKey"));
    }

    #[test]
    fn page_size_below_two_is_rejected() {
        let mut raw = minimal_raw();
        raw.set("services.users.pagesize", "1");
        let err = Config::from_raw(&raw).unwrap_err();
        assert!(err.fields().iter().any(|f| f.field == "services.users.pageSize"));
    }

    #[test]
    fn unknown_enum_values_are_validation_errors() {
        let mut raw = minimal_raw();
        raw.set("logging.level", "trace");
        assert!(Config::from_raw(&raw).is_err());

        let mut raw = minimal_raw();
        raw.set("tracing.output", "kafka");
        assert!(Config::from_raw(&raw).is_err());
    }

    #[test]
    fn static_root_token_requires_nothing_but_is_optional() {
        let mut raw = minimal_raw();
        raw.set("development.enabled", "true");
        raw.set("development.staticroottoken", "dev-token");
        let config = Config::from_raw(&raw).unwrap();
        assert_eq!(config.development.static_root_token.as_deref(), Some("dev-token"));
    }
}
