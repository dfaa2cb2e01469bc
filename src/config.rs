use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the gateway
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Maintenance-mode middleware settings
    #[serde(default)]
    pub wrenchmode: MaintenanceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// HTTP port (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Address of the wrapped application, e.g. "127.0.0.1:3000"
    #[serde(default)]
    pub upstream: String,

    /// Max time to wait for the upstream application to respond
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum idle connections kept to the upstream (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
            upstream: String::new(),
            request_timeout_secs: default_request_timeout(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
        }
    }
}

/// Settings for the maintenance-mode middleware.
///
/// Constructed once when the middleware is created and never mutated afterwards.
#[derive(Debug, Deserialize, Clone)]
pub struct MaintenanceConfig {
    /// Project token sent as the `Authorization` header to the control plane
    pub jwt: Option<String>,

    /// Environment variable consulted when `jwt` is not set
    #[serde(default = "default_jwt_env")]
    pub jwt_env: String,

    /// Never divert traffic, even when the control plane says switched
    #[serde(default)]
    pub force_open: bool,

    /// Treat a switch flagged as test mode as not switched
    #[serde(default = "default_true")]
    pub ignore_test_mode: bool,

    /// Ignore reverse-proxy instructions from the control plane and always redirect
    #[serde(default)]
    pub disable_reverse_proxy: bool,

    /// Also match the allow-list against proxy-reported client addresses
    #[serde(default)]
    pub trust_remote_ip: bool,

    #[serde(default = "default_status_protocol")]
    pub status_protocol: String,

    #[serde(default = "default_status_host")]
    pub status_host: String,

    #[serde(default = "default_status_path")]
    pub status_path: String,

    /// Delay between status polls in seconds
    #[serde(default = "default_check_delay")]
    pub check_delay_secs: u64,

    /// Connect and read timeout for the status call in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Emit middleware log events
    #[serde(default)]
    pub logging: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            jwt: None,
            jwt_env: default_jwt_env(),
            force_open: false,
            ignore_test_mode: true,
            disable_reverse_proxy: false,
            trust_remote_ip: false,
            status_protocol: default_status_protocol(),
            status_host: default_status_host(),
            status_path: default_status_path(),
            check_delay_secs: default_check_delay(),
            read_timeout_secs: default_read_timeout(),
            logging: false,
        }
    }
}

impl MaintenanceConfig {
    /// Create a config with the given token and defaults for everything else
    pub fn with_jwt(jwt: impl Into<String>) -> Self {
        Self {
            jwt: Some(jwt.into()),
            ..Self::default()
        }
    }

    /// Full URL of the control-plane status endpoint
    pub fn status_url(&self) -> String {
        format!(
            "{}://{}{}",
            self.status_protocol, self.status_host, self.status_path
        )
    }

    pub fn check_delay(&self) -> Duration {
        Duration::from_secs(self.check_delay_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Fill in `jwt` from the `jwt_env` variable when it was not configured.
    ///
    /// Runs once at startup so the request path never touches the environment.
    pub fn resolve_jwt(mut self) -> Self {
        if self.jwt.is_none() {
            self.jwt = std::env::var(&self.jwt_env)
                .ok()
                .filter(|value| !value.is_empty());
        }
        self
    }

    /// The configured token, or `MissingCredential` if there is none
    pub fn credential(&self) -> Result<&str, ConfigError> {
        match self.jwt.as_deref() {
            Some(jwt) if !jwt.is_empty() => Ok(jwt),
            _ => Err(ConfigError::MissingCredential),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.status_protocol != "http" && self.status_protocol != "https" {
            return Err(ConfigError::Invalid(format!(
                "status_protocol must be http or https, got '{}'",
                self.status_protocol
            )));
        }
        if self.status_host.is_empty() {
            return Err(ConfigError::Invalid("status_host must not be empty".into()));
        }
        if self.check_delay_secs == 0 {
            return Err(ConfigError::Invalid(
                "check_delay_secs must be greater than 0".into(),
            ));
        }
        if self.read_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "read_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn default_listen_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_true() -> bool {
    true
}

fn default_jwt_env() -> String {
    "WRENCHMODE_JWT".to_string()
}

fn default_status_protocol() -> String {
    "https".to_string()
}

fn default_status_host() -> String {
    "api.wrenchmode.com".to_string()
}

fn default_status_path() -> String {
    "/api/projects/status".to_string()
}

fn default_check_delay() -> u64 {
    5
}

fn default_read_timeout() -> u64 {
    3
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.upstream.is_empty() {
            anyhow::bail!("server.upstream must be set to the address of the wrapped application");
        }
        if !self.server.upstream.contains(':') {
            anyhow::bail!(
                "server.upstream must be host:port, got '{}'",
                self.server.upstream
            );
        }
        if self.server.request_timeout_secs == 0 {
            anyhow::bail!("server.request_timeout_secs must be greater than 0");
        }
        self.wrenchmode.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 9090
bind = "127.0.0.1"
upstream = "127.0.0.1:3000"
request_timeout_secs = 10

[wrenchmode]
jwt = "project-token"
force_open = true
ignore_test_mode = false
disable_reverse_proxy = true
trust_remote_ip = true
status_protocol = "http"
status_host = "localhost:4000"
status_path = "/status"
check_delay_secs = 2
read_timeout_secs = 1
logging = true
"#;
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.upstream, "127.0.0.1:3000");
        assert_eq!(config.server.request_timeout(), Duration::from_secs(10));

        let wm = &config.wrenchmode;
        assert_eq!(wm.jwt.as_deref(), Some("project-token"));
        assert!(wm.force_open);
        assert!(!wm.ignore_test_mode);
        assert!(wm.disable_reverse_proxy);
        assert!(wm.trust_remote_ip);
        assert!(wm.logging);
        assert_eq!(wm.status_url(), "http://localhost:4000/status");
        assert_eq!(wm.check_delay(), Duration::from_secs(2));
        assert_eq!(wm.read_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_maintenance_defaults() {
        let wm = MaintenanceConfig::default();

        assert!(wm.jwt.is_none());
        assert_eq!(wm.jwt_env, "WRENCHMODE_JWT");
        assert!(!wm.force_open);
        assert!(wm.ignore_test_mode);
        assert!(!wm.disable_reverse_proxy);
        assert!(!wm.trust_remote_ip);
        assert!(!wm.logging);
        assert_eq!(wm.status_url(), "https://api.wrenchmode.com/api/projects/status");
        assert_eq!(wm.check_delay(), Duration::from_secs(5));
        assert_eq!(wm.read_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert!(config.wrenchmode.ignore_test_mode);
        // No upstream configured
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credential_missing() {
        let wm = MaintenanceConfig::default();
        assert!(matches!(wm.credential(), Err(ConfigError::MissingCredential)));

        let wm = MaintenanceConfig {
            jwt: Some(String::new()),
            ..MaintenanceConfig::default()
        };
        assert!(matches!(wm.credential(), Err(ConfigError::MissingCredential)));

        let wm = MaintenanceConfig::with_jwt("abc");
        assert_eq!(wm.credential().unwrap(), "abc");
    }

    #[test]
    fn test_resolve_jwt_from_env() {
        let var = "WRENCHMODE_TEST_RESOLVE_JWT";
        std::env::set_var(var, "from-env");

        let wm = MaintenanceConfig {
            jwt_env: var.to_string(),
            ..MaintenanceConfig::default()
        }
        .resolve_jwt();
        assert_eq!(wm.jwt.as_deref(), Some("from-env"));

        // An explicit token wins over the environment
        let wm = MaintenanceConfig {
            jwt: Some("explicit".to_string()),
            jwt_env: var.to_string(),
            ..MaintenanceConfig::default()
        }
        .resolve_jwt();
        assert_eq!(wm.jwt.as_deref(), Some("explicit"));

        std::env::remove_var(var);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let wm = MaintenanceConfig {
            status_protocol: "ftp".to_string(),
            ..MaintenanceConfig::default()
        };
        assert!(wm.validate().is_err());

        let wm = MaintenanceConfig {
            check_delay_secs: 0,
            ..MaintenanceConfig::default()
        };
        assert!(wm.validate().is_err());

        let wm = MaintenanceConfig {
            read_timeout_secs: 0,
            ..MaintenanceConfig::default()
        };
        assert!(wm.validate().is_err());

        assert!(MaintenanceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[server]\nupstream = \"127.0.0.1:3000\"\n\n[wrenchmode]\njwt = \"t\"\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.wrenchmode.jwt.as_deref(), Some("t"));
        assert_eq!(config.server.upstream, "127.0.0.1:3000");
    }
}
