//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! A missing config file is not fatal; the relay starts on built-in
//! defaults with a warning, since a file-less deployment only needs the
//! account store next to the binary.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
}

/// HTTP server settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Account store settings
#[derive(Debug, Deserialize)]
pub struct AccountsConfig {
    #[serde(default = "default_accounts_path")]
    pub path: PathBuf,
    #[serde(default = "default_balance")]
    pub default_balance: f64,
}

fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8000".parse().expect("static address")
}

fn default_timeout() -> u64 {
    300
}

fn default_max_connections() -> usize {
    1000
}

fn default_accounts_path() -> PathBuf {
    PathBuf::from("accounts.txt")
}

fn default_balance() -> f64 {
    5.0
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            timeout_secs: default_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            path: default_accounts_path(),
            default_balance: default_balance(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            accounts: AccountsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment
    /// variables and validate.
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&contents)?
        } else {
            warn!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        };

        if let Ok(accounts_path) = std::env::var("ACCOUNTS_PATH") {
            config.accounts.path = PathBuf::from(accounts_path);
        }

        if config.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if config.accounts.default_balance < 0.0 {
            return Err(common::Error::Config(
                "default_balance must not be negative".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("freeplay-relay.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    #[test]
    fn load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ACCOUNTS_PATH") };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
listen_addr = "127.0.0.1:9000"
timeout_secs = 120
max_connections = 64

[accounts]
path = "/var/lib/relay/accounts.txt"
default_balance = 3.5
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.server.timeout_secs, 120);
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.accounts.path, PathBuf::from("/var/lib/relay/accounts.txt"));
        assert_eq!(config.accounts.default_balance, 3.5);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ACCOUNTS_PATH") };
        let config = Config::load(Path::new("/nonexistent/relay.toml")).unwrap();
        assert_eq!(config.server.listen_addr.port(), 8000);
        assert_eq!(config.server.timeout_secs, 300);
        assert_eq!(config.accounts.path, PathBuf::from("accounts.txt"));
        assert_eq!(config.accounts.default_balance, 5.0);
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ACCOUNTS_PATH") };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\ntimeout_secs = 30\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.timeout_secs, 30);
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.accounts.default_balance, 5.0);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not valid {{{{ toml").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn accounts_path_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[accounts]\npath = \"from-file.txt\"\n").unwrap();

        unsafe { set_env("ACCOUNTS_PATH", "/env/accounts.txt") };
        let config = Config::load(&path).unwrap();
        assert_eq!(config.accounts.path, PathBuf::from("/env/accounts.txt"));
        unsafe { remove_env("ACCOUNTS_PATH") };
    }

    #[test]
    fn zero_timeout_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ACCOUNTS_PATH") };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\ntimeout_secs = 0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn zero_max_connections_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ACCOUNTS_PATH") };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nmax_connections = 0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn negative_default_balance_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("ACCOUNTS_PATH") };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[accounts]\ndefault_balance = -1.0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();

        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        assert_eq!(
            Config::resolve_path(Some("/cli/wins.toml")),
            PathBuf::from("/cli/wins.toml")
        );
        assert_eq!(Config::resolve_path(None), PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };

        assert_eq!(
            Config::resolve_path(None),
            PathBuf::from("freeplay-relay.toml")
        );
    }
}
