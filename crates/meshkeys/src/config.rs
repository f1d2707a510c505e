use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};

pub const MASTER_KEY_ENV: &str = "MESHKEYS_MASTER_KEY";
pub const TOKEN_SECRET_ENV: &str = "MESHKEYS_TOKEN_SECRET";
pub const DB_PATH_ENV: &str = "MESHKEYS_DB_PATH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", .0.display())]
    ReadFailed(path::PathBuf),
    #[error("failed to write config file {}", .0.display())]
    WriteFailed(path::PathBuf),
    #[error("failed to parse config: {0}")]
    ParseFailed(String),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: Server,
    pub store: Store,
    pub auth: Auth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub bind: String,
    pub port: u16,
    /// Address enrolling nodes use to reach this server; embedded in access strings.
    pub public_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Store {
    pub path: String,
    pub pool_size: usize,
    /// Longest a single statement blocks on another connection's lock before
    /// yielding. Write-lock acquisition is retried until the operation deadline.
    pub busy_timeout_ms: u64,
    /// Deadline for each store call.
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Auth {
    /// Superuser capability. Empty disables it.
    pub master_key: String,
    /// HMAC secret for bearer tokens. Empty means a random per-process secret.
    pub token_secret: String,
    pub token_ttl_secs: u64,
    /// Argon2id memory cost in KiB
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,
}

impl Default for Server {
    fn default() -> Self {
        Self { bind: "0.0.0.0".into(), port: 8081, public_address: "localhost:8081".into() }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self {
            path: "meshkeys.db".into(),
            pool_size: 16,
            busy_timeout_ms: 50,
            operation_timeout_ms: 10_000,
        }
    }
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            master_key: String::new(),
            token_secret: String::new(),
            token_ttl_secs: 24 * 60 * 60,
            argon2_memory_kib: 19 * 1024,
            argon2_iterations: 2,
            argon2_parallelism: 1,
        }
    }
}

impl Store {
    /// Never longer than the operation deadline, since a busy wait blocks its thread.
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms.min(self.operation_timeout_ms))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Auth {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/meshkeys/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("meshkeys/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };
        let redacted = |secret: &str| if secret.is_empty() { "<unset>" } else { "<redacted>" };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Server")?;
        write_1(f, "Bind Address", &self.server.bind)?;
        write_1(f, "Port", &self.server.port)?;
        write_1(f, "Public Address", &self.server.public_address)?;
        write_title_1(f, "Store")?;
        write_1(f, "Path", &self.store.path)?;
        write_1(f, "Pool Size", &self.store.pool_size)?;
        write_1(f, "Busy Timeout (ms)", &self.store.busy_timeout_ms)?;
        write_1(f, "Operation Timeout (ms)", &self.store.operation_timeout_ms)?;
        write_title_1(f, "Auth")?;
        write_1(f, "Master Key", &redacted(&self.auth.master_key))?;
        write_1(f, "Token Secret", &redacted(&self.auth.token_secret))?;
        write_1(f, "Token TTL (s)", &self.auth.token_ttl_secs)?;
        write_1(f, "Argon2 Memory (KiB)", &self.auth.argon2_memory_kib)?;
        write_1(f, "Argon2 Iterations", &self.auth.argon2_iterations)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/meshkeys/config.toml
    ///  or the specified path, with the name config.toml if one does not exist.
    /// Environment overrides are applied afterwards and never written back.
    ///
    /// ```no_run
    /// let cfg = meshkeys::Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), meshkeys::config::ConfigError>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let mut config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|_err| ConfigError::ReadFailed(config_path.clone()))?;
            Self::from_toml(&raw_string)?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            config
        };

        config.apply_env();
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|err| ConfigError::ParseFailed(err.message().to_string()))
    }

    /// Overlay secrets and the database path from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(master_key) = env::var(MASTER_KEY_ENV) {
            self.auth.master_key = master_key;
        }
        if let Ok(secret) = env::var(TOKEN_SECRET_ENV) {
            self.auth.token_secret = secret;
        }
        if let Ok(path) = env::var(DB_PATH_ENV) {
            self.store.path = path;
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)
            .map_err(|err| ConfigError::ParseFailed(err.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|_err| ConfigError::WriteFailed(path.to_path_buf()))?;
        }

        fs::write(path, config_str).map_err(|_err| ConfigError::WriteFailed(path.to_path_buf()))
    }
}
