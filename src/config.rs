//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use reqwest::Url;

use crate::error::ConfigError;

/// Directory under the system temp dir that caches user avatars.
const GRAVATAR_DIRNAME: &str = "bkit_g";

/// Command-line flags; each can also come from the environment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "asset-daemon",
    about = "Local task daemon between the asset plugin and the marketplace"
)]
pub struct Args {
    /// Local port to listen on
    #[arg(long, env = "ASSET_DAEMON_PORT", default_value_t = 62485)]
    pub port: u16,
    /// Marketplace server base URL
    #[arg(long = "server", env = "ASSET_DAEMON_SERVER", default_value = "https://www.blenderkit.com")]
    pub server_url: String,
    /// Identity sent as X-System-ID; a random id is generated when empty
    #[arg(long, env = "ASSET_DAEMON_SYSTEM_ID", default_value = "")]
    pub system_id: String,
    /// Version reported to clients and in the User-Agent
    #[arg(long, env = "ASSET_DAEMON_VERSION", default_value = env!("CARGO_PKG_VERSION"))]
    pub version: String,
    /// Shut down after this many seconds without a client report
    #[arg(long, env = "ASSET_DAEMON_IDLE_TIMEOUT_SECS", default_value_t = 180)]
    pub idle_timeout_secs: u64,
    /// Maximum concurrent thumbnail fetches
    #[arg(long, env = "ASSET_DAEMON_THUMBNAIL_CONCURRENCY", default_value_t = 16)]
    pub thumbnail_concurrency: usize,
    /// Also write logs to <dir>/asset-daemon.log
    #[arg(long, env = "ASSET_DAEMON_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

/// Per-pool HTTP settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub api_timeout: Duration,
    pub thumbnail_timeout: Duration,
    /// Asset downloads and uploads.
    pub transfer_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            api_timeout: Duration::from_secs(30),
            thumbnail_timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(3600), // 1 hour
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub port: u16,
    pub server_url: String,
    pub system_id: String,
    pub version: String,
    /// Shut down once no client reported for this long.
    pub idle_timeout: Duration,
    /// How often the watchdog checks liveness.
    pub watchdog_period: Duration,
    pub thumbnail_concurrency: usize,
    pub log_dir: Option<PathBuf>,
    /// Delay before shutting down after the last client disconnects.
    pub disconnect_grace: Duration,
    /// Delay before honouring an explicit shutdown request.
    pub shutdown_grace: Duration,
    pub gravatar_dir: PathBuf,
    pub http: HttpConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 62485,
            server_url: "https://www.blenderkit.com".to_string(),
            system_id: generate_system_id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            idle_timeout: Duration::from_secs(180),
            watchdog_period: Duration::from_secs(180),
            thumbnail_concurrency: 16,
            log_dir: None,
            disconnect_grace: Duration::from_secs(1),
            shutdown_grace: Duration::from_millis(100),
            gravatar_dir: std::env::temp_dir().join(GRAVATAR_DIRNAME),
            http: HttpConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let idle_timeout = Duration::from_secs(args.idle_timeout_secs);
        let config = Self {
            port: args.port,
            server_url: args.server_url.trim_end_matches('/').to_string(),
            system_id: if args.system_id.is_empty() {
                generate_system_id()
            } else {
                args.system_id
            },
            version: args.version,
            idle_timeout,
            watchdog_period: idle_timeout,
            thumbnail_concurrency: args.thumbnail_concurrency,
            log_dir: args.log_dir,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(invalid("port", "must be non-zero"));
        }
        let url = Url::parse(&self.server_url).map_err(|e| invalid("server", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("server", "scheme must be http or https"));
        }
        if !self.system_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("system-id", "must contain digits only"));
        }
        if self.idle_timeout.is_zero() {
            return Err(invalid("idle-timeout-secs", "must be at least one second"));
        }
        if self.thumbnail_concurrency == 0 {
            return Err(invalid("thumbnail-concurrency", "must be at least 1"));
        }
        Ok(())
    }

    pub fn user_agent(&self) -> String {
        format!("asset-daemon/{}", self.version)
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

/// Random 15-digit id.
fn generate_system_id() -> String {
    rand::thread_rng()
        .gen_range(100_000_000_000_000u64..1_000_000_000_000_000)
        .to_string()
}
