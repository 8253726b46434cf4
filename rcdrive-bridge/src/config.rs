use derive_more::{Display, Error, From};
use log::{debug, info, warn, LevelFilter};
use rcdrive_protocol::Speed;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Baud rate the vehicle's UART runs at
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_HTTP_PORT: u16 = 3000;
/// Longest a single byte write may block before it counts as failed
pub const MAX_WRITE_TIMEOUT_MS: u64 = 2000;

/// Configurable log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    #[must_use]
    pub const fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::Off,
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
        }
    }
}

#[derive(Debug, Display, Error, From)]
pub enum ConfigError {
    #[display("config I/O error: {_0}")]
    Io(std::io::Error),
    #[display("invalid config JSON: {_0}")]
    Json(serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address the control server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_http_port(),
        }
    }
}

impl HttpConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Port to open on startup instead of the best discovered one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Connect on startup
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    /// Retry the last port this often after it drops (0 = never)
    #[serde(default)]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

const fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

const fn default_true() -> bool {
    true
}

const fn default_write_timeout_ms() -> u64 {
    200
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            port: None,
            auto_connect: true,
            reconnect_interval_ms: 0,
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl SerialConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Option<Duration> {
        (self.reconnect_interval_ms > 0).then(|| Duration::from_millis(self.reconnect_interval_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    /// Speed step reported until the first speed command is sent (0-9)
    #[serde(default = "default_initial_speed")]
    pub initial_speed: u8,
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_initial_speed() -> u8 {
    Speed::default().get()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            serial: SerialConfig::default(),
            initial_speed: default_initial_speed(),
            log_level: LogLevel::default(),
        }
    }
}

impl Config {
    /// Clamp values to valid ranges and fix invalid values
    pub fn validate(&mut self) {
        if Speed::new(self.initial_speed).is_none() {
            let clamped = Speed::saturating(self.initial_speed).get();
            warn!("Clamping initial_speed from {} to {clamped}", self.initial_speed);
            self.initial_speed = clamped;
        }
        if self.serial.baud_rate == 0 {
            warn!("Baud rate is 0, resetting to {DEFAULT_BAUD_RATE}");
            self.serial.baud_rate = DEFAULT_BAUD_RATE;
        }
        if self.serial.write_timeout_ms == 0 {
            warn!("write_timeout_ms is 0, resetting to default");
            self.serial.write_timeout_ms = default_write_timeout_ms();
        } else if self.serial.write_timeout_ms > MAX_WRITE_TIMEOUT_MS {
            warn!(
                "Clamping write_timeout_ms from {} to {MAX_WRITE_TIMEOUT_MS}",
                self.serial.write_timeout_ms
            );
            self.serial.write_timeout_ms = MAX_WRITE_TIMEOUT_MS;
        }
        if self.serial.port.as_deref().is_some_and(|p| p.trim().is_empty()) {
            warn!("Configured serial port is empty, using discovery");
            self.serial.port = None;
        }
    }

    pub fn initial_speed(&self) -> Speed {
        Speed::saturating(self.initial_speed)
    }

    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(mut config) => {
                info!("Loaded config from {}", path.display());
                config.validate();
                config
            }
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("Failed to load config from {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let json = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&json)?;
        debug!(
            "Config parsed: http.port={}, serial.port={:?}, log_level={:?}",
            config.http.port, config.serial.port, config.log_level
        );
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        debug!("Saving config to {}", path.display());
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Config saved to {}", path.display());
        Ok(())
    }
}
