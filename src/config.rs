//! Configuration management for the MJPEG server

use crate::encoder::{AspectRatio, DEFAULT_JPEG_QUALITY};
use crate::stream::{content_type, DEFAULT_BOUNDARY};
use serde::{Deserialize, Serialize};
use std::net::UdpSocket;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub capture: CaptureConfig,
}

/// Settings for one streaming server instance.
///
/// The server copies this on `start` and never changes it while running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    /// TCP port, 0 picks a free one
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    /// multipart boundary token, without the leading dashes
    #[serde(default = "default_boundary")]
    pub boundary: String,

    /// Longest a single part may take to reach the client's socket
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Re-send the current frame after this much producer silence (0 = never)
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,

    /// Time allowed for a client to send its request head
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long `stop` waits for connections before aborting them
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Statistics reporting interval (seconds, 0 = off)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_seconds: u64,
}

impl ServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Value of the `/stream` response `Content-Type` header
    pub fn content_type(&self) -> String {
        content_type(&self.boundary)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_ip, self.port)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_ms > 0).then(|| Duration::from_millis(self.keepalive_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_boundary(&self.boundary)?;

        if self.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "server: write-timeout-ms must be > 0".to_string(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "server: request-timeout-ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_ip: default_bind_ip(),
            boundary: default_boundary(),
            write_timeout_ms: default_write_timeout_ms(),
            keepalive_ms: default_keepalive_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            stats_interval_seconds: default_stats_interval(),
        }
    }
}

/// Frame source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CaptureConfig {
    /// Run the built-in test-pattern source
    #[serde(default = "default_capture_enabled")]
    pub enabled: bool,

    /// Frame width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Frame height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Frames per second
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// JPEG quality (1-100)
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Output aspect ratio, "W:H" or decimal
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: AspectRatio,
}

impl CaptureConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(
                "capture: width and height must be > 0".to_string(),
            ));
        }

        if self.fps == 0 || self.fps > 120 {
            return Err(ConfigError::Invalid(format!(
                "capture: fps must be between 1 and 120, got {}",
                self.fps
            )));
        }

        if self.quality == 0 || self.quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "capture: quality must be between 1 and 100, got {}",
                self.quality
            )));
        }

        Ok(())
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: default_capture_enabled(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            quality: default_quality(),
            aspect_ratio: default_aspect_ratio(),
        }
    }
}

// Default value functions
fn default_port() -> u16 {
    8080
}

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_boundary() -> String {
    DEFAULT_BOUNDARY.to_string()
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

fn default_keepalive_ms() -> u64 {
    1_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_shutdown_grace_ms() -> u64 {
    1_000
}

fn default_stats_interval() -> u64 {
    30
}

fn default_capture_enabled() -> bool {
    true
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

fn default_fps() -> u32 {
    30
}

fn default_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

fn default_aspect_ratio() -> AspectRatio {
    AspectRatio::SQUARE
}

/// RFC 2046 boundary chars minus space, since the header value is unquoted
fn validate_boundary(boundary: &str) -> Result<(), ConfigError> {
    const SPECIALS: &str = "'()+_,-./:=?";

    let valid_chars = boundary
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || SPECIALS.contains(c));

    if boundary.is_empty() || boundary.len() > 70 || !valid_chars {
        return Err(ConfigError::Invalid(format!(
            "server: invalid multipart boundary '{}'",
            boundary
        )));
    }

    Ok(())
}

impl Config {
    /// Loads configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// Validates configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.capture.validate()
    }

    /// Saves configuration to TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

/// Attempt to get the local IP address by connecting to an external address
pub fn get_local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let local_addr = socket.local_addr().ok()?;
    Some(local_addr.ip().to_string())
}

/// URL a browser on the LAN should open for the viewer page
pub fn viewer_url(port: u16) -> String {
    let host = get_local_ip().unwrap_or_else(|| "127.0.0.1".to_string());
    format!("http://{}:{}/", host, port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.boundary, "MJPEGBOUNDARY");
        assert_eq!(config.capture.quality, 80);
        assert_eq!(config.capture.aspect_ratio, AspectRatio::SQUARE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
[server]
port = 9090
bind-ip = "127.0.0.1"
write-timeout-ms = 2500
keepalive-ms = 0

[capture]
width = 1280
height = 720
fps = 15
quality = 90
aspect-ratio = "16:9"
        "#;

        let config: Config = toml.parse().unwrap();

        assert_eq!(config.server.bind_addr(), "127.0.0.1:9090");
        assert_eq!(config.server.write_timeout(), Duration::from_millis(2500));
        assert_eq!(config.server.keepalive(), None);
        assert_eq!(config.server.boundary, "MJPEGBOUNDARY");
        assert_eq!(config.capture.width, 1280);
        assert_eq!(config.capture.fps, 15);
        assert!((config.capture.aspect_ratio.value() - 16.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.capture.width, 640);
    }

    #[test]
    fn test_invalid_fps() {
        let result = "[capture]\nfps = 0\n".parse::<Config>();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_aspect_ratio() {
        let result = "[capture]\naspect-ratio = \"0:1\"\n".parse::<Config>();
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_boundary() {
        let too_long = "x".repeat(71);
        for boundary in ["", "has\"quote", "trailing ", too_long.as_str()] {
            let config = ServerConfig {
                boundary: boundary.to_string(),
                ..ServerConfig::default()
            };
            assert!(config.validate().is_err(), "accepted {:?}", boundary);
        }
    }

    #[test]
    fn test_content_type_follows_boundary() {
        let config = ServerConfig {
            boundary: "frame".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(config.content_type(), "multipart/x-mixed-replace; boundary=frame");
    }

    #[test]
    fn test_load_and_save() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 8181").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 8181);

        let out = tempfile::NamedTempFile::new().unwrap();
        config.save(out.path()).unwrap();
        let reloaded = Config::load(out.path()).unwrap();
        assert_eq!(reloaded.server.port, 8181);
        assert_eq!(reloaded.capture.aspect_ratio, config.capture.aspect_ratio);
    }
}
