use crate::packet::{ETH_PPPOE_DISCOVERY, ETH_PPPOE_SESSION};
use log::LevelFilter;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_SERVICE_NAME: &str = "rfc4938";
pub const DEFAULT_MAX_NEIGHBORS: u32 = 256;
pub const DEFAULT_CLIENT_PORT: u16 = 6001;
pub const DEFAULT_CTL_PORT: u16 = 6002;
pub const DEFAULT_CREDIT_GRANT: u16 = 256;
pub const DEFAULT_CREDIT_SCALAR: u16 = 64;
pub const DEFAULT_HELLO_INTERVAL: u16 = 5;
pub const DEFAULT_SINR_MIN: f32 = 0.0;
pub const DEFAULT_SINR_MAX: f32 = 20.0;
pub const DEFAULT_CREDIT_THRESHOLD: f32 = 0.25;
pub const DEFAULT_SESSION_TIMEOUT: u16 = 60;

/// How the locally granted credits are spread across neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditDistMode {
    Even,
    Flat,
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VifMode {
    Raw,
    Tap,
}

/// Daemon configuration, read from a `KEY VALUE` text file.
#[derive(Debug, Clone)]
pub struct Config {
    pub iface: String,
    pub node_id: u32,
    pub max_neighbors: u32,
    pub port: u16,
    pub ctl_port: u16,
    pub service_name: String,
    pub debug_level: u8,
    pub credit_grant: u16,
    pub credit_scalar: u16,
    pub hello_interval: u16,
    pub sinr_min: f32,
    pub sinr_max: f32,
    pub vif_mode: VifMode,
    pub platform_endpoint: String,
    pub transport_endpoint: String,
    pub pppoe_binary_path: String,
    pub p2p_mode: bool,
    pub lcp_echo_pong_mode: bool,
    pub credit_dist_mode: CreditDistMode,
    pub flow_control_enabled: bool,
    pub credit_threshold: f32,
    pub session_timeout: u16,
    pub eth_discovery: u16,
    pub eth_session: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            iface: "eth0".to_string(),
            node_id: 0,
            max_neighbors: DEFAULT_MAX_NEIGHBORS,
            port: DEFAULT_CLIENT_PORT,
            ctl_port: DEFAULT_CTL_PORT,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            debug_level: 1,
            credit_grant: DEFAULT_CREDIT_GRANT,
            credit_scalar: DEFAULT_CREDIT_SCALAR,
            hello_interval: DEFAULT_HELLO_INTERVAL,
            sinr_min: DEFAULT_SINR_MIN,
            sinr_max: DEFAULT_SINR_MAX,
            vif_mode: VifMode::Raw,
            platform_endpoint: String::new(),
            transport_endpoint: String::new(),
            pppoe_binary_path: String::new(),
            p2p_mode: true,
            lcp_echo_pong_mode: false,
            credit_dist_mode: CreditDistMode::Direct,
            flow_control_enabled: false,
            credit_threshold: DEFAULT_CREDIT_THRESHOLD,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            eth_discovery: ETH_PPPOE_DISCOVERY,
            eth_session: ETH_PPPOE_SESSION,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;

        Self::parse(&text)
    }

    /// Parse `KEY VALUE` pairs. `#` starts a comment; blank lines are
    /// ignored; unknown keys are fatal.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in text.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.split_whitespace();
            let key = parts.next().unwrap();
            let value = parts
                .next()
                .ok_or_else(|| ConfigError::MissingValue(key.to_string()))?;

            match key {
                "IFACE" => config.iface = value.to_string(),
                "NODE_ID" => config.node_id = parse_value(key, value)?,
                "MAX_NEIGHBORS" => config.max_neighbors = parse_value(key, value)?,
                "PORT" => config.port = parse_value(key, value)?,
                "CTL_PORT" => config.ctl_port = parse_value(key, value)?,
                "SERVICE_NAME" => config.service_name = value.to_string(),
                "DEBUG_LEVEL" => config.debug_level = parse_value(key, value)?,
                "CREDIT_GRANT" => config.credit_grant = parse_value(key, value)?,
                "CREDIT_SCALAR" => config.credit_scalar = parse_value(key, value)?,
                "HELLO_INTERVAL" | "PROP_INTERVAL" => {
                    config.hello_interval = parse_value(key, value)?
                }
                "SINR_MIN" => config.sinr_min = parse_value(key, value)?,
                "SINR_MAX" => config.sinr_max = parse_value(key, value)?,
                "VIF_MODE" => {
                    config.vif_mode = match parse_value::<u8>(key, value)? {
                        0 => VifMode::Raw,
                        1 => VifMode::Tap,
                        _ => return Err(ConfigError::bad_value(key, value)),
                    }
                }
                "PLATFORM_ENDPOINT" => config.platform_endpoint = value.to_string(),
                "TRANSPORT_ENDPOINT" => config.transport_endpoint = value.to_string(),
                "PPPOE_BINARY_PATH" => config.pppoe_binary_path = value.to_string(),
                "P2P_MODE" => config.p2p_mode = parse_value::<u8>(key, value)? != 0,
                "LCP_ECHO_PONG_MODE" => {
                    config.lcp_echo_pong_mode = parse_value::<u8>(key, value)? != 0
                }
                "CREDIT_DIST_MODE" => {
                    config.credit_dist_mode = match parse_value::<u8>(key, value)? {
                        0 => CreditDistMode::Even,
                        1 => CreditDistMode::Flat,
                        2 => CreditDistMode::Direct,
                        _ => return Err(ConfigError::bad_value(key, value)),
                    }
                }
                "FLOW_CONTROL_ENABLED" => {
                    config.flow_control_enabled = parse_value::<u8>(key, value)? != 0
                }
                "CREDIT_THRESHOLD" => config.credit_threshold = parse_value(key, value)?,
                "SESSION_TIMEOUT" => config.session_timeout = parse_value(key, value)?,
                other => return Err(ConfigError::UnknownKey(other.to_string())),
            }
        }

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id == 0 {
            return Err(ConfigError::MissingNodeId);
        }

        if self.sinr_max <= self.sinr_min {
            return Err(ConfigError::InvalidSinrRange {
                min: self.sinr_min,
                max: self.sinr_max,
            });
        }

        if !(0.0..=1.0).contains(&self.credit_threshold) {
            return Err(ConfigError::InvalidThreshold(self.credit_threshold));
        }

        Ok(())
    }

    /// Map `DEBUG_LEVEL` 0..3 onto the log facade.
    pub fn log_level(&self) -> LevelFilter {
        match self.debug_level {
            0 => LevelFilter::Error,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::bad_value(key, value))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("problem opening config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("NODE_ID is required and must not be 0")]
    MissingNodeId,
    #[error("missing value for key {0}")]
    MissingValue(String),
    #[error("unknown config key {0}")]
    UnknownKey(String),
    #[error("invalid value '{value}' for key {key}")]
    InvalidValue { key: String, value: String },
    #[error("invalid SINR range (min {min}, max {max})")]
    InvalidSinrRange { min: f32, max: f32 },
    #[error("CREDIT_THRESHOLD of {0} is invalid, must be [0.0 - 1.0]")]
    InvalidThreshold(f32),
}

impl ConfigError {
    fn bad_value(key: &str, value: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied() {
        let config = Config::parse("NODE_ID 10\n").unwrap();

        assert_eq!(config.service_name, "rfc4938");
        assert_eq!(config.max_neighbors, 256);
        assert_eq!(config.port, 6001);
        assert_eq!(config.credit_grant, 256);
        assert_eq!(config.credit_scalar, 64);
        assert_eq!(config.credit_dist_mode, CreditDistMode::Direct);
        assert_eq!(config.credit_threshold, 0.25);
        assert!(config.p2p_mode);
    }

    #[test]
    fn full_file_parses() {
        let text = "\
# node configuration
IFACE emane0
NODE_ID 10
MAX_NEIGHBORS 32
PORT 6001
CTL_PORT 6010

SERVICE_NAME rfc4938
DEBUG_LEVEL 2
CREDIT_GRANT 512
CREDIT_SCALAR 128
PROP_INTERVAL 10
SINR_MIN 0.0
SINR_MAX 20.0
VIF_MODE 1
PLATFORM_ENDPOINT localhost:8181
TRANSPORT_ENDPOINT localhost:8281
P2P_MODE 0
LCP_ECHO_PONG_MODE 1
CREDIT_DIST_MODE 0
FLOW_CONTROL_ENABLED 1
CREDIT_THRESHOLD 0.5
SESSION_TIMEOUT 120
";
        let config = Config::parse(text).unwrap();

        assert_eq!(config.iface, "emane0");
        assert_eq!(config.node_id, 10);
        assert_eq!(config.max_neighbors, 32);
        assert_eq!(config.ctl_port, 6010);
        assert_eq!(config.hello_interval, 10);
        assert_eq!(config.vif_mode, VifMode::Tap);
        assert!(!config.p2p_mode);
        assert!(config.lcp_echo_pong_mode);
        assert_eq!(config.credit_dist_mode, CreditDistMode::Even);
        assert!(config.flow_control_enabled);
        assert_eq!(config.credit_threshold, 0.5);
        assert_eq!(config.session_timeout, 120);
    }

    #[test]
    fn node_id_required() {
        assert!(matches!(
            Config::parse("IFACE eth0\n"),
            Err(ConfigError::MissingNodeId)
        ));
        assert!(matches!(
            Config::parse("NODE_ID 0\n"),
            Err(ConfigError::MissingNodeId)
        ));
    }

    #[test]
    fn unknown_key_fatal() {
        assert!(matches!(
            Config::parse("NODE_ID 10\nBOGUS_KEY 1\n"),
            Err(ConfigError::UnknownKey(k)) if k == "BOGUS_KEY"
        ));
    }

    #[test]
    fn threshold_bounds_enforced() {
        assert!(matches!(
            Config::parse("NODE_ID 10\nCREDIT_THRESHOLD 1.5\n"),
            Err(ConfigError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn sinr_range_enforced() {
        assert!(matches!(
            Config::parse("NODE_ID 10\nSINR_MIN 10\nSINR_MAX 5\n"),
            Err(ConfigError::InvalidSinrRange { .. })
        ));
    }

    #[test]
    fn bad_number_rejected() {
        assert!(matches!(
            Config::parse("NODE_ID ten\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
