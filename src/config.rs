//! Configuration for the MIDI WebSocket gateway
//!
//! Everything comes from the command line or the environment (see `main.rs`);
//! this module holds the parsed values and their defaults.

use anyhow::{anyhow, bail, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

/// Environment variable listing allowed cross-origin request origins
pub const CORS_ORIGINS_ENV: &str = "CORS_ORIGINS";

/// Root server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub cors: CorsOrigins,
    pub fade: FadeDefaults,
}

/// Origins allowed to make cross-origin requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

impl CorsOrigins {
    /// Parse the `CORS_ORIGINS` value: a JSON array of origin strings
    ///
    /// Missing or malformed values allow every origin, with a warning.
    pub fn from_env_value(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            warn!(
                "Missing defined ENV variable {}, using default value [\"*\"].",
                CORS_ORIGINS_ENV
            );
            return CorsOrigins::Any;
        };

        match serde_json::from_str::<Vec<String>>(raw) {
            Ok(origins) if origins.iter().any(|o| o == "*") => CorsOrigins::Any,
            Ok(origins) => CorsOrigins::List(origins),
            Err(e) => {
                warn!(
                    "Invalid {} value ({}), using default value [\"*\"].",
                    CORS_ORIGINS_ENV, e
                );
                CorsOrigins::Any
            }
        }
    }
}

/// Values used for fields a start request leaves out
#[derive(Debug, Clone, PartialEq)]
pub struct FadeDefaults {
    /// Output device; the first available output when unset
    pub device: Option<String>,
    pub channels: Vec<u8>,
    pub steps: u32,
    pub step_delay: Duration,
    pub control: u8,
}

impl Default for FadeDefaults {
    fn default() -> Self {
        Self {
            device: None,
            channels: default_fade_channels(),
            steps: default_fade_steps(),
            step_delay: default_fade_step_delay(),
            control: default_fade_control(),
        }
    }
}

impl FadeDefaults {
    /// Check the defaults are usable on their own
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            bail!("Default fade steps must be at least 1");
        }
        if self.channels.is_empty() {
            bail!("Default fade channels must not be empty");
        }
        Ok(())
    }
}

// Default value functions

fn default_fade_channels() -> Vec<u8> {
    (0..16).collect()
}

fn default_fade_steps() -> u32 {
    20
}

fn default_fade_step_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_fade_control() -> u8 {
    // Channel volume
    7
}

/// Convert seconds (the unit used on the command line and HTTP surface) to a duration,
/// rejecting negative and non-finite values
pub fn duration_from_secs(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("Invalid delay {}s: {}", secs, e))
}
