use dotenvy::dotenv;
use std::env;
use thiserror::Error;

/// Process-level configuration. The mutable device configuration lives in
/// the ConfigStore; this only covers ports, paths and topic names.
#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub config_path: String,
    pub discovery_prefix: String,
    pub mqtt_reconnect_interval_ms: u64,

    pub demo_mode_command_topic: String,
    pub demo_mode_state_topic: String,
    pub demo_state_command_topic: String,
    pub demo_state_state_topic: String,
    pub demo_festival_command_topic: String,
    pub demo_festival_state_topic: String,
    pub weather_entity_command_topic: String,
    pub weather_entity_state_topic: String,
    pub weather_telemetry_topic: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable {0} is missing or invalid.")]
    MissingOrInvalid(String),
    #[error("Parsing error: {0}")]
    ParsingError(String),
}

impl Config {
    /// Validate timing values before the services start.
    fn validate_timeouts(&self) -> Result<(), ConfigError> {
        const MIN_INTERVAL: u64 = 100;
        const MAX_INTERVAL: u64 = 1_000_000;

        if !(MIN_INTERVAL..=MAX_INTERVAL).contains(&self.mqtt_reconnect_interval_ms) {
            return Err(ConfigError::ParsingError(format!(
                "MQTT_RECONNECT_INTERVAL_MS must be between {} and {} ms",
                MIN_INTERVAL, MAX_INTERVAL
            )));
        }

        Ok(())
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok(); // Load environment variables from .env file

        let topic_root = env::var("TOPIC_ROOT").unwrap_or_else(|_| "smartscreen".to_string());
        if topic_root.trim_matches('/').is_empty() {
            return Err(ConfigError::MissingOrInvalid("TOPIC_ROOT".to_string()));
        }
        let discovery_prefix =
            env::var("DISCOVERY_PREFIX").unwrap_or_else(|_| "homeassistant".to_string());
        if discovery_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::MissingOrInvalid("DISCOVERY_PREFIX".to_string()));
        }

        // Helper to prepend the root namespace to a topic suffix
        let topic = |suffix: &str| {
            format!(
                "{}/{}",
                topic_root.trim_end_matches('/'),
                suffix.trim_start_matches('/')
            )
        };

        let config = Self {
            http_port: env::var("HTTP_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse::<u16>()
                .map_err(|_| {
                    ConfigError::ParsingError("HTTP_PORT must be a valid port number".to_string())
                })?,
            config_path: env::var("CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string()),
            discovery_prefix,
            mqtt_reconnect_interval_ms: env::var("MQTT_RECONNECT_INTERVAL_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse::<u64>()
                .map_err(|_| {
                    ConfigError::ParsingError(
                        "MQTT_RECONNECT_INTERVAL_MS must be a valid number".to_string(),
                    )
                })?,

            // Broker command/state topics
            demo_mode_command_topic: topic("demo_mode/set"),
            demo_mode_state_topic: topic("demo_mode/state"),
            demo_state_command_topic: topic("demo_state/set"),
            demo_state_state_topic: topic("demo_state/state"),
            demo_festival_command_topic: topic("demo_festival/set"),
            demo_festival_state_topic: topic("demo_festival/state"),
            weather_entity_command_topic: topic("weather_entity/set"),
            weather_entity_state_topic: topic("weather_entity/state"),
            weather_telemetry_topic: topic("weather/state"),
        };

        config.validate_timeouts()?;

        Ok(config)
    }
}
