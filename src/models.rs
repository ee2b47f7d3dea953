use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::weather::WeatherCondition;

/// The single configuration record owned by the bridge. All fields have
/// defaults so a partially populated config file still loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationRecord {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: String,
    pub mqtt_password: String,
    pub weather_entity: String,
    pub location_name: String,
    pub demo_mode: bool,
    pub demo_state: WeatherCondition,
    pub demo_festival: String,
}

impl Default for ConfigurationRecord {
    fn default() -> Self {
        Self {
            mqtt_host: String::new(),
            mqtt_port: 1883,
            mqtt_username: String::new(),
            mqtt_password: String::new(),
            weather_entity: "weather.forecast_home".to_string(),
            location_name: String::new(),
            demo_mode: false,
            demo_state: WeatherCondition::ClearDay,
            demo_festival: String::new(),
        }
    }
}

/// Inbound weather telemetry payload as published on the broker.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryMessage {
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub friendly_name: Option<String>,
}

/// Normalized weather value handed to the rendering layer. Ephemeral;
/// only the most recent one matters.
#[derive(Debug, Clone, Serialize)]
pub struct WeatherTelemetry {
    pub condition: WeatherCondition,
    pub raw_state: String,
    pub temperature: Option<f64>,
    pub attributes: Map<String, Value>,
    pub friendly_name: String,
    pub display_text: Option<String>,
}
