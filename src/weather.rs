use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{TelemetryMessage, WeatherTelemetry};

/// Canonical icon keys. Every upstream weather vocabulary is normalized
/// into exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WeatherCondition {
    ClearDay,
    ClearNight,
    PartlyCloudyDay,
    Cloudy,
    LightRain,
    ModerateRain,
    HeavyRain,
    StormRain,
    LightSnow,
    ModerateSnow,
    HeavySnow,
    ThunderShower,
    Hail,
    Wind,
    Fog,
}

impl WeatherCondition {
    pub const ALL: [WeatherCondition; 15] = [
        WeatherCondition::ClearDay,
        WeatherCondition::ClearNight,
        WeatherCondition::PartlyCloudyDay,
        WeatherCondition::Cloudy,
        WeatherCondition::LightRain,
        WeatherCondition::ModerateRain,
        WeatherCondition::HeavyRain,
        WeatherCondition::StormRain,
        WeatherCondition::LightSnow,
        WeatherCondition::ModerateSnow,
        WeatherCondition::HeavySnow,
        WeatherCondition::ThunderShower,
        WeatherCondition::Hail,
        WeatherCondition::Wind,
        WeatherCondition::Fog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WeatherCondition::ClearDay => "CLEAR_DAY",
            WeatherCondition::ClearNight => "CLEAR_NIGHT",
            WeatherCondition::PartlyCloudyDay => "PARTLY_CLOUDY_DAY",
            WeatherCondition::Cloudy => "CLOUDY",
            WeatherCondition::LightRain => "LIGHT_RAIN",
            WeatherCondition::ModerateRain => "MODERATE_RAIN",
            WeatherCondition::HeavyRain => "HEAVY_RAIN",
            WeatherCondition::StormRain => "STORM_RAIN",
            WeatherCondition::LightSnow => "LIGHT_SNOW",
            WeatherCondition::ModerateSnow => "MODERATE_SNOW",
            WeatherCondition::HeavySnow => "HEAVY_SNOW",
            WeatherCondition::ThunderShower => "THUNDER_SHOWER",
            WeatherCondition::Hail => "HAIL",
            WeatherCondition::Wind => "WIND",
            WeatherCondition::Fog => "FOG",
        }
    }
}

/// The three provider payload shapes seen on the telemetry topic.
#[derive(Debug)]
pub enum ProviderPayload<'a> {
    /// Family A: a sky condition code is present in the attributes.
    SkyCode(&'a str),
    /// Family B: a condition text plus a numeric icon id.
    ConditionIcon { text: &'a str, icon: String },
    /// Anything else: only the primary state field is usable.
    State(&'a str),
}

impl<'a> ProviderPayload<'a> {
    pub fn classify(msg: &'a TelemetryMessage) -> Self {
        if let Some(code) = msg.attributes.get("skycon").and_then(Value::as_str) {
            return ProviderPayload::SkyCode(code);
        }
        if let (Some(text), Some(icon)) = (
            msg.attributes.get("condition_cn").and_then(Value::as_str),
            msg.attributes.get("qweather_icon"),
        ) {
            // The icon id arrives either as a string or a bare number.
            let icon = match icon {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return ProviderPayload::ConditionIcon { text, icon };
        }
        ProviderPayload::State(&msg.state)
    }
}

/// Family-A code table. Canonical names map to themselves; provider-only
/// codes are folded onto the nearest canonical key.
fn map_sky_code(code: &str) -> Option<WeatherCondition> {
    if let Some(condition) = WeatherCondition::ALL
        .iter()
        .find(|c| c.as_str() == code)
        .copied()
    {
        return Some(condition);
    }
    match code {
        "PARTLY_CLOUDY_NIGHT" => Some(WeatherCondition::PartlyCloudyDay),
        "STORM_SNOW" => Some(WeatherCondition::HeavySnow),
        "LIGHT_HAZE" | "MODERATE_HAZE" | "HEAVY_HAZE" => Some(WeatherCondition::Fog),
        "DUST" | "SAND" => Some(WeatherCondition::Wind),
        _ => None,
    }
}

/// Family-B icon id table (numeric weather-service icon codes).
fn map_icon_id(icon: &str) -> Option<WeatherCondition> {
    match icon {
        "100" => Some(WeatherCondition::ClearDay),
        "150" => Some(WeatherCondition::ClearNight),
        "101" | "102" | "103" | "151" | "152" | "153" => Some(WeatherCondition::PartlyCloudyDay),
        "104" => Some(WeatherCondition::Cloudy),
        "300" | "305" | "309" | "314" => Some(WeatherCondition::LightRain),
        "301" | "306" | "315" => Some(WeatherCondition::ModerateRain),
        "307" | "316" => Some(WeatherCondition::HeavyRain),
        "308" | "310" | "311" | "312" | "317" | "318" => Some(WeatherCondition::StormRain),
        "302" | "303" => Some(WeatherCondition::ThunderShower),
        "304" => Some(WeatherCondition::Hail),
        "400" | "404" | "405" | "406" | "407" => Some(WeatherCondition::LightSnow),
        "401" | "408" | "409" => Some(WeatherCondition::ModerateSnow),
        "402" | "403" | "410" => Some(WeatherCondition::HeavySnow),
        "500" | "501" | "502" | "509" | "510" | "511" | "512" | "513" | "514" | "515" => {
            Some(WeatherCondition::Fog)
        }
        "503" | "504" | "507" | "508" => Some(WeatherCondition::Wind),
        _ => None,
    }
}

/// Generic textual-state normalizer. Case-insensitive; exact synonyms
/// first, then a keyword scan in fixed priority order; unrecognized text
/// defaults to CLOUDY. Total by construction.
pub fn normalize_state(raw: &str) -> WeatherCondition {
    let state = raw.trim().to_ascii_lowercase();

    let exact = match state.as_str() {
        "sunny" | "clear" | "clear-day" => Some(WeatherCondition::ClearDay),
        "clear-night" => Some(WeatherCondition::ClearNight),
        "partlycloudy" | "partly-cloudy" => Some(WeatherCondition::PartlyCloudyDay),
        "cloudy" | "overcast" | "exceptional" => Some(WeatherCondition::Cloudy),
        "rainy" | "rain" | "drizzle" => Some(WeatherCondition::LightRain),
        "pouring" => Some(WeatherCondition::StormRain),
        "snowy" | "snow" => Some(WeatherCondition::ModerateSnow),
        "snowy-rainy" | "sleet" => Some(WeatherCondition::LightSnow),
        "lightning" | "lightning-rainy" | "thunderstorm" => Some(WeatherCondition::ThunderShower),
        "hail" => Some(WeatherCondition::Hail),
        "windy" | "windy-variant" | "wind" => Some(WeatherCondition::Wind),
        "fog" | "foggy" | "mist" | "haze" => Some(WeatherCondition::Fog),
        _ => None,
    };
    if let Some(condition) = exact {
        return condition;
    }

    const KEYWORDS: [(&str, WeatherCondition); 20] = [
        ("thunder", WeatherCondition::ThunderShower),
        ("lightning", WeatherCondition::ThunderShower),
        ("hail", WeatherCondition::Hail),
        ("pouring", WeatherCondition::StormRain),
        ("storm", WeatherCondition::StormRain),
        ("heavy snow", WeatherCondition::HeavySnow),
        ("sleet", WeatherCondition::LightSnow),
        ("snow", WeatherCondition::ModerateSnow),
        ("heavy rain", WeatherCondition::HeavyRain),
        ("drizzle", WeatherCondition::LightRain),
        ("shower", WeatherCondition::LightRain),
        ("rain", WeatherCondition::LightRain),
        ("fog", WeatherCondition::Fog),
        ("mist", WeatherCondition::Fog),
        ("haze", WeatherCondition::Fog),
        ("wind", WeatherCondition::Wind),
        ("night", WeatherCondition::ClearNight),
        ("partly", WeatherCondition::PartlyCloudyDay),
        ("sun", WeatherCondition::ClearDay),
        ("clear", WeatherCondition::ClearDay),
    ];
    for (keyword, condition) in KEYWORDS {
        if state.contains(keyword) {
            return condition;
        }
    }

    WeatherCondition::Cloudy
}

/// Normalizes one inbound telemetry message into the canonical telemetry
/// value. Pure and total; runs on every message from the broker.
pub fn normalize(msg: &TelemetryMessage) -> WeatherTelemetry {
    let (condition, raw_state, display_text) = match ProviderPayload::classify(msg) {
        ProviderPayload::SkyCode(code) => (
            map_sky_code(code).unwrap_or_else(|| normalize_state(code)),
            code.to_string(),
            None,
        ),
        ProviderPayload::ConditionIcon { text, icon } => (
            map_icon_id(&icon).unwrap_or_else(|| normalize_state(&msg.state)),
            text.to_string(),
            Some(text.to_string()),
        ),
        ProviderPayload::State(state) => (normalize_state(state), state.to_string(), None),
    };

    let temperature = msg
        .attributes
        .get("temperature")
        .and_then(Value::as_f64)
        .or(msg.temperature);

    WeatherTelemetry {
        condition,
        raw_state,
        temperature,
        attributes: msg.attributes.clone(),
        friendly_name: msg.friendly_name.clone().unwrap_or_default(),
        display_text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(value: serde_json::Value) -> TelemetryMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn every_condition_is_reachable_from_its_sky_code() {
        for condition in WeatherCondition::ALL {
            let msg = message(json!({
                "state": "whatever",
                "attributes": { "skycon": condition.as_str() }
            }));
            assert_eq!(normalize(&msg).condition, condition);
        }
    }

    #[test]
    fn aliased_sky_codes_fold_onto_canonical_keys() {
        let cases = [
            ("PARTLY_CLOUDY_NIGHT", WeatherCondition::PartlyCloudyDay),
            ("STORM_SNOW", WeatherCondition::HeavySnow),
            ("MODERATE_HAZE", WeatherCondition::Fog),
            ("DUST", WeatherCondition::Wind),
        ];
        for (code, expected) in cases {
            let msg = message(json!({
                "state": "cloudy",
                "attributes": { "skycon": code }
            }));
            assert_eq!(normalize(&msg).condition, expected);
        }
    }

    #[test]
    fn unknown_sky_code_falls_back_to_generic_normalizer() {
        let msg = message(json!({
            "state": "cloudy",
            "attributes": { "skycon": "SLEET_BURST" }
        }));
        // Generic normalizer runs on the code text itself.
        assert_eq!(normalize(&msg).condition, WeatherCondition::LightSnow);

        let msg = message(json!({
            "state": "cloudy",
            "attributes": { "skycon": "AURORA" }
        }));
        assert_eq!(normalize(&msg).condition, WeatherCondition::Cloudy);
    }

    #[test]
    fn icon_id_mapping_preserves_display_text() {
        let msg = message(json!({
            "state": "sunny",
            "attributes": { "condition_cn": "晴", "qweather_icon": "100" }
        }));
        let telemetry = normalize(&msg);
        assert_eq!(telemetry.condition, WeatherCondition::ClearDay);
        assert_eq!(telemetry.display_text.as_deref(), Some("晴"));
        assert_eq!(telemetry.raw_state, "晴");
    }

    #[test]
    fn numeric_icon_id_is_accepted() {
        let msg = message(json!({
            "state": "cloudy",
            "attributes": { "condition_cn": "阴", "qweather_icon": 104 }
        }));
        assert_eq!(normalize(&msg).condition, WeatherCondition::Cloudy);
    }

    #[test]
    fn unknown_icon_id_falls_back_to_primary_state() {
        let msg = message(json!({
            "state": "rainy",
            "attributes": { "condition_cn": "小雨", "qweather_icon": "999" }
        }));
        let telemetry = normalize(&msg);
        assert_eq!(telemetry.condition, WeatherCondition::LightRain);
        assert_eq!(telemetry.display_text.as_deref(), Some("小雨"));
    }

    #[test]
    fn plain_state_normalizes_without_attributes() {
        let msg = message(json!({ "state": "sunny", "attributes": {} }));
        let telemetry = normalize(&msg);
        assert_eq!(telemetry.condition, WeatherCondition::ClearDay);
        assert_eq!(telemetry.temperature, None);
        assert_eq!(telemetry.friendly_name, "");
    }

    #[test]
    fn generic_normalizer_is_case_insensitive_and_total() {
        assert_eq!(normalize_state("Sunny"), WeatherCondition::ClearDay);
        assert_eq!(normalize_state("clear-night"), WeatherCondition::ClearNight);
        assert_eq!(normalize_state("partlycloudy"), WeatherCondition::PartlyCloudyDay);
        assert_eq!(normalize_state("Heavy Rain"), WeatherCondition::HeavyRain);
        assert_eq!(normalize_state("lightning-rainy"), WeatherCondition::ThunderShower);
        assert_eq!(normalize_state(""), WeatherCondition::Cloudy);
        assert_eq!(normalize_state("definitely not weather"), WeatherCondition::Cloudy);
    }

    #[test]
    fn temperature_prefers_attributes_over_top_level() {
        let msg = message(json!({
            "state": "sunny",
            "attributes": { "temperature": 21.5 },
            "temperature": 4.0
        }));
        assert_eq!(normalize(&msg).temperature, Some(21.5));

        let msg = message(json!({ "state": "sunny", "temperature": 4.0 }));
        assert_eq!(normalize(&msg).temperature, Some(4.0));
    }
}
