use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::config::Config;
use crate::models::{ConfigurationRecord, TelemetryMessage, WeatherTelemetry};
use crate::store::ConfigStore;
use crate::weather::{self, WeatherCondition};

/// Sentinel published on the festival state topic when no festival is set.
pub const FESTIVAL_NONE: &str = "none";

/// Options offered by the festival selector. The sentinel comes first.
pub const FESTIVAL_OPTIONS: [&str; 14] = [
    FESTIVAL_NONE,
    "new_year",
    "spring_festival",
    "lantern_festival",
    "valentines_day",
    "qingming",
    "dragon_boat_festival",
    "qixi",
    "mid_autumn_festival",
    "national_day",
    "halloween",
    "christmas_eve",
    "christmas",
    "new_years_eve",
];

/// Outstanding-request buffer of the client. The subscriptions and the
/// full announcement burst are queued before the event loop starts
/// polling, and rumqttc only drains this channel from `poll()`, so the
/// capacity must exceed that burst or the connection preamble blocks.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

/// An accepted broker command: the field patch to merge into the store and
/// the echo that confirms acceptance on the matching state topic.
pub(crate) struct BridgeCommand {
    pub patch: Value,
    pub echo_topic: String,
    pub echo_payload: String,
}

/// Bridge to the external pub/sub broker. Maintains one connection,
/// announces auto-discovery descriptors, mirrors the configuration record
/// onto state topics and translates inbound commands into store updates.
pub struct MqttService {
    client_state: Mutex<ClientState>,
    client: Mutex<Option<AsyncClient>>,
    store: Arc<ConfigStore>,
    telemetry: watch::Sender<Option<WeatherTelemetry>>,
    pub(crate) config: Config,
}

impl MqttService {
    pub fn new(
        store: Arc<ConfigStore>,
        telemetry: watch::Sender<Option<WeatherTelemetry>>,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            client_state: Mutex::new(ClientState::Disconnected),
            client: Mutex::new(None),
            store,
            telemetry,
            config,
        })
    }

    /// Supervised connection loop. Each attempt is independent; nothing is
    /// queued across disconnects, reconnection re-announces everything.
    pub async fn start(self: Arc<Self>) {
        info!("Starting MQTT bridge...");

        let retry_interval = Duration::from_millis(self.config.mqtt_reconnect_interval_ms);

        loop {
            let record = self.store.read().await;
            if record.mqtt_host.is_empty() {
                debug!(
                    "No MQTT broker configured. Re-checking in {:?}...",
                    retry_interval
                );
                sleep(retry_interval).await;
                continue;
            }

            debug!(
                "Configuring MQTT broker at {}:{}...",
                record.mqtt_host, record.mqtt_port
            );

            let client_id = format!("smartscreen_{}", Uuid::new_v4());
            let mut mqtt_options =
                MqttOptions::new(client_id, &record.mqtt_host, record.mqtt_port);
            mqtt_options.set_keep_alive(Duration::from_secs(10));
            mqtt_options.set_clean_session(true);

            if !record.mqtt_username.is_empty() && !record.mqtt_password.is_empty() {
                mqtt_options.set_credentials(&record.mqtt_username, &record.mqtt_password);
            }

            let (client, mut eventloop) =
                AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

            {
                let mut client_lock = self.client.lock().await;
                *client_lock = Some(client.clone());
            }

            {
                let mut client_state = self.client_state.lock().await;
                *client_state = ClientState::Connecting;
            }

            let mut subscribed = true;
            for topic in command_topics(&self.config) {
                if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
                    error!("Failed to subscribe to topic '{}': {}", topic, e);
                    let mut client_state = self.client_state.lock().await;
                    *client_state = ClientState::Error(e.to_string());
                    subscribed = false;
                    break;
                }
            }
            if !subscribed {
                // Drop the stale client so publishes in the retry window
                // take the not-connected branch.
                {
                    let mut client_lock = self.client.lock().await;
                    *client_lock = None;
                }
                sleep(retry_interval).await;
                continue;
            }

            {
                let mut client_state = self.client_state.lock().await;
                *client_state = ClientState::Connected;
            }
            info!("Subscribed to command topics.");

            // Announce before handling any inbound message, so external
            // observers converge on the current state right after connect.
            // The mirror subscription starts first so a write landing during
            // the announcement is still republished.
            let mut updates = self.store.subscribe();
            self.announce(&record).await;

            let mut reconnect = false;
            loop {
                tokio::select! {
                    event = eventloop.poll() => match event {
                        Ok(event) => self.handle_event(event).await,
                        Err(e) => {
                            error!("Error in MQTT event loop: {:?}", e);
                            break;
                        }
                    },
                    update = updates.recv() => match update {
                        // Mirror path: every store change republishes the
                        // derived state topics. A change to the broker
                        // connection parameters instead tears the
                        // connection down so they get applied.
                        Ok(updated) => {
                            if broker_settings_changed(&record, &updated) {
                                info!("Broker connection settings changed. Reconnecting.");
                                reconnect = true;
                                break;
                            }
                            self.publish_states(&updated).await;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!("Store updates lagged by {}. Republishing latest.", skipped);
                            let latest = self.store.read().await;
                            if broker_settings_changed(&record, &latest) {
                                reconnect = true;
                                break;
                            }
                            self.publish_states(&latest).await;
                        }
                        Err(RecvError::Closed) => {
                            warn!("Configuration store is gone. Stopping the MQTT bridge.");
                            return;
                        }
                    },
                }
            }

            {
                let mut client_lock = self.client.lock().await;
                *client_lock = None;
            }
            {
                let mut client_state = self.client_state.lock().await;
                *client_state = ClientState::Disconnected;
            }

            if reconnect {
                continue;
            }

            warn!(
                "Lost connection to MQTT broker. Retrying in {:?}...",
                retry_interval
            );
            sleep(retry_interval).await;
        }
    }

    async fn handle_event(&self, event: Event) {
        match event {
            Event::Incoming(Packet::Publish(publish)) => {
                let topic = publish.topic.clone();
                let payload =
                    String::from_utf8(publish.payload.to_vec()).unwrap_or_else(|_| "".to_string());
                self.handle_message(&topic, &payload).await;
            }
            Event::Incoming(Packet::ConnAck(_)) => {
                info!("Connected to MQTT broker.");
            }
            Event::Outgoing(_) => {
                debug!("Outgoing event.");
            }
            _ => {
                debug!("Unhandled event: {:?}", event);
            }
        }
    }

    async fn handle_message(&self, topic: &str, payload: &str) {
        if topic == self.config.weather_telemetry_topic {
            match serde_json::from_str::<TelemetryMessage>(payload) {
                Ok(msg) => {
                    let telemetry = weather::normalize(&msg);
                    debug!(
                        "Weather telemetry: {} -> {}",
                        telemetry.raw_state,
                        telemetry.condition.as_str()
                    );
                    // The rendering layer only cares about the latest value.
                    let _ = self.telemetry.send(Some(telemetry));
                }
                Err(e) => error!("Failed to parse weather telemetry: {}", e),
            }
            return;
        }

        match translate_command(&self.config, topic, payload) {
            Some(command) => match self.store.merge(command.patch).await {
                Ok(_) => {
                    self.publish_message(
                        &command.echo_topic,
                        &command.echo_payload,
                        QoS::AtLeastOnce,
                        true,
                    )
                    .await;
                }
                Err(e) => warn!("Rejected command on '{}': {}", topic, e),
            },
            None => warn!("Unknown topic received: {}", topic),
        }
    }

    /// Publishes the discovery descriptors followed by the current state
    /// topics.
    async fn announce(&self, record: &ConfigurationRecord) {
        for (topic, payload) in discovery_announcements(&self.config) {
            self.publish_message(&topic, &payload, QoS::AtLeastOnce, true)
                .await;
        }
        self.publish_states(record).await;
    }

    async fn publish_states(&self, record: &ConfigurationRecord) {
        for (topic, payload) in state_announcements(&self.config, record) {
            self.publish_message(&topic, &payload, QoS::AtLeastOnce, true)
                .await;
        }
    }

    /// Single-attempt publish. Without a live client the message is dropped
    /// silently: state is always "latest", never a backlog.
    pub async fn publish_message(&self, topic: &str, message: &str, qos: QoS, retain: bool) {
        let client = self.client.lock().await;
        if let Some(client) = client.as_ref() {
            match client.publish(topic, qos, retain, message).await {
                Ok(_) => debug!("Message published to '{}': {}", topic, message),
                Err(e) => error!("Failed to publish message to '{}': {:?}", topic, e),
            }
        } else {
            debug!("MQTT client is not connected. Dropping message for '{}'.", topic);
        }
    }
}

/// Topics the bridge subscribes to on every connection attempt.
pub(crate) fn command_topics(config: &Config) -> [String; 5] {
    [
        config.demo_mode_command_topic.clone(),
        config.demo_state_command_topic.clone(),
        config.demo_festival_command_topic.clone(),
        config.weather_entity_command_topic.clone(),
        config.weather_telemetry_topic.clone(),
    ]
}

/// True when the updated record's broker connection parameters differ from
/// the ones the live connection was built with.
pub(crate) fn broker_settings_changed(
    current: &ConfigurationRecord,
    updated: &ConfigurationRecord,
) -> bool {
    current.mqtt_host != updated.mqtt_host
        || current.mqtt_port != updated.mqtt_port
        || current.mqtt_username != updated.mqtt_username
        || current.mqtt_password != updated.mqtt_password
}

/// Translates an inbound command message into a store patch plus the echo
/// confirming acceptance. Returns None for unknown topics.
pub(crate) fn translate_command(
    config: &Config,
    topic: &str,
    payload: &str,
) -> Option<BridgeCommand> {
    if topic == config.demo_mode_command_topic {
        Some(BridgeCommand {
            patch: json!({ "demo_mode": payload == "ON" }),
            echo_topic: config.demo_mode_state_topic.clone(),
            echo_payload: payload.to_string(),
        })
    } else if topic == config.demo_state_command_topic {
        Some(BridgeCommand {
            patch: json!({ "demo_state": payload }),
            echo_topic: config.demo_state_state_topic.clone(),
            echo_payload: payload.to_string(),
        })
    } else if topic == config.demo_festival_command_topic {
        let festival = if payload == FESTIVAL_NONE { "" } else { payload };
        Some(BridgeCommand {
            patch: json!({ "demo_festival": festival }),
            echo_topic: config.demo_festival_state_topic.clone(),
            echo_payload: payload.to_string(),
        })
    } else if topic == config.weather_entity_command_topic {
        Some(BridgeCommand {
            patch: json!({ "weather_entity": payload }),
            echo_topic: config.weather_entity_state_topic.clone(),
            echo_payload: payload.to_string(),
        })
    } else {
        None
    }
}

fn device_descriptor() -> Value {
    json!({
        "identifiers": ["smartscreen_weather"],
        "name": "SmartScreen Weather Display",
        "manufacturer": "SmartScreen",
        "model": "Weather Display",
        "sw_version": env!("CARGO_PKG_VERSION"),
    })
}

/// Auto-discovery descriptors for the four controllable entities, tagged
/// with the shared device identity so the broker front end groups them.
pub(crate) fn discovery_announcements(config: &Config) -> Vec<(String, String)> {
    let device = device_descriptor();
    let state_options: Vec<&str> = WeatherCondition::ALL.iter().map(|c| c.as_str()).collect();

    vec![
        (
            format!("{}/switch/smartscreen_demo_mode/config", config.discovery_prefix),
            json!({
                "name": "SmartScreen Demo Mode",
                "unique_id": "smartscreen_demo_mode",
                "command_topic": config.demo_mode_command_topic,
                "state_topic": config.demo_mode_state_topic,
                "payload_on": "ON",
                "payload_off": "OFF",
                "device": device,
            })
            .to_string(),
        ),
        (
            format!("{}/select/smartscreen_demo_state/config", config.discovery_prefix),
            json!({
                "name": "SmartScreen Weather State",
                "unique_id": "smartscreen_demo_state",
                "command_topic": config.demo_state_command_topic,
                "state_topic": config.demo_state_state_topic,
                "options": state_options,
                "device": device,
            })
            .to_string(),
        ),
        (
            format!("{}/select/smartscreen_demo_festival/config", config.discovery_prefix),
            json!({
                "name": "SmartScreen Festival Effect",
                "unique_id": "smartscreen_demo_festival",
                "command_topic": config.demo_festival_command_topic,
                "state_topic": config.demo_festival_state_topic,
                "options": FESTIVAL_OPTIONS,
                "device": device,
            })
            .to_string(),
        ),
        (
            format!("{}/text/smartscreen_weather_entity/config", config.discovery_prefix),
            json!({
                "name": "SmartScreen Weather Entity",
                "unique_id": "smartscreen_weather_entity",
                "command_topic": config.weather_entity_command_topic,
                "state_topic": config.weather_entity_state_topic,
                "device": device,
            })
            .to_string(),
        ),
    ]
}

/// Derived state topics mirroring the configuration record.
pub(crate) fn state_announcements(
    config: &Config,
    record: &ConfigurationRecord,
) -> Vec<(String, String)> {
    vec![
        (
            config.demo_mode_state_topic.clone(),
            if record.demo_mode { "ON" } else { "OFF" }.to_string(),
        ),
        (
            config.demo_state_state_topic.clone(),
            record.demo_state.as_str().to_string(),
        ),
        (
            config.demo_festival_state_topic.clone(),
            if record.demo_festival.is_empty() {
                FESTIVAL_NONE.to_string()
            } else {
                record.demo_festival.clone()
            },
        ),
        (
            config.weather_entity_state_topic.clone(),
            record.weather_entity.clone(),
        ),
    ]
}
