use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{Event, LastWill, MqttOptions, Outgoing, Packet, QoS};
use serde_derive::Serialize;

use crate::config;
use crate::messages::{Availability, Occupancy};

/// Where the controller sends occupancy changes.
pub trait PresenceBus: Send + Sync {
    /// Queues a retained occupancy message without waiting for delivery.
    fn publish(&self, occupancy: Occupancy) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    client_id: String,
    state_topic: String,
    availability_topic: String,
    discovery: Option<config::DiscoveryConfig>,
}

/// Home Assistant `binary_sensor` discovery document.
#[derive(Debug, Serialize)]
struct DiscoveryMessage<'a> {
    name: &'a str,
    unique_id: &'a str,
    state_topic: &'a str,
    availability_topic: &'a str,
    payload_on: &'static str,
    payload_off: &'static str,
    payload_available: &'static str,
    payload_not_available: &'static str,
    device_class: &'static str,
}

impl MqttClient {
    pub fn new(
        config: &config::MqttConfig,
        discovery: Option<&config::DiscoveryConfig>,
    ) -> (Self, rumqttc::EventLoop) {
        let client_id = config.client_id();
        let availability_topic = config.availability_topic();

        let mut mqttoptions =
            MqttOptions::new(client_id.clone(), config.host.clone(), config.port.unwrap_or(1883));

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(60)));
        mqttoptions.set_last_will(LastWill::new(
            availability_topic.clone(),
            Availability::Offline.payload(),
            QoS::AtLeastOnce,
            true,
        ));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (
            MqttClient {
                client,
                client_id,
                state_topic: config.state_topic(),
                availability_topic,
                discovery: discovery.filter(|d| d.enabled()).cloned(),
            },
            eventloop,
        )
    }

    /// Drives the connection until the client disconnects.
    ///
    /// Reconnecting is left to rumqttc: polling again after an error starts a new
    /// connection attempt.
    pub async fn event_loop(&self, eventloop: &mut rumqttc::EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("Connected to MQTT broker ({:?})", ack.code);
                    self.announce();
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("MQTT disconnect sent");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    /// Only queues messages: this runs on the task that drains the request queue, so
    /// waiting here for a free slot would stall the connection for good.
    fn announce(&self) {
        self.publish_retained(
            self.availability_topic.clone(),
            Availability::Online.payload().into(),
            "availability",
        );

        if let Some((topic, payload)) = self.discovery_message() {
            debug!("Publishing discovery config to {}", topic);
            self.publish_retained(topic, payload.into_bytes(), "discovery config");
        }
    }

    fn publish_retained(&self, topic: String, payload: Vec<u8>, what: &'static str) {
        match self
            .client
            .try_publish(topic.clone(), QoS::AtLeastOnce, true, payload.clone())
        {
            Ok(()) => {}
            Err(rumqttc::ClientError::TryRequest(_)) => {
                warn!("MQTT request queue full, deferring {}", what);
                let client = self.client.clone();
                tokio::task::spawn(async move {
                    if let Err(err) = client.publish(topic, QoS::AtLeastOnce, true, payload).await {
                        error!("Error publishing {}: {:?}", what, err);
                    }
                });
            }
            Err(err) => error!("Error publishing {}: {:?}", what, err),
        }
    }

    fn discovery_message(&self) -> Option<(String, String)> {
        let discovery = self.discovery.as_ref()?;
        let name = discovery.name();
        let message = DiscoveryMessage {
            name: &name,
            unique_id: &self.client_id,
            state_topic: &self.state_topic,
            availability_topic: &self.availability_topic,
            payload_on: Occupancy::Occupied.payload(),
            payload_off: Occupancy::Idle.payload(),
            payload_available: Availability::Online.payload(),
            payload_not_available: Availability::Offline.payload(),
            device_class: "occupancy",
        };
        match serde_json::to_string(&message) {
            Ok(payload) => Some((
                format!(
                    "{}/binary_sensor/{}/config",
                    discovery.prefix(),
                    sanitize_name(&self.client_id)
                ),
                payload,
            )),
            Err(err) => {
                error!("Error serializing discovery config: {:?}", err);
                None
            }
        }
    }

    /// Marks the controller offline and closes the connection.
    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client
            .publish(
                self.availability_topic.clone(),
                QoS::AtLeastOnce,
                true,
                Availability::Offline.payload(),
            )
            .await?;
        self.client.disconnect().await
    }
}

impl PresenceBus for MqttClient {
    fn publish(&self, occupancy: Occupancy) -> anyhow::Result<()> {
        info!("Publishing occupancy {} to {}", occupancy.payload(), self.state_topic);
        self.client.try_publish(
            self.state_topic.clone(),
            QoS::AtLeastOnce,
            true,
            occupancy.payload(),
        )?;
        Ok(())
    }
}

fn sanitize_name(name: &str) -> String {
    // Discovery object ids only allow [a-zA-Z0-9_-]
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mqtt_config() -> config::MqttConfig {
        toml::de::from_str("host = \"localhost\"").unwrap()
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("rpi5-motion-sensor"), "rpi5-motion-sensor");
        assert_eq!(sanitize_name("Hall PIR.1"), "hall_pir_1");
    }

    #[test]
    fn test_discovery_disabled_by_default() {
        let (client, _eventloop) = MqttClient::new(&mqtt_config(), None);
        assert!(client.discovery_message().is_none());

        let disabled = config::DiscoveryConfig {
            enabled: Some(false),
            ..Default::default()
        };
        let (client, _eventloop) = MqttClient::new(&mqtt_config(), Some(&disabled));
        assert!(client.discovery_message().is_none());
    }

    #[test]
    fn test_discovery_message() {
        let discovery = config::DiscoveryConfig::default();
        let (client, _eventloop) = MqttClient::new(&mqtt_config(), Some(&discovery));

        let (topic, payload) = client.discovery_message().unwrap();
        assert_eq!(topic, "homeassistant/binary_sensor/rpi5-motion-sensor/config");

        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["name"], "Motion");
        assert_eq!(json["unique_id"], "rpi5-motion-sensor");
        assert_eq!(json["state_topic"], "rpi5/motion");
        assert_eq!(json["availability_topic"], "rpi5/motion/availability");
        assert_eq!(json["payload_on"], "ON");
        assert_eq!(json["payload_not_available"], "offline");
        assert_eq!(json["device_class"], "occupancy");
    }

    #[test]
    fn test_publish_never_waits_for_the_broker() {
        let (client, _eventloop) = MqttClient::new(&mqtt_config(), None);
        // Nothing polls the event loop, so the request queue fills up
        for _ in 0..10 {
            assert!(client.publish(Occupancy::Occupied).is_ok());
        }
        assert!(client.publish(Occupancy::Idle).is_err());
    }

    #[tokio::test]
    async fn test_announce_with_full_queue_returns() {
        let (client, _eventloop) = MqttClient::new(
            &mqtt_config(),
            Some(&config::DiscoveryConfig::default()),
        );
        for _ in 0..10 {
            assert!(client.publish(Occupancy::Occupied).is_ok());
        }

        let announced =
            tokio::time::timeout(Duration::from_secs(1), async { client.announce() }).await;
        assert!(announced.is_ok());
        // Deferred announcements wait for a slot instead of taking one
        assert!(client.publish(Occupancy::Idle).is_err());
    }

    #[tokio::test]
    async fn test_announce_after_event_loop_dropped_returns() {
        let (client, eventloop) = MqttClient::new(&mqtt_config(), None);
        drop(eventloop);
        client.announce();
    }

    #[test]
    fn test_publish_after_event_loop_dropped_fails() {
        let (client, eventloop) = MqttClient::new(&mqtt_config(), None);
        drop(eventloop);
        assert!(client.publish(Occupancy::Occupied).is_err());
    }
}
