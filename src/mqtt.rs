use std::time::Duration;

use log::{debug, error, info};
use rumqttc::{LastWill, MqttOptions, QoS};
use tokio::sync::broadcast;

use crate::config;
use crate::discovery::Publisher;
use crate::messages::BusEvent;

/// Thin wrapper around the rumqttc client. All publishing is best-effort:
/// if the broker is unreachable or the request queue is full, the message
/// is dropped rather than awaited.
#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    topic_path: String,
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .as_ref()
            .unwrap_or(&"blehub".to_string())
            .to_string();
        let topic_path = config.topic_path.clone().unwrap_or("ble".to_string());

        let mut mqttoptions = MqttOptions::new(
            publisher_id,
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));
        mqttoptions.set_last_will(LastWill::new(
            format!("{topic_path}/state"),
            "offline",
            QoS::AtLeastOnce,
            true,
        ));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (Self { client, topic_path }, eventloop)
    }

    pub fn topic_path(&self) -> &str {
        &self.topic_path
    }

    /// Drive the connection and notify the manager when the broker accepts
    /// us, so retained presence state can be re-broadcast.
    pub async fn event_loop(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        tx: broadcast::Sender<BusEvent>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker");
                    self.publish(&format!("{}/state", self.topic_path), "online", true);
                    if let Err(err) = tx.send(BusEvent::Connected) {
                        error!("Error announcing MQTT connection: {err:?}");
                    }
                }
                Ok(notification) => {
                    debug!("MQTT notification: {notification:?}");
                }
                Err(e) => {
                    error!("Error polling MQTT event loop: {e:?}");
                    // rumqttc reconnects on the next poll; don't spin
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await
    }
}

impl Publisher for MqttClient {
    fn publish(&self, topic: &str, payload: &str, retain: bool) {
        if let Err(err) = self
            .client
            .try_publish(topic, QoS::AtMostOnce, retain, payload)
        {
            // disconnected or backlogged: drop it, advertisements repeat
            debug!("Dropping MQTT message for {topic}: {err:?}");
        }
    }
}
