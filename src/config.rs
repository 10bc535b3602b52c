use std::collections::HashMap;
use std::time::Duration;

use serde_derive::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub scan: Option<ScanConfig>,
    pub advertise: Option<AdvertiseConfig>,
    pub devices: Option<Vec<KnownDevice>>,
    /// Operator-supplied generic decoders: service uuid -> field name for byte 0.
    pub advertised_services: Option<HashMap<String, AdvertisedService>>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

/// A device the operator has named ahead of time. `address` is either a MAC
/// address or, for proximity beacons, the `uuid-major-minor` composite key.
#[derive(Deserialize, Debug, Clone)]
pub struct KnownDevice {
    pub address: String,
    pub name: String,
    /// Calibrated RSSI at one meter, overriding the value broadcast in the frame.
    pub measured_power: Option<i16>,
    /// Beacons estimated farther away than this are reported `not_home`.
    pub max_distance: Option<f64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScanConfig {
    pub presence_timeout_seconds: Option<u64>,
    pub ble_timeout_seconds: Option<u64>,
    pub only_known_devices: Option<bool>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AdvertiseConfig {
    pub raw: Option<bool>,
    pub manufacturer_data: Option<bool>,
    pub service_data: Option<bool>,
    pub decoded_key_topics: Option<bool>,
    pub json_state: Option<bool>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AdvertisedService {
    pub name: String,
}

impl AppConfig {
    pub fn known_devices(&self) -> HashMap<String, KnownDevice> {
        self.devices
            .iter()
            .flatten()
            .map(|d| (d.address.to_lowercase(), d.clone()))
            .collect()
    }

    pub fn presence_timeout(&self) -> Duration {
        let seconds = self
            .scan
            .as_ref()
            .and_then(|s| s.presence_timeout_seconds)
            .unwrap_or(60);
        Duration::from_secs(seconds)
    }

    /// Watchdog period; zero disables both liveness checks.
    pub fn ble_timeout(&self) -> Duration {
        let seconds = self
            .scan
            .as_ref()
            .and_then(|s| s.ble_timeout_seconds)
            .unwrap_or(10);
        Duration::from_secs(seconds)
    }

    pub fn only_known_devices(&self) -> bool {
        self.scan
            .as_ref()
            .and_then(|s| s.only_known_devices)
            .unwrap_or(false)
    }

    pub fn advertise_raw(&self) -> bool {
        self.advertise.as_ref().and_then(|a| a.raw).unwrap_or(true)
    }

    pub fn advertise_manufacturer_data(&self) -> bool {
        self.advertise
            .as_ref()
            .and_then(|a| a.manufacturer_data)
            .unwrap_or(false)
    }

    pub fn advertise_service_data(&self) -> bool {
        self.advertise
            .as_ref()
            .and_then(|a| a.service_data)
            .unwrap_or(false)
    }

    pub fn decoded_key_topics(&self) -> bool {
        self.advertise
            .as_ref()
            .and_then(|a| a.decoded_key_topics)
            .unwrap_or(false)
    }

    pub fn json_state(&self) -> bool {
        self.advertise
            .as_ref()
            .and_then(|a| a.json_state)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config() {
        let config_str = r#"
            [mqtt]
            host = "localhost"
            port = 1883
            username = "user"
            password = "pass"

            [scan]
            presence_timeout_seconds = 120
            ble_timeout_seconds = 10
            only_known_devices = true

            [advertise]
            raw = true
            service_data = true
            json_state = true

            [[devices]]
            address = "AA:BB:CC:DD:EE:FF"
            name = "watch"

            [[devices]]
            address = "74278bda-b644-4520-8f0c-720eaf059935-100-2"
            name = "keyfob"
            measured_power = -59
            max_distance = 3.5

            [advertised_services."ffe0"]
            name = "moisture"
        "#;
        let config: AppConfig = toml::de::from_str(config_str).unwrap();
        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.presence_timeout(), Duration::from_secs(120));
        assert!(config.only_known_devices());
        assert!(config.json_state());
        assert!(!config.decoded_key_topics());

        let known = config.known_devices();
        assert_eq!(known["aa:bb:cc:dd:ee:ff"].name, "watch");
        let fob = &known["74278bda-b644-4520-8f0c-720eaf059935-100-2"];
        assert_eq!(fob.measured_power, Some(-59));
        assert_eq!(fob.max_distance, Some(3.5));

        let services = config.advertised_services.unwrap();
        assert_eq!(services["ffe0"].name, "moisture");
    }

    #[test]
    fn test_config_defaults() {
        let config: AppConfig = toml::de::from_str("[mqtt]\nhost = \"localhost\"").unwrap();
        assert_eq!(config.presence_timeout(), Duration::from_secs(60));
        assert_eq!(config.ble_timeout(), Duration::from_secs(10));
        assert!(!config.only_known_devices());
        assert!(config.advertise_raw());
        assert!(!config.advertise_service_data());
        assert!(config.known_devices().is_empty());
    }
}
