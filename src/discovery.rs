//! Advertisement processing and presence tracking.
//!
//! A single `Discovery` instance owns the device registry; sightings, the
//! presence sweep and the scan watchdog all run through it from one task.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde_json::{Map, json};

use crate::attributes::{AttributeCodec, Decoded};
use crate::beacon::ProximityTag;
use crate::config::{AppConfig, KnownDevice};
use crate::messages::{FatalFault, Sighting};
use crate::registry::{DeviceRecord, DeviceRegistry};

/// Identical service-data payloads are re-emitted at most this often.
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Outbound emission sink. Must be non-blocking and best-effort: a message
/// that cannot be delivered right now is dropped, not queued.
pub trait Publisher {
    fn publish(&self, topic: &str, payload: &str, retain: bool);
}

pub struct Discovery<P> {
    publisher: P,
    codec: AttributeCodec,
    registry: DeviceRegistry,
    known: HashMap<String, KnownDevice>,
    prefix: String,
    presence_timeout: Duration,
    only_known_devices: bool,
    advertise_raw: bool,
    advertise_manufacturer_data: bool,
    advertise_service_data: bool,
    decoded_key_topics: bool,
    json_state: bool,
    packets_received: u64,
    last_packets_received: u64,
    is_scanning: bool,
    scan_start: Option<Instant>,
}

impl<P: Publisher> Discovery<P> {
    pub fn new(config: &AppConfig, prefix: String, publisher: P) -> Self {
        Discovery {
            publisher,
            codec: AttributeCodec::new(config.advertised_services.clone().unwrap_or_default()),
            registry: DeviceRegistry::new(),
            known: config.known_devices(),
            prefix,
            presence_timeout: config.presence_timeout(),
            only_known_devices: config.only_known_devices(),
            advertise_raw: config.advertise_raw(),
            advertise_manufacturer_data: config.advertise_manufacturer_data(),
            advertise_service_data: config.advertise_service_data(),
            decoded_key_topics: config.decoded_key_topics(),
            json_state: config.json_state(),
            packets_received: 0,
            // primed so a restart needs two full scanning periods with no traffic
            last_packets_received: 1,
            is_scanning: false,
            scan_start: None,
        }
    }

    pub fn scan_started(&mut self, now: Instant) {
        self.is_scanning = true;
        self.scan_start = Some(now);
    }

    pub fn scan_stopped(&mut self) {
        self.is_scanning = false;
    }

    pub fn is_scanning(&self) -> bool {
        self.is_scanning
    }

    /// Process one sighting delivered by the scan facility.
    pub fn on_sighting(&mut self, sighting: &Sighting, now: Instant) {
        self.packets_received += 1;

        if let Some(tag) = sighting.beacon.clone() {
            self.on_beacon_sighting(sighting, tag, now);
        } else {
            self.on_device_sighting(sighting, now);
        }
    }

    /// Proximity beacons are identified by their composite uuid and only
    /// tracked when the operator has configured them.
    fn on_beacon_sighting(&mut self, sighting: &Sighting, mut tag: ProximityTag, now: Instant) {
        let Some(known) = self.known.get(&tag.uuid) else {
            return;
        };
        let id = known.name.clone();
        if let Some(power) = known.measured_power {
            tag.measured_power = power;
        }
        let distance = tag.distance(sighting.rssi);
        debug!(
            "iBeacon {id} (major {} minor {}) rssi {} distance {distance}",
            tag.major, tag.minor, sighting.rssi
        );

        let mut home = true;
        if let Some(max_distance) = known.max_distance
            && max_distance > 0.0
            && distance > max_distance
        {
            warn!("detection distance exceeded! name: {id} distance: {distance}");
            home = false;
        }
        let state = if home { "home" } else { "not_home" };

        if !self.registry.contains(&tag.uuid) {
            let mut record = DeviceRecord::new(id.clone(), tag.uuid.clone(), true, now, sighting.rssi);
            record.name = sighting.local_name.clone();
            self.registry.insert(record);
            self.publisher.publish(
                &format!("{}/device_tracker/ble-{id}-tracker/status", self.prefix),
                "online",
                true,
            );
            self.publisher.publish(
                &format!("{}/device_tracker/ble-{id}-tracker/state", self.prefix),
                state,
                true,
            );
        }

        if let Some(record) = self.registry.get_mut(&tag.uuid) {
            record.touch(now, sighting.rssi);
        }

        // classification goes out on every sighting, not just on change
        let attributes = json!({
            "distance": distance,
            "rssi": sighting.rssi,
            "state": state,
        });
        self.publisher.publish(
            &format!("{}/sensor/ble-{id}/attributes", self.prefix),
            &attributes.to_string(),
            false,
        );
        self.publisher.publish(
            &format!("{}/sensor/ble-{id}/status", self.prefix),
            "online",
            true,
        );
    }

    fn on_device_sighting(&mut self, sighting: &Sighting, now: Instant) {
        let address = sighting.address.clone();
        let id = match self.known.get(&address) {
            Some(device) => device.name.clone(),
            None if self.only_known_devices => return,
            None => address.clone(),
        };

        if !self.registry.contains(&address) {
            self.registry.insert(DeviceRecord::new(
                id.clone(),
                address.clone(),
                false,
                now,
                sighting.rssi,
            ));
            self.publisher
                .publish(&format!("{}/presence/{id}", self.prefix), "1", true);
        }

        let mut advert = Map::new();
        advert.insert("rssi".into(), json!(sighting.rssi));
        if let Some(name) = &sighting.local_name {
            advert.insert("name".into(), json!(name));
        }
        if !sighting.service_uuids.is_empty() {
            advert.insert("serviceUuids".into(), json!(sighting.service_uuids));
        }

        if let Some(record) = self.registry.get_mut(&address) {
            if sighting.local_name.is_some() {
                record.name = sighting.local_name.clone();
            }
            record.touch(now, sighting.rssi);
        }

        if !sighting.manufacturer_data.is_empty() && self.advertise_manufacturer_data {
            // echo the whole raw structure as hex, company identifier first
            // (little-endian on the wire)
            let (company, payload) = &sighting.manufacturer_data[0];
            let raw = format!(
                "{:02x}{:02x}{}",
                company & 0xFF,
                company >> 8,
                hex_string(payload)
            );
            advert.insert("manufacturerData".into(), json!(raw));
            self.publisher.publish(
                &format!("{}/advertise/{id}", self.prefix),
                &serde_json::Value::Object(advert).to_string(),
                false,
            );

            for (company, payload) in &sighting.manufacturer_data {
                self.publisher.publish(
                    &format!("{}/advertise/{id}/manufacturer/{company:04x}", self.prefix),
                    &json!(hex_string(payload)).to_string(),
                    false,
                );
            }
        } else if self.advertise_raw {
            self.publisher.publish(
                &format!("{}/advertise/{id}", self.prefix),
                &serde_json::Value::Object(advert).to_string(),
                false,
            );
        }

        if self.advertise_raw {
            self.publisher.publish(
                &format!("{}/advertise/{id}/rssi", self.prefix),
                &sighting.rssi.to_string(),
                false,
            );
        }

        for entry in &sighting.service_data {
            let Some(record) = self.registry.get_mut(&address) else {
                break;
            };
            if record.is_duplicate(&entry.uuid, &entry.data, now, DEDUP_WINDOW) {
                continue;
            }

            if self.advertise_service_data {
                self.publisher.publish(
                    &format!("{}/advertise/{id}/{}", self.prefix, entry.uuid),
                    &json!(entry.data).to_string(),
                    false,
                );
            }

            record.record_payload(&entry.uuid, &entry.data, now);

            let Decoded::Fields(mut fields) = self.codec.decode(&entry.uuid, &entry.data) else {
                continue;
            };
            fields.insert("rssi".into(), json!(sighting.rssi));

            for (key, value) in &fields {
                if self.advertise_raw {
                    self.publisher.publish(
                        &format!("{}/advertise/{id}/{key}", self.prefix),
                        &value.to_string(),
                        false,
                    );
                }
                if self.decoded_key_topics {
                    self.publisher.publish(
                        &format!("{}/{id}/{key}", self.prefix),
                        &value.to_string(),
                        false,
                    );
                }
            }

            if self.json_state
                && let Some(record) = self.registry.get_mut(&address)
            {
                let merged = record.merge_state(&entry.uuid, &fields);
                self.publisher.publish(
                    &format!("{}/json/{id}/{}", self.prefix, entry.uuid),
                    &serde_json::Value::Object(merged.clone()).to_string(),
                    false,
                );
            }
        }
    }

    /// Expire devices not seen within the presence timeout and emit their
    /// leave transitions. Skipped until the scan has been running at least
    /// one full timeout, so a fresh start never produces false departures.
    pub fn check_presence(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.presence_timeout) else {
            return;
        };
        if !self.is_scanning {
            return;
        }
        match self.scan_start {
            Some(start) if start <= cutoff => {}
            _ => return,
        }

        for record in self.registry.expire(cutoff) {
            let id = &record.id;
            info!(
                "Device {id} no longer in range (last name: {:?})",
                record.name
            );
            if record.beacon {
                self.publisher.publish(
                    &format!("{}/device_tracker/ble-{id}-tracker/status", self.prefix),
                    "offline",
                    true,
                );
                self.publisher.publish(
                    &format!("{}/device_tracker/ble-{id}-tracker/state", self.prefix),
                    "not_home",
                    true,
                );
                self.publisher.publish(
                    &format!("{}/sensor/ble-{id}/status", self.prefix),
                    "offline",
                    true,
                );
                self.publisher.publish(
                    &format!("{}/sensor/ble-{id}/attributes", self.prefix),
                    &json!({ "state": "not_home" }).to_string(),
                    false,
                );
            } else {
                self.publisher
                    .publish(&format!("{}/presence/{id}", self.prefix), "0", true);
            }
        }
    }

    /// Sample the sighting counter. Two consecutive empty periods while a
    /// scan is believed active means the radio stack is wedged below us;
    /// the caller must exit and let the supervisor restart the process.
    pub fn check_if_broken(&mut self) -> Result<(), FatalFault> {
        if self.is_scanning {
            if self.packets_received == 0 && self.last_packets_received == 0 {
                return Err(FatalFault::NoAdvertisements);
            }
        } else {
            // not supposed to be receiving anything; keep the counter primed
            self.packets_received = 1;
        }
        self.last_packets_received = self.packets_received;
        self.packets_received = 0;
        Ok(())
    }

    /// Re-broadcast presence for everything we know about, for a broker that
    /// just (re)connected and lost our retained state.
    pub fn resend_presence(&self) {
        info!("Re-sending presence status of known devices");
        for record in self.registry.iter() {
            self.publisher
                .publish(&format!("{}/presence/{}", self.prefix, record.id), "1", true);
        }
        for (address, device) in &self.known {
            let payload = if self.registry.contains(address) {
                "1"
            } else {
                "0"
            };
            self.publisher.publish(
                &format!("{}/presence/{}", self.prefix, device.name),
                payload,
                true,
            );
        }
    }

    #[cfg(test)]
    pub fn device_count(&self) -> usize {
        self.registry.iter().count()
    }
}

fn hex_string(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}
