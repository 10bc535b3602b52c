//! In-memory registry of devices currently in range.
//!
//! The registry is owned by a single task; all mutation happens through the
//! advertisement processor and the presence sweep.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

/// Last payload seen for one (device, service uuid) pair, used to suppress
/// redundant re-emission.
#[derive(Clone, Debug)]
struct DataEntry {
    payload: Vec<u8>,
    time: Instant,
}

#[derive(Clone, Debug)]
pub struct DeviceRecord {
    /// Display identity: operator-configured name, or the raw address.
    pub id: String,
    pub address: String,
    /// Advertised local name, when the device broadcast one.
    pub name: Option<String>,
    pub last_seen: Instant,
    pub last_rssi: i16,
    /// Tracked via the proximity-beacon path rather than plain presence.
    pub beacon: bool,
    data: HashMap<String, DataEntry>,
    state: HashMap<String, Map<String, Value>>,
}

impl DeviceRecord {
    pub fn new(id: String, address: String, beacon: bool, now: Instant, rssi: i16) -> Self {
        DeviceRecord {
            id,
            address,
            name: None,
            last_seen: now,
            last_rssi: rssi,
            beacon,
            data: HashMap::new(),
            state: HashMap::new(),
        }
    }

    pub fn touch(&mut self, now: Instant, rssi: i16) {
        self.last_seen = now;
        self.last_rssi = rssi;
    }

    /// Identical payload seen less than `window` ago? Identical data is
    /// re-emitted once the window has elapsed, as a liveness heartbeat.
    pub fn is_duplicate(&self, uuid: &str, payload: &[u8], now: Instant, window: Duration) -> bool {
        match self.data.get(uuid) {
            Some(entry) => entry.payload == payload && now.duration_since(entry.time) < window,
            None => false,
        }
    }

    pub fn record_payload(&mut self, uuid: &str, payload: &[u8], now: Instant) {
        self.data.insert(
            uuid.to_string(),
            DataEntry {
                payload: payload.to_vec(),
                time: now,
            },
        );
    }

    /// Fold newly decoded fields into the cumulative snapshot for `uuid`.
    /// Keys already present are retained unless overwritten.
    pub fn merge_state(&mut self, uuid: &str, fields: &Map<String, Value>) -> &Map<String, Value> {
        let state = self.state.entry(uuid.to_string()).or_default();
        for (key, value) in fields {
            state.insert(key.clone(), value.clone());
        }
        state
    }
}

#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, DeviceRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.devices.contains_key(address)
    }

    pub fn get_mut(&mut self, address: &str) -> Option<&mut DeviceRecord> {
        self.devices.get_mut(address)
    }

    /// Insert a freshly sighted device. At most one record exists per
    /// address; re-inserting replaces the old record.
    pub fn insert(&mut self, record: DeviceRecord) {
        self.devices.insert(record.address.clone(), record);
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    /// Remove and return every record whose `last_seen` is strictly older
    /// than `cutoff`. A record seen exactly at the cutoff survives.
    pub fn expire(&mut self, cutoff: Instant) -> Vec<DeviceRecord> {
        let stale: Vec<String> = self
            .devices
            .iter()
            .filter(|(_, record)| record.last_seen < cutoff)
            .map(|(address, _)| address.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|address| self.devices.remove(&address))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(now: Instant) -> DeviceRecord {
        DeviceRecord::new("desk".into(), "aa:bb:cc:dd:ee:ff".into(), false, now, -50)
    }

    #[test]
    fn test_duplicate_within_window() {
        let now = Instant::now();
        let mut r = record(now);
        r.record_payload("181a", &[1, 2, 3], now);

        let later = now + Duration::from_secs(30);
        assert!(r.is_duplicate("181a", &[1, 2, 3], later, Duration::from_secs(60)));
        assert!(!r.is_duplicate("181a", &[1, 2, 4], later, Duration::from_secs(60)));
        assert!(!r.is_duplicate("180f", &[1, 2, 3], later, Duration::from_secs(60)));
    }

    #[test]
    fn test_duplicate_window_elapsed() {
        let now = Instant::now();
        let mut r = record(now);
        r.record_payload("181a", &[1, 2, 3], now);

        let later = now + Duration::from_secs(60);
        assert!(!r.is_duplicate("181a", &[1, 2, 3], later, Duration::from_secs(60)));
    }

    #[test]
    fn test_merge_state_retains_previous_keys() {
        let now = Instant::now();
        let mut r = record(now);

        let mut first = Map::new();
        first.insert("temp".into(), json!(21.5));
        first.insert("battery".into(), json!(90));
        r.merge_state("181a", &first);

        let mut second = Map::new();
        second.insert("temp".into(), json!(22.0));
        let merged = r.merge_state("181a", &second);

        assert_eq!(merged["temp"], json!(22.0));
        assert_eq!(merged["battery"], json!(90));
    }

    #[test]
    fn test_expire_boundary() {
        let base = Instant::now();
        let cutoff = base + Duration::from_secs(60);

        let mut registry = DeviceRegistry::new();
        let mut at_cutoff = record(cutoff);
        at_cutoff.address = "at".into();
        let mut stale = record(cutoff - Duration::from_millis(1));
        stale.address = "stale".into();
        registry.insert(at_cutoff);
        registry.insert(stale);

        let expired = registry.expire(cutoff);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].address, "stale");
        assert!(registry.contains("at"));
        assert!(!registry.contains("stale"));
    }

    #[test]
    fn test_one_record_per_address() {
        let now = Instant::now();
        let mut registry = DeviceRegistry::new();
        registry.insert(record(now));
        registry.insert(record(now + Duration::from_secs(1)));
        assert_eq!(registry.iter().count(), 1);
    }
}
