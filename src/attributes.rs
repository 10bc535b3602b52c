//! Attribute registry: maps service/characteristic uuids to decoders.
//!
//! Decoding is pure and stateless. The lookup chain is: specialized vendor
//! decoder, then the static name table (raw bytes wrapped under the known
//! name), then the operator's `advertised_services` config (first byte under
//! an operator-chosen field name), then raw passthrough.

use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::config::AdvertisedService;
use crate::vendors;

/// Known service/characteristic names, keyed by short uuid.
pub const NAMES: &[(&str, &str)] = &[
    // https://www.bluetooth.com/specifications/gatt/services/
    ("1801", "Generic Attribute"),
    ("1809", "Temperature"),
    ("180a", "Device Information"),
    ("180f", "Battery Service"),
    // https://github.com/atc1441/ATC_MiThermometer#advertising-format-of-the-custom-firmware
    ("181a", "ATC_MiThermometer"),
    ("181b", "Body Composition"),
    ("181c", "User Data"),
    ("181d", "Weight Scale"),
    // https://www.bluetooth.com/specifications/gatt/characteristics/
    ("2a2b", "Current Time"),
    ("2a6d", "Pressure"),
    ("2a6e", "Temperature"),
    ("2a6f", "Humidity"),
    // https://www.bluetooth.com/specifications/assigned-numbers/16-bit-uuids-for-members/
    ("fe0f", "Philips"),
    ("fe95", "Xiaomi"),
    ("fe9f", "Google"),
    ("feaa", "Google Eddystone"),
    ("6e400001b5a3f393e0a9e50e24dcca9e", "nus"),
    ("6e400002b5a3f393e0a9e50e24dcca9e", "nus_tx"),
    ("6e400003b5a3f393e0a9e50e24dcca9e", "nus_rx"),
];

/// Outcome of a decode: structured readings, or the payload untouched.
/// `Raw` means "undecoded" and callers must not interpret it further.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Fields(Map<String, Value>),
    Raw(Vec<u8>),
}

fn handler(uuid: &str, value: &[u8]) -> Option<Option<Map<String, Value>>> {
    let decoded = match uuid {
        "1809" => vendors::temperature(value),
        "180f" => vendors::battery(value),
        "181a" => vendors::atc_thermometer(value),
        "181b" => vendors::scale_v2(value),
        "181d" => vendors::scale_v1(value),
        "fe95" => vendors::xiaomi(value),
        "fee0" => vendors::steps(value),
        "feaa" => vendors::eddystone(value),
        "2a6d" => vendors::pressure(value),
        "2a6e" => vendors::temperature_celsius(value),
        "2a6f" => vendors::humidity(value),
        "2a06" => vendors::alert(value),
        "2a56" => vendors::digital(value),
        "2a58" => vendors::analog(value),
        "ffff" => vendors::unclassified(value),
        _ => return None,
    };
    Some(decoded)
}

pub struct AttributeCodec {
    advertised_services: HashMap<String, AdvertisedService>,
}

impl AttributeCodec {
    pub fn new(advertised_services: HashMap<String, AdvertisedService>) -> Self {
        AttributeCodec {
            advertised_services,
        }
    }

    /// Decode a service-data payload. Never fails: anything unrecognized or
    /// malformed comes back as `Decoded::Raw`.
    pub fn decode(&self, uuid: &str, value: &[u8]) -> Decoded {
        // built-in specialized decoders
        if let Some(decoded) = handler(uuid, value) {
            return match decoded {
                Some(fields) => Decoded::Fields(fields),
                None => Decoded::Raw(value.to_vec()),
            };
        }

        // generic decoder for known services: wrap the bytes under the name
        if let Some((_, name)) = NAMES.iter().find(|(id, _)| *id == uuid) {
            let mut fields = Map::new();
            fields.insert((*name).to_string(), json!(value));
            return Decoded::Fields(fields);
        }

        // operator-configured services: first byte under the operator's name
        if let Some(service) = self.advertised_services.get(uuid)
            && let Some(first) = value.first()
        {
            let mut fields = Map::new();
            fields.insert(service.name.clone(), json!(first));
            return Decoded::Fields(fields);
        }

        Decoded::Raw(value.to_vec())
    }
}

/// Resolve a human-readable service name back to its uuid. Unknown names
/// come back unchanged.
#[allow(dead_code)]
pub fn lookup(attr: &str) -> &str {
    NAMES
        .iter()
        .find(|(_, name)| *name == attr)
        .map(|(id, _)| *id)
        .unwrap_or(attr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> AttributeCodec {
        AttributeCodec::new(HashMap::new())
    }

    #[test]
    fn test_decode_specialized() {
        match codec().decode("1809", &[0xE8, 0x00]) {
            Decoded::Fields(fields) => assert_eq!(fields["temp"], json!(2.32)),
            other => panic!("expected fields, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_handler_miss_passes_raw_through() {
        // Eddystone TLM frame: handled uuid but undecodable frame type
        let payload = vec![0x20, 0x00, 0x0B];
        assert_eq!(
            codec().decode("feaa", &payload),
            Decoded::Raw(payload.clone())
        );
    }

    #[test]
    fn test_decode_generic_known_service_wraps_bytes() {
        match codec().decode("1801", &[1, 2, 3]) {
            Decoded::Fields(fields) => {
                assert_eq!(fields["Generic Attribute"], json!([1, 2, 3]));
            }
            other => panic!("expected fields, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_operator_configured_service() {
        let mut services = HashMap::new();
        services.insert(
            "ffe0".to_string(),
            AdvertisedService {
                name: "moisture".to_string(),
            },
        );
        let codec = AttributeCodec::new(services);
        match codec.decode("ffe0", &[55, 99]) {
            Decoded::Fields(fields) => assert_eq!(fields["moisture"], json!(55)),
            other => panic!("expected fields, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_uuid_falls_through() {
        assert_eq!(codec().decode("abcd", &[1, 2]), Decoded::Raw(vec![1, 2]));
    }

    #[test]
    fn test_decode_is_deterministic() {
        let payload = [0x5A];
        assert_eq!(
            codec().decode("180f", &payload),
            codec().decode("180f", &payload)
        );
    }

    #[test]
    fn test_short_payloads_never_error() {
        for uuid in [
            "1809", "180f", "181a", "181b", "181d", "fe95", "fee0", "feaa", "2a6d", "2a6e", "2a6f",
            "2a06", "2a56", "2a58",
        ] {
            // empty and one-byte buffers must come back raw or as fields
            for payload in [&[][..], &[0x01][..]] {
                let _ = codec().decode(uuid, payload);
            }
        }
    }

    #[test]
    fn test_lookup_reverse() {
        assert_eq!(lookup("Xiaomi"), "fe95");
        assert_eq!(lookup("Battery Service"), "180f");
        assert_eq!(lookup("No Such Service"), "No Such Service");
    }
}
