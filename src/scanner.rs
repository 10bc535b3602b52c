//! Conversion from btleplug advertisement reports into [`Sighting`] events.

use btleplug::api::PeripheralProperties;
use uuid::Uuid;

use crate::beacon;
use crate::messages::{ServiceDataEntry, Sighting};

/// Suffix of the Bluetooth base uuid, `0000xxxx-0000-1000-8000-00805f9b34fb`.
const BASE_UUID_SUFFIX: &str = "00001000800000805f9b34fb";

/// Normalize a uuid to the wire identifier used for decoder lookup: the
/// 4-hex short form when it sits in the Bluetooth base range, otherwise the
/// full 32-hex simple form.
pub fn short_uuid(uuid: &Uuid) -> String {
    let simple = uuid.simple().to_string();
    if simple.starts_with("0000") && simple.ends_with(BASE_UUID_SUFFIX) {
        simple[4..8].to_string()
    } else {
        simple
    }
}

/// Flatten one advertisement report into a sighting. Entries are sorted so
/// identical reports always produce identical sightings.
pub fn sighting_from_properties(properties: &PeripheralProperties) -> Sighting {
    let mut manufacturer_data: Vec<(u16, Vec<u8>)> = properties
        .manufacturer_data
        .iter()
        .map(|(company, data)| (*company, data.clone()))
        .collect();
    manufacturer_data.sort_by_key(|(company, _)| *company);

    let mut service_data: Vec<ServiceDataEntry> = properties
        .service_data
        .iter()
        .map(|(uuid, data)| ServiceDataEntry {
            uuid: short_uuid(uuid),
            data: data.clone(),
        })
        .collect();
    service_data.sort_by(|a, b| a.uuid.cmp(&b.uuid));

    let beacon = manufacturer_data
        .iter()
        .find(|(company, data)| beacon::is_ibeacon(*company, data))
        .and_then(|(_, data)| beacon::parse_ibeacon(data));

    Sighting {
        address: properties.address.to_string().to_lowercase(),
        rssi: properties.rssi.unwrap_or(0),
        local_name: properties.local_name.clone(),
        service_uuids: properties.services.iter().map(short_uuid).collect(),
        manufacturer_data,
        service_data,
        beacon,
    }
}
