//! Specialized decoders for vendor-specific advertisement payloads.
//!
//! Every parser is handed an untrusted byte buffer and does its own bounds
//! checking: a short or malformed frame yields `None` or a partial map,
//! never a panic. Field names are kept byte-compatible with what existing
//! MQTT consumers expect.

use serde_json::{Map, Value, json};

/// Xiaomi MiBeacon product identifiers with a known model name.
const XIAOMI_PRODUCTS: &[(u16, &str)] = &[
    (0x005d, "HHCCPOT002"),
    (0x0098, "HHCCJCY01"),
    (0x0113, "YM-K1501EU"),
    (0x01aa, "LYWSDCGQ"),
    (0x01d8, "Stratos"),
    (0x02df, "JQJCY01YM"),
    (0x0347, "CGG1"),
    (0x0387, "MHOC401"),
    (0x03b6, "YLKG08YL"),
    (0x03bc, "GCLS002"),
    (0x03dd, "MUE4094RT"),
    (0x040a, "WX08ZM"),
    (0x045b, "LYWSD02"),
    (0x055b, "LYWSD03MMC"),
    (0x0576, "CGD1"),
    (0x07f6, "MJYD02YLA"),
];

fn u16_le(d: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes([*d.get(at)?, *d.get(at + 1)?]))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Temperature characteristic (`1809`): two-byte little-endian hundredths,
/// or a single raw byte. Values of 128 and above wrap negative.
pub fn temperature(a: &[u8]) -> Option<Map<String, Value>> {
    let mut t = if a.len() == 2 {
        f64::from(u16_le(a, 0)?) / 100.0
    } else {
        f64::from(*a.first()?)
    };
    if t >= 128.0 {
        t -= 256.0;
    }
    let mut r = Map::new();
    r.insert("temp".into(), json!(t));
    Some(r)
}

/// Battery level characteristic (`180f`): one unsigned percent byte.
pub fn battery(a: &[u8]) -> Option<Map<String, Value>> {
    let mut r = Map::new();
    r.insert("battery".into(), json!(*a.first()?));
    Some(r)
}

/// ATC_MiThermometer custom firmware frame (`181a`). Two layouts exist,
/// distinguished by length: the 15+ byte pvvx format and the 13 byte
/// original ATC format (which stores its words high byte first).
pub fn atc_thermometer(a: &[u8]) -> Option<Map<String, Value>> {
    let mut r = Map::new();
    if a.len() >= 15 {
        let voltage = f64::from(u16_le(a, 10)?);
        r.insert("temp".into(), json!(f64::from(u16_le(a, 6)?) / 100.0));
        r.insert("humidity".into(), json!(f64::from(u16_le(a, 8)?) / 100.0));
        r.insert(
            "battery_voltage".into(),
            json!(if voltage > 1000.0 {
                voltage / 1000.0
            } else {
                voltage
            }),
        );
        r.insert("battery".into(), json!(a[12]));
        r.insert("counter".into(), json!(a[13]));
        r.insert("flg".into(), json!(a[14]));
        Some(r)
    } else if a.len() == 13 {
        let temp = (u16::from(a[6]) << 8) | u16::from(a[7]);
        let voltage = (u16::from(a[10]) << 8) | u16::from(a[11]);
        r.insert("temp".into(), json!(f64::from(temp) / 10.0));
        r.insert("humidity".into(), json!(a[8]));
        r.insert("battery".into(), json!(a[9]));
        r.insert("battery_voltage".into(), json!(f64::from(voltage) / 1000.0));
        Some(r)
    } else {
        None
    }
}

/// Xiaomi V2 body-composition scale (`181b`): weight at the tail, unit and
/// state packed into the two leading flag bytes, impedance before the weight.
pub fn scale_v2(a: &[u8]) -> Option<Map<String, Value>> {
    if a.len() < 4 {
        return None;
    }
    let mut weight = f64::from(u16_le(a, a.len() - 2)?) / 100.0;
    let unit = if a[0] & (1 << 4) != 0 {
        "jin"
    } else if a[0] & 0x0F == 0x03 {
        "lbs"
    } else if a[0] & 0x0F == 0x02 {
        weight /= 2.0;
        "kg"
    } else {
        "???"
    };

    let mut r = Map::new();
    r.insert("weight".into(), json!(round2(weight)));
    r.insert("unit".into(), json!(unit));
    r.insert("impedance".into(), json!(u16_le(a, a.len() - 4)?));
    r.insert("isStabilized".into(), json!(a[1] & (1 << 5) != 0));
    r.insert("loadRemoved".into(), json!(a[1] & (1 << 7) != 0));
    r.insert("impedanceMeasured".into(), json!(a[1] & (1 << 1) != 0));
    Some(r)
}

/// Xiaomi V1 scale (`181d`): status bits in byte 0, weight at offset 1,
/// a broadcast wall-clock timestamp at offsets 3..=9.
pub fn scale_v1(a: &[u8]) -> Option<Map<String, Value>> {
    if a.len() < 10 {
        return None;
    }
    let mut weight = f64::from(u16_le(a, 1)?) * 0.01;
    let unit = if a[0] & (1 << 0) != 0 {
        "lbs"
    } else if a[0] & (1 << 4) != 0 {
        "jin"
    } else {
        weight /= 2.0;
        "kg"
    };

    let mut r = Map::new();
    r.insert("weight".into(), json!(round2(weight)));
    r.insert("unit".into(), json!(unit));
    r.insert("isStabilized".into(), json!(a[0] & (1 << 5) != 0));
    r.insert("loadRemoved".into(), json!(a[0] & (1 << 7) != 0));
    r.insert("year".into(), json!(u16_le(a, 3)?));
    r.insert("month".into(), json!(a[5]));
    r.insert("day".into(), json!(a[6]));
    r.insert("hour".into(), json!(a[7]));
    r.insert("minute".into(), json!(a[8]));
    r.insert("second".into(), json!(a[9]));
    Some(r)
}

/// Sub-record type key inside a MiBeacon frame. Most products use a single
/// byte; the YM-K1501EU kettle keys on two bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MiBeaconKey {
    Byte(u8),
    Composite(u8, u8),
}

/// Xiaomi MiBeacon service frame (`fe95`): a fixed header followed by one
/// typed sub-record. The object-id field is two bytes wide on the wire, so
/// the declared length always sits two past the type byte.
pub fn xiaomi(d: &[u8]) -> Option<Map<String, Value>> {
    let frame_control = u16_le(d, 0)?;
    let product_id = u16_le(d, 2)?;
    let counter = *d.get(4)?;

    let mut r = Map::new();
    r.insert("frameControl".into(), json!(frame_control));
    r.insert("productId".into(), json!(product_id));
    r.insert("counter".into(), json!(counter));
    if let Some((_, name)) = XIAOMI_PRODUCTS.iter().find(|(id, _)| *id == product_id) {
        r.insert("productName".into(), json!(name));
    }

    let raw_offset = match product_id {
        0x01aa | 0x055b => 11,
        _ => 12,
    };
    let key = if product_id == 0x0113 {
        match (d.get(raw_offset), d.get(raw_offset + 1)) {
            (Some(&lo), Some(&hi)) => Some(MiBeaconKey::Composite(lo, hi)),
            _ => None,
        }
    } else {
        d.get(raw_offset).map(|&b| MiBeaconKey::Byte(b))
    };

    // a frame that ends after the header still yields the header fields
    if let (Some(key), Some(&declared_len)) = (key, d.get(raw_offset + 2)) {
        let data = d.get(raw_offset + 3..).unwrap_or(&[]);
        parse_xiaomi_value(key, data, declared_len, &mut r);
    }
    Some(r)
}

fn parse_xiaomi_value(key: MiBeaconKey, data: &[u8], declared_len: u8, r: &mut Map<String, Value>) {
    match key {
        // kettle: power switch + current temperature
        MiBeaconKey::Composite(5, 16) => {
            if data.len() >= 2 {
                r.insert("switch".into(), json!(data[0] != 0));
                r.insert("temp".into(), json!(data[1]));
            }
        }
        // temperature, signed 16-bit LE tenths
        MiBeaconKey::Byte(0x04) => {
            if let Some(raw) = u16_le(data, 0) {
                r.insert("temp".into(), json!(f64::from(raw as i16) / 10.0));
            }
        }
        // humidity, 16-bit LE tenths
        MiBeaconKey::Byte(0x06) => {
            if let Some(raw) = u16_le(data, 0) {
                r.insert("humidity".into(), json!(f64::from(raw) / 10.0));
            }
        }
        // illuminance, 24-bit LE lux, exact length required
        MiBeaconKey::Byte(0x07) => {
            if declared_len == 3 && data.len() >= 3 {
                let lux =
                    u32::from(data[0]) | (u32::from(data[1]) << 8) | (u32::from(data[2]) << 16);
                r.insert("illuminance".into(), json!(lux));
            }
        }
        // soil moisture percent, exact length required
        MiBeaconKey::Byte(0x08) => {
            if declared_len == 1 && !data.is_empty() {
                r.insert("moisture".into(), json!(data[0]));
            }
        }
        // conductivity, 16-bit LE µS/cm, exact length required
        MiBeaconKey::Byte(0x09) => {
            if declared_len == 2
                && let Some(raw) = u16_le(data, 0)
            {
                r.insert("conductivity".into(), json!(raw));
            }
        }
        // battery percent
        MiBeaconKey::Byte(0x0a) => {
            if let Some(b) = data.first() {
                r.insert("battery".into(), json!(b));
            }
        }
        // combined temperature + humidity
        MiBeaconKey::Byte(0x0d) => {
            if let (Some(t), Some(h)) = (u16_le(data, 0), u16_le(data, 2)) {
                r.insert("temp".into(), json!(f64::from(t as i16) / 10.0));
                r.insert("humidity".into(), json!(f64::from(h) / 10.0));
            }
        }
        _ => {}
    }
}

/// Step counter service (`fee0`): step count, plus a heart-rate byte on the
/// five-byte variant.
pub fn steps(d: &[u8]) -> Option<Map<String, Value>> {
    let mut r = Map::new();
    r.insert("steps".into(), json!(u16_le(d, 0)?));
    if d.len() == 5 {
        r.insert("heartRate".into(), json!(d[4]));
    }
    Some(r)
}

const EDDYSTONE_URL_FRAME: u8 = 0x10;
const EDDYSTONE_URL_SCHEMES: &[&str] = &["http://www.", "https://www.", "http://", "https://"];

/// Eddystone broadcast (`feaa`). Only the URL frame is decoded; other frame
/// types fall back to raw passthrough.
pub fn eddystone(d: &[u8]) -> Option<Map<String, Value>> {
    if d.len() < 3 || d[0] != EDDYSTONE_URL_FRAME {
        return None;
    }
    let rssi = d[1] as i8;
    let mut url = EDDYSTONE_URL_SCHEMES
        .get(d[2] as usize)
        .copied()
        .unwrap_or("")
        .to_string();
    url.extend(d[3..].iter().map(|&b| char::from(b)));

    let mut r = Map::new();
    r.insert("url".into(), json!(url));
    r.insert("rssi@1m".into(), json!(rssi));
    Some(r)
}

/// Pressure characteristic (`2a6d`): 32-bit little-endian tenths of pascal.
pub fn pressure(a: &[u8]) -> Option<Map<String, Value>> {
    let raw = u32::from_le_bytes([*a.first()?, *a.get(1)?, *a.get(2)?, *a.get(3)?]);
    let mut r = Map::new();
    r.insert("pressure".into(), json!(f64::from(raw) / 10.0));
    Some(r)
}

/// Temperature characteristic (`2a6e`): 16-bit LE hundredths of a degree.
pub fn temperature_celsius(a: &[u8]) -> Option<Map<String, Value>> {
    let mut t = f64::from(u16_le(a, 0)?) / 100.0;
    if t >= 128.0 {
        t -= 256.0;
    }
    let mut r = Map::new();
    r.insert("temp".into(), json!(t));
    Some(r)
}

/// Humidity characteristic (`2a6f`): 16-bit LE hundredths of a percent.
pub fn humidity(a: &[u8]) -> Option<Map<String, Value>> {
    let mut r = Map::new();
    r.insert("humidity".into(), json!(f64::from(u16_le(a, 0)?) / 100.0));
    Some(r)
}

/// Alert level characteristic (`2a06`).
pub fn alert(a: &[u8]) -> Option<Map<String, Value>> {
    let mut r = Map::new();
    r.insert("alert".into(), json!(*a.first()?));
    Some(r)
}

/// Digital characteristic (`2a56`).
pub fn digital(a: &[u8]) -> Option<Map<String, Value>> {
    let mut r = Map::new();
    r.insert("digital".into(), json!(*a.first()? != 0));
    Some(r)
}

/// Analog characteristic (`2a58`): one or two little-endian bytes.
pub fn analog(a: &[u8]) -> Option<Map<String, Value>> {
    let mut value = u16::from(*a.first()?);
    if a.len() > 1 {
        value |= u16::from(a[1]) << 8;
    }
    let mut r = Map::new();
    r.insert("analog".into(), json!(value));
    Some(r)
}

/// `ffff` isn't assigned to anything; pass it through as `data`, a scalar
/// for one byte or a comma-joined decimal list otherwise.
pub fn unclassified(a: &[u8]) -> Option<Map<String, Value>> {
    let mut r = Map::new();
    if a.len() == 1 {
        r.insert("data".into(), json!(a[0]));
    } else {
        let joined = a
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(",");
        r.insert("data".into(), json!(joined));
    }
    Some(r)
}
