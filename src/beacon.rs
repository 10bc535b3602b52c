//! iBeacon proximity frames: frame parsing and distance estimation.

/// Apple's company identifier, the only one carrying iBeacon frames.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

const IBEACON_TYPE: u8 = 0x02;
const IBEACON_LENGTH: u8 = 0x15;

/// Calibration data carried by one iBeacon advertisement. Ephemeral: derived
/// per sighting and not persisted beyond it.
#[derive(Clone, Debug, PartialEq)]
pub struct ProximityTag {
    /// Composite identity `uuid-major-minor`, lower-case.
    pub uuid: String,
    pub major: u16,
    pub minor: u16,
    /// Broadcast RSSI at one meter; may be overridden by operator calibration.
    pub measured_power: i16,
}

/// Parse an iBeacon frame from manufacturer-specific data (company id already
/// stripped). Returns `None` for anything that is not a well-formed frame.
pub fn parse_ibeacon(data: &[u8]) -> Option<ProximityTag> {
    if data.len() < 23 || data[0] != IBEACON_TYPE || data[1] != IBEACON_LENGTH {
        return None;
    }
    let uuid: String = data[2..18].iter().map(|b| format!("{b:02x}")).collect();
    let major = u16::from_be_bytes([data[18], data[19]]);
    let minor = u16::from_be_bytes([data[20], data[21]]);
    let measured_power = data[22] as i8 as i16;
    Some(ProximityTag {
        uuid: format!("{uuid}-{major}-{minor}"),
        major,
        minor,
        measured_power,
    })
}

pub fn is_ibeacon(company_id: u16, data: &[u8]) -> bool {
    company_id == APPLE_COMPANY_ID
        && data.len() >= 23
        && data[0] == IBEACON_TYPE
        && data[1] == IBEACON_LENGTH
}

impl ProximityTag {
    /// Approximate distance in meters from the path-loss curve, truncated to
    /// one decimal place. An RSSI of zero means the distance is unknown (-1).
    pub fn distance(&self, rssi: i16) -> f64 {
        if rssi == 0 {
            return -1.0;
        }

        let ratio = f64::from(rssi) / f64::from(self.measured_power);
        let distance = if ratio < 1.0 {
            ratio.powi(10)
        } else {
            0.89976 * ratio.powf(7.7095) + 0.111
        };

        ((distance * 10.0) as i64) as f64 / 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Vec<u8> {
        let mut d = vec![0x02, 0x15];
        d.extend_from_slice(&[
            0x74, 0x27, 0x8b, 0xda, 0xb6, 0x44, 0x45, 0x20, 0x8f, 0x0c, 0x72, 0x0e, 0xaf, 0x05,
            0x99, 0x35,
        ]);
        d.extend_from_slice(&[0x00, 0x64]); // major 100
        d.extend_from_slice(&[0x00, 0x02]); // minor 2
        d.push(0xC5); // -59 dBm at 1m
        d
    }

    #[test]
    fn test_parse_ibeacon() {
        let tag = parse_ibeacon(&frame()).unwrap();
        assert_eq!(tag.major, 100);
        assert_eq!(tag.minor, 2);
        assert_eq!(tag.measured_power, -59);
        assert_eq!(tag.uuid, "74278bdab64445208f0c720eaf059935-100-2");
    }

    #[test]
    fn test_parse_rejects_short_or_foreign_frames() {
        assert!(parse_ibeacon(&[0x02, 0x15, 0x00]).is_none());
        let mut d = frame();
        d[0] = 0x10;
        assert!(parse_ibeacon(&d).is_none());
        assert!(parse_ibeacon(&[]).is_none());
    }

    #[test]
    fn test_is_ibeacon_requires_apple_company_id() {
        assert!(is_ibeacon(APPLE_COMPANY_ID, &frame()));
        assert!(!is_ibeacon(0x0590, &frame()));
        assert!(!is_ibeacon(APPLE_COMPANY_ID, &[0x02, 0x15]));
    }

    #[test]
    fn test_distance_at_calibration_point() {
        let tag = parse_ibeacon(&frame()).unwrap();
        // ratio exactly 1.0 falls into the far branch: 0.89976 + 0.111
        assert_eq!(tag.distance(-59), 1.0);
    }

    #[test]
    fn test_distance_unknown_for_zero_rssi() {
        let tag = parse_ibeacon(&frame()).unwrap();
        assert_eq!(tag.distance(0), -1.0);
    }

    #[test]
    fn test_distance_close_range() {
        let tag = parse_ibeacon(&frame()).unwrap();
        // Stronger signal than the 1m calibration: ratio < 1, distance < 1m.
        let d = tag.distance(-40);
        assert!(d >= 0.0 && d < 1.0, "distance was {d}");
    }

    #[test]
    fn test_distance_far_range_truncates() {
        let tag = parse_ibeacon(&frame()).unwrap();
        let d = tag.distance(-80);
        assert!(d > 1.0);
        // one decimal place, truncated
        assert_eq!((d * 10.0).fract(), 0.0);
    }
}
