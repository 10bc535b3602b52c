use std::fmt;

use crate::beacon::ProximityTag;

/// One observation of a device, as delivered by the scan facility.
#[derive(Clone, Debug)]
pub struct Sighting {
    /// Lower-case MAC address of the advertiser.
    pub address: String,
    pub rssi: i16,
    pub local_name: Option<String>,
    /// Advertised service uuids in short form.
    pub service_uuids: Vec<String>,
    /// (company identifier, payload) pairs from manufacturer-specific data.
    pub manufacturer_data: Vec<(u16, Vec<u8>)>,
    /// (service uuid, payload) pairs from service data.
    pub service_data: Vec<ServiceDataEntry>,
    /// Present when the manufacturer data carried an iBeacon frame.
    pub beacon: Option<ProximityTag>,
}

#[derive(Clone, Debug)]
pub struct ServiceDataEntry {
    pub uuid: String,
    pub data: Vec<u8>,
}

/// Notifications from the MQTT event loop to the manager.
#[derive(Clone, Debug)]
pub enum BusEvent {
    /// Broker (re)connected; presence state should be re-broadcast.
    Connected,
}

/// Unrecoverable radio-liveness failure. The process exits and the
/// supervisor is expected to restart it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatalFault {
    /// The adapter never reported powered-on within the configured timeout.
    NoPowerOn,
    /// No advertisement arrived in two consecutive watchdog periods while
    /// a scan was believed active.
    NoAdvertisements,
}

impl fmt::Display for FatalFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalFault::NoPowerOn => {
                write!(f, "adapter never reached powered-on state")
            }
            FatalFault::NoAdvertisements => {
                write!(f, "no advertising packets received while scanning")
            }
        }
    }
}

impl std::error::Error for FatalFault {}
