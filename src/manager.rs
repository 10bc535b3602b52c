use std::time::Duration;

use anyhow::Context as _;
use btleplug::api::{Central as _, CentralEvent, CentralState, Peripheral as _, ScanFilter};
use btleplug::platform::PeripheralId;
use futures::StreamExt as _;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, oneshot};
use tokio::time::{Instant as TokioInstant, MissedTickBehavior};

use crate::config::AppConfig;
use crate::discovery::Discovery;
use crate::messages::{BusEvent, FatalFault};
use crate::mqtt::MqttClient;
use crate::scanner;

/// Sweep period for presence expiry.
const PRESENCE_SWEEP_PERIOD: Duration = Duration::from_secs(1);
/// Grace between the adapter reporting powered-on and starting the scan.
const SCAN_START_DELAY: Duration = Duration::from_secs(1);

/// Owns the adapter, the MQTT connection and all discovery state. Sightings,
/// the presence sweep and the watchdog are serialized through its run loop,
/// so registry mutation never needs a lock.
pub struct Manager {
    adapter: btleplug::platform::Adapter,
    mqtt_client: MqttClient,
    mqtt_event_loop: Option<rumqttc::EventLoop>,
    discovery: Discovery<MqttClient>,
    ble_timeout: Duration,
}

impl Manager {
    pub fn new(
        adapter: btleplug::platform::Adapter,
        mqtt_client: MqttClient,
        mqtt_event_loop: rumqttc::EventLoop,
        config: &AppConfig,
    ) -> Self {
        let discovery = Discovery::new(
            config,
            mqtt_client.topic_path().to_string(),
            mqtt_client.clone(),
        );
        Manager {
            adapter,
            mqtt_client,
            mqtt_event_loop: Some(mqtt_event_loop),
            discovery,
            ble_timeout: config.ble_timeout(),
        }
    }

    pub async fn run_loop(mut self) -> anyhow::Result<()> {
        let mut events = self
            .adapter
            .events()
            .await
            .context("failed to subscribe to adapter events")?;

        let (tx, mut bus_rx) = broadcast::channel(10);
        let event_loop_client = self.mqtt_client.clone();
        let mut mqtt_event_loop = self
            .mqtt_event_loop
            .take()
            .context("manager run loop started twice")?;
        tokio::task::spawn(async move {
            event_loop_client.event_loop(&mut mqtt_event_loop, tx).await;
        });

        let watchdog_enabled = !self.ble_timeout.is_zero();
        let mut powered_on = false;
        let power_on_deadline = TokioInstant::now() + self.ble_timeout;

        let mut presence = tokio::time::interval(PRESENCE_SWEEP_PERIOD);
        presence.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // placeholder period keeps the select arm valid when disabled
        let mut watchdog = tokio::time::interval(if watchdog_enabled {
            self.ble_timeout
        } else {
            Duration::from_secs(86400)
        });
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick of an interval fires immediately
        presence.tick().await;
        watchdog.tick().await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(power_on_deadline), if watchdog_enabled && !powered_on => {
                    error!(
                        "BLE broken? No state change to powered-on in {:?} - exiting",
                        self.ble_timeout
                    );
                    self.shutdown().await;
                    return Err(FatalFault::NoPowerOn.into());
                }
                _ = presence.tick() => {
                    self.discovery.check_presence(std::time::Instant::now());
                }
                _ = watchdog.tick(), if watchdog_enabled => {
                    if let Err(fault) = self.discovery.check_if_broken() {
                        error!("BLE broken? {fault} - exiting");
                        self.shutdown().await;
                        return Err(fault.into());
                    }
                }
                Ok(msg) = bus_rx.recv() => {
                    match msg {
                        BusEvent::Connected => self.discovery.resend_presence(),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    let (stopped_tx, stopped_rx) = oneshot::channel();
                    self.stop_scan(Some(stopped_tx)).await;
                    let _ = stopped_rx.await;
                    self.shutdown().await;
                    return Ok(());
                }
                event = events.next() => {
                    match event {
                        Some(CentralEvent::StateUpdate(state)) => {
                            info!("Adapter state change: {state:?}");
                            if state == CentralState::PoweredOn && !powered_on {
                                powered_on = true;
                                // give the stack a moment to settle first
                                tokio::time::sleep(SCAN_START_DELAY).await;
                                self.start_scan().await;
                            }
                        }
                        Some(CentralEvent::DeviceDiscovered(id))
                        | Some(CentralEvent::DeviceUpdated(id))
                        | Some(CentralEvent::ManufacturerDataAdvertisement { id, .. })
                        | Some(CentralEvent::ServiceDataAdvertisement { id, .. })
                        | Some(CentralEvent::ServicesAdvertisement { id, .. }) => {
                            self.handle_advertisement(&id).await;
                        }
                        Some(_) => {}
                        None => {
                            anyhow::bail!("adapter event stream closed");
                        }
                    }
                }
            }
        }
    }

    /// Fetch the advertiser's properties and feed them through discovery.
    /// Failures are contained per device; one bad peripheral never affects
    /// the processing of any other.
    async fn handle_advertisement(&mut self, id: &PeripheralId) {
        let properties = match self.adapter.peripheral(id).await {
            Ok(peripheral) => peripheral.properties().await,
            Err(err) => {
                debug!("Unknown peripheral {id:?}: {err:?}");
                return;
            }
        };
        match properties {
            Ok(Some(properties)) => {
                let sighting = scanner::sighting_from_properties(&properties);
                self.discovery
                    .on_sighting(&sighting, std::time::Instant::now());
            }
            Ok(None) => {}
            Err(err) => {
                warn!("Error reading properties for {id:?}: {err:?}");
            }
        }
    }

    async fn start_scan(&mut self) {
        info!("Starting scan...");
        match self.adapter.start_scan(ScanFilter::default()).await {
            Ok(()) => {
                self.discovery.scan_started(std::time::Instant::now());
                info!("Scanning started.");
            }
            Err(err) => {
                error!("Failed to start scan: {err:?}");
            }
        }
    }

    /// Stop scanning. `on_stopped` fires once the adapter has confirmed, or
    /// immediately when no scan is active.
    async fn stop_scan(&mut self, on_stopped: Option<oneshot::Sender<()>>) {
        if self.discovery.is_scanning() {
            if let Err(err) = self.adapter.stop_scan().await {
                warn!("Error stopping scan: {err:?}");
            }
            self.discovery.scan_stopped();
            info!("Scanning stopped.");
        }
        if let Some(notify) = on_stopped {
            let _ = notify.send(());
        }
    }

    async fn shutdown(&mut self) {
        use crate::discovery::Publisher as _;
        self.mqtt_client.publish(
            &format!("{}/state", self.mqtt_client.topic_path()),
            "offline",
            true,
        );
        if let Err(err) = self.mqtt_client.disconnect().await {
            debug!("Error disconnecting MQTT client: {err:?}");
        }
    }
}
