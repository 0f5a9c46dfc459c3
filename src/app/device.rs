//! One declared peripheral and its lifecycle.
//!
//! A [`Device`] is created at configuration time, matched against scan
//! results by the [`DeviceRegistry`](super::registry::DeviceRegistry),
//! then driven through connect → init → service.  Protocol specifics live
//! in the [`Peripheral`] variant it wraps.
//!
//! The part of a device that transport callbacks must reach (state, event
//! sink, battery level) sits in an `Arc<DeviceLink>` so the callbacks can
//! hold it without borrowing the `Device`.

use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use heapless::String;
use log::{debug, error, info, warn};

use crate::app::events::{DeviceEvent, LifecycleEvent};
use crate::app::ports::{Advertisement, BleAddress, ClientPool, EventSink, GattClient, bounded_name};
use crate::config::SystemConfig;
use crate::coyote::Peripheral;
use crate::coyote::v2::CoyoteV2;
use crate::coyote::v3::CoyoteV3;
use crate::error::{ConnectError, Error, InitError, Result};
use crate::fsm::{LifecycleState, StateCell};

/// Capacity of unique names, peer names and channel names.
pub const NAME_LEN: usize = 32;

/// Battery level before the first report.
const BATTERY_UNKNOWN: u8 = u8::MAX;

/// Callback receiving battery level reports (percent).
pub type BatteryListener = Box<dyn FnMut(u8) + Send>;

// ---------------------------------------------------------------------------
// Shared link state
// ---------------------------------------------------------------------------

pub(crate) struct DeviceLink {
    name: String<NAME_LEN>,
    state: StateCell,
    sink: Mutex<Option<Box<dyn EventSink + Send>>>,
    battery: AtomicU8,
    battery_listener: Mutex<Option<BatteryListener>>,
}

impl DeviceLink {
    fn new(name: String<NAME_LEN>) -> Self {
        Self {
            name,
            state: StateCell::new(LifecycleState::Unfound),
            sink: Mutex::new(None),
            battery: AtomicU8::new(BATTERY_UNKNOWN),
            battery_listener: Mutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.state.load()
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.state.transition(&self.name, from, to)
    }

    pub(crate) fn emit(&self, event: LifecycleEvent) {
        debug!("{}: event {}", self.name, event);
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sink) = sink.as_mut() {
            sink.emit(&DeviceEvent {
                device: self.name.clone(),
                event,
            });
        }
    }

    /// Transport reported link loss.
    fn on_disconnect(&self) {
        if self.state.drop_link(&self.name).is_some() {
            warn!("{}: link lost", self.name);
            self.emit(LifecycleEvent::Disconnected);
        }
    }

    pub(crate) fn report_battery(&self, level: u8) {
        info!("{}: battery level = {}%", self.name, level);
        self.battery.store(level, Ordering::Relaxed);
        let mut listener = self
            .battery_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(cb) = listener.as_mut() {
            cb(level);
        }
    }
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

pub struct Device {
    link: Arc<DeviceLink>,
    peer_name: String<NAME_LEN>,
    address: Option<BleAddress>,
    /// Address taken from the matching advertisement.
    matched: Option<BleAddress>,
    auto_service: bool,
    connect_timeout_ms: u32,
    client: Option<Arc<dyn GattClient>>,
    peripheral: Peripheral,
}

impl Device {
    /// Declare a device.  An empty `peer_name` matches any advertised name.
    pub fn new(
        unique_name: &str,
        peer_name: &str,
        address: Option<BleAddress>,
        peripheral: Peripheral,
        config: &SystemConfig,
    ) -> Result<Self> {
        Ok(Self {
            link: Arc::new(DeviceLink::new(bounded_name(unique_name)?)),
            peer_name: bounded_name(peer_name)?,
            address,
            matched: None,
            auto_service: true,
            connect_timeout_ms: config.connect_timeout_ms,
            client: None,
            peripheral,
        })
    }

    /// A Coyote V2 (`D-LAB ESTIM01`).
    pub fn coyote_v2(
        unique_name: &str,
        address: Option<BleAddress>,
        config: &SystemConfig,
    ) -> Result<Self> {
        Self::new(
            unique_name,
            crate::protocol::v2::PEER_NAME,
            address,
            Peripheral::CoyoteV2(CoyoteV2::new(unique_name, config)),
            config,
        )
    }

    /// A Coyote V3 (`47L121000`).
    pub fn coyote_v3(
        unique_name: &str,
        address: Option<BleAddress>,
        config: &SystemConfig,
    ) -> Result<Self> {
        Self::new(
            unique_name,
            crate::protocol::v3::PEER_NAME,
            address,
            Peripheral::CoyoteV3(CoyoteV3::new(unique_name, config)),
            config,
        )
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        self.link.name()
    }

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    /// Declared address, or the matched one once found.
    pub fn address(&self) -> Option<BleAddress> {
        self.matched.or(self.address)
    }

    pub fn state(&self) -> LifecycleState {
        self.link.state()
    }

    pub fn is_found(&self) -> bool {
        self.state().is_found()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn is_initialized(&self) -> bool {
        self.state().is_initialized()
    }

    pub fn auto_service(&self) -> bool {
        self.auto_service
    }

    /// Last reported battery percentage.
    pub fn battery_level(&self) -> Option<u8> {
        match self.link.battery.load(Ordering::Relaxed) {
            BATTERY_UNKNOWN => None,
            level => Some(level),
        }
    }

    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    pub fn peripheral_mut(&mut self) -> &mut Peripheral {
        &mut self.peripheral
    }

    // ── Configuration ─────────────────────────────────────────────

    /// Opt out of [`DeviceRegistry::service_all`](super::registry::DeviceRegistry::service_all).
    /// The caller must then drive [`Device::service`] itself.
    pub fn disable_auto_service(&mut self) {
        self.auto_service = false;
    }

    /// Route every lifecycle event to `sink`, replacing any previous sink.
    pub fn subscribe(&self, sink: Box<dyn EventSink + Send>) {
        *self.link.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    pub fn subscribe_battery(&self, listener: BatteryListener) {
        *self
            .link
            .battery_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    // ── Discovery ─────────────────────────────────────────────────

    /// Whether an advertisement matches this (not yet found) device.
    pub fn matches(&self, adv: &Advertisement<'_>) -> bool {
        if self.is_found() {
            return false;
        }
        if !self.peer_name.is_empty() && self.peer_name.as_str() != adv.name {
            return false;
        }
        self.address.is_none_or(|a| a == adv.address)
    }

    pub(crate) fn mark_found(&mut self, address: BleAddress) -> bool {
        if !self
            .link
            .transition(LifecycleState::Unfound, LifecycleState::Found)
        {
            return false;
        }
        info!("{}: found {} at {}", self.name(), self.peer_name, address);
        self.matched = Some(address);
        self.link.emit(LifecycleEvent::Found);
        true
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Establish the link.  No-op when already connected.  On failure the
    /// device returns to the state it held before the attempt.
    pub fn connect(&mut self, pool: &mut dyn ClientPool) -> Result<()> {
        let prior = self.state();
        if prior.is_connected() {
            return Ok(());
        }
        let peer = match (prior.is_found(), self.address()) {
            (true, Some(peer)) => peer,
            _ => return Err(ConnectError::NotFound.into()),
        };
        if !self.link.transition(prior, LifecycleState::Connecting) {
            return Err(ConnectError::NotConnected.into());
        }
        self.link.emit(LifecycleEvent::StartConnect);

        match self.open_link(pool, peer) {
            Ok(client) => {
                self.client = Some(client);
                if !self
                    .link
                    .transition(LifecycleState::Connecting, LifecycleState::Connected)
                {
                    return Err(ConnectError::NotConnected.into());
                }
                self.link.emit(LifecycleEvent::Connected);
                Ok(())
            }
            Err(e) => {
                error!("{}: connect to {} failed: {}", self.name(), peer, e);
                self.link.transition(LifecycleState::Connecting, prior);
                self.link.emit(LifecycleEvent::Error);
                Err(e.into())
            }
        }
    }

    fn open_link(
        &self,
        pool: &mut dyn ClientPool,
        peer: BleAddress,
    ) -> core::result::Result<Arc<dyn GattClient>, ConnectError> {
        let (client, refresh) = if let Some(client) = pool.client_for_peer(peer) {
            debug!("{}: reusing client for {}", self.name(), peer);
            (client, false)
        } else if let Some(client) = pool.free_client() {
            (client, true)
        } else if let Some(client) = pool.create_client(peer) {
            (client, true)
        } else {
            return Err(ConnectError::NoClient);
        };

        let link = Arc::clone(&self.link);
        client.set_disconnect_handler(Box::new(move || link.on_disconnect()));

        if !client.is_connected() {
            client
                .connect(peer, refresh, self.connect_timeout_ms)
                .map_err(ConnectError::Failed)?;
        }
        if !client.is_connected() {
            return Err(ConnectError::NotConnected);
        }
        Ok(client)
    }

    /// Probe the peripheral's services.  Connects first if needed.
    /// No-op when already initialized.  On failure the device stays
    /// connected.
    pub fn init_device(&mut self, pool: &mut dyn ClientPool) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        self.connect(pool)?;
        let Some(client) = self.client.clone() else {
            return Err(ConnectError::NotConnected.into());
        };
        if !self
            .link
            .transition(LifecycleState::Connected, LifecycleState::Initializing)
        {
            return Err(ConnectError::NotConnected.into());
        }
        self.link.emit(LifecycleEvent::StartInit);

        let probed = client
            .discover_attributes()
            .map_err(InitError::DiscoveryFailed)
            .and_then(|()| self.peripheral.probe(&client, &self.link));

        match probed {
            Ok(()) => {
                if !self
                    .link
                    .transition(LifecycleState::Initializing, LifecycleState::Ready)
                {
                    self.peripheral.unbind();
                    return Err(ConnectError::NotConnected.into());
                }
                info!("{}: initialized", self.name());
                self.link.emit(LifecycleEvent::Init);
                Ok(())
            }
            Err(e) => {
                error!("{}: init failed: {}", self.name(), e);
                self.peripheral.unbind();
                self.link
                    .transition(LifecycleState::Initializing, LifecycleState::Connected);
                self.link.emit(LifecycleEvent::Error);
                Err(Error::Init(e))
            }
        }
    }

    /// Run one service step.  Does nothing unless initialized.
    pub fn service(&mut self, now_ms: u64) {
        let state = self.state();
        if !state.is_initialized() {
            return;
        }
        let Some(client) = self.client.as_deref() else {
            return;
        };
        if state == LifecycleState::Ready {
            self.link
                .transition(LifecycleState::Ready, LifecycleState::Servicing);
        }
        self.peripheral.service(client, now_ms);
    }

    /// Drop the link, if any.  The disconnect callback moves the state.
    pub fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            if client.is_connected() {
                client.disconnect();
            }
        }
        // Transports that do not call back on a local disconnect.
        self.link.on_disconnect();
        self.peripheral.unbind();
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if self.client.is_some() {
            self.disconnect();
        }
    }
}
