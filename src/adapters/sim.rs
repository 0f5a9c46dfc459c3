//! In-memory BLE peer simulation.
//!
//! | Type        | Implements  | Role                                        |
//! |-------------|-------------|---------------------------------------------|
//! | `SimClient` | GattClient  | One connection to one emulated Coyote       |
//! | `SimPool`   | ClientPool  | Bounded client slots, keyed by peer address |
//! | `SimClock`  | TimePort    | Clock advanced by hand                      |
//!
//! Every write is recorded so callers can assert on the exact frames a
//! device produced.  Notifications and link loss are injected with
//! [`SimClient::notify`] and [`SimClient::drop_link`].  Callbacks always
//! run with the client's lock released, so they may call back into it.

use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info};

use crate::app::ports::{
    AttrValue, BleAddress, CharacteristicRef, ClientPool, DisconnectFn, GattClient, MAX_WRITE_LEN,
    NotifyFn, TimePort,
};
use crate::error::GattError;
use crate::protocol::{Uuid, v2, v3};

/// Client slots a [`SimPool`] hands out before refusing.
pub const DEFAULT_POOL_SLOTS: usize = 4;

/// One recorded characteristic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimWrite {
    pub uuid: Uuid,
    pub data: Vec<u8>,
}

struct Attr {
    service: Uuid,
    uuid: Uuid,
    value: AttrValue,
    notify: Option<NotifyFn>,
}

struct Inner {
    address: BleAddress,
    connected: bool,
    last_peer: Option<BleAddress>,
    discovered: bool,
    services: Vec<Uuid>,
    attrs: Vec<Attr>,
    writes: Vec<SimWrite>,
    /// `refresh` flag of every connect attempt.
    connects: Vec<bool>,
    fail_connect: bool,
    fail_subscribe: Option<Uuid>,
    on_disconnect: Option<DisconnectFn>,
}

// ---------------------------------------------------------------------------
// SimClient
// ---------------------------------------------------------------------------

pub struct SimClient {
    inner: Mutex<Inner>,
}

impl SimClient {
    /// A peer at `address` with no services.
    pub fn new(address: BleAddress) -> Self {
        Self {
            inner: Mutex::new(Inner {
                address,
                connected: false,
                last_peer: None,
                discovered: false,
                services: Vec::new(),
                attrs: Vec::new(),
                writes: Vec::new(),
                connects: Vec::new(),
                fail_connect: false,
                fail_subscribe: None,
                on_disconnect: None,
            }),
        }
    }

    /// A Coyote V2 with the given power step and maximum (device units).
    pub fn coyote_v2(address: BleAddress, step: u8, max_raw: u16) -> Self {
        let sim = Self::new(address);
        let cfg = (u32::from(step) | (u32::from(max_raw) & 0x7FF) << 8).to_le_bytes();
        sim.add_service(v2::SERVICE_DEVICE_INFO);
        sim.add_characteristic(v2::SERVICE_DEVICE_INFO, v2::CHAR_BATTERY, &[100]);
        sim.add_characteristic(v2::SERVICE_DEVICE_INFO, v2::CHAR_FIRMWARE, &[0x01, 0x02]);
        sim.add_service(v2::SERVICE_POWER);
        sim.add_characteristic(v2::SERVICE_POWER, v2::CHAR_CONFIG, &cfg[..3]);
        sim.add_characteristic(v2::SERVICE_POWER, v2::CHAR_POWER, &[0, 0, 0]);
        sim.add_characteristic(v2::SERVICE_POWER, v2::CHAR_WAVE_A, &[0, 0, 0]);
        sim.add_characteristic(v2::SERVICE_POWER, v2::CHAR_WAVE_B, &[0, 0, 0]);
        sim
    }

    /// A Coyote V3.
    pub fn coyote_v3(address: BleAddress) -> Self {
        let sim = Self::new(address);
        sim.add_service(v3::SERVICE_BATTERY);
        sim.add_characteristic(v3::SERVICE_BATTERY, v3::CHAR_BATTERY, &[100]);
        sim.add_service(v3::SERVICE_CONTROL);
        sim.add_characteristic(v3::SERVICE_CONTROL, v3::CHAR_WRITE, &[]);
        sim.add_characteristic(v3::SERVICE_CONTROL, v3::CHAR_NOTIFY, &[]);
        sim
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn address(&self) -> BleAddress {
        self.lock().address
    }

    // ── Shaping the peer ──────────────────────────────────────────

    pub fn add_service(&self, service: Uuid) {
        let mut inner = self.lock();
        if !inner.services.contains(&service) {
            inner.services.push(service);
        }
    }

    pub fn add_characteristic(&self, service: Uuid, uuid: Uuid, value: &[u8]) {
        let value = AttrValue::from_slice(value).unwrap_or_default();
        self.lock().attrs.push(Attr {
            service,
            uuid,
            value,
            notify: None,
        });
    }

    /// Drop a service and all of its characteristics.
    pub fn remove_service(&self, service: Uuid) {
        let mut inner = self.lock();
        inner.services.retain(|s| *s != service);
        inner.attrs.retain(|a| a.service != service);
    }

    pub fn remove_characteristic(&self, uuid: Uuid) {
        self.lock().attrs.retain(|a| a.uuid != uuid);
    }

    /// Replace the value a later read returns.
    pub fn set_value(&self, uuid: Uuid, value: &[u8]) {
        let mut inner = self.lock();
        if let Some(attr) = inner.attrs.iter_mut().find(|a| a.uuid == uuid) {
            attr.value = AttrValue::from_slice(value).unwrap_or_default();
        }
    }

    /// Make every later connect attempt fail.
    pub fn fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    /// Make subscribing to `uuid` fail.
    pub fn fail_subscribe(&self, uuid: Option<Uuid>) {
        self.lock().fail_subscribe = uuid;
    }

    // ── Injecting peer activity ───────────────────────────────────

    /// Deliver a notification on `uuid`.  Returns `false` when nobody is
    /// subscribed or the link is down.
    pub fn notify(&self, uuid: Uuid, data: &[u8]) -> bool {
        let taken = {
            let mut inner = self.lock();
            if !inner.connected {
                return false;
            }
            inner
                .attrs
                .iter_mut()
                .find(|a| a.uuid == uuid)
                .and_then(|a| a.notify.take())
        };
        let Some(mut callback) = taken else {
            return false;
        };
        callback(data);
        let mut inner = self.lock();
        if let Some(attr) = inner.attrs.iter_mut().find(|a| a.uuid == uuid) {
            // Keep a subscription installed by the callback itself.
            if attr.notify.is_none() {
                attr.notify = Some(callback);
            }
        }
        true
    }

    /// Simulate link loss initiated by the peer.
    pub fn drop_link(&self) {
        let handler = {
            let mut inner = self.lock();
            if !inner.connected {
                return;
            }
            info!("sim {}: link dropped", inner.address);
            inner.connected = false;
            inner.discovered = false;
            inner.on_disconnect.take()
        };
        self.run_disconnect_handler(handler);
    }

    fn run_disconnect_handler(&self, handler: Option<DisconnectFn>) {
        let Some(mut handler) = handler else {
            return;
        };
        handler();
        let mut inner = self.lock();
        if inner.on_disconnect.is_none() {
            inner.on_disconnect = Some(handler);
        }
    }

    // ── Inspection ────────────────────────────────────────────────

    pub fn writes(&self) -> Vec<SimWrite> {
        self.lock().writes.clone()
    }

    /// Payloads written to `uuid`, oldest first.
    pub fn writes_to(&self, uuid: Uuid) -> Vec<Vec<u8>> {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.uuid == uuid)
            .map(|w| w.data.clone())
            .collect()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// `refresh` flag of every connect attempt so far.
    pub fn connect_calls(&self) -> Vec<bool> {
        self.lock().connects.clone()
    }

    pub fn is_subscribed(&self, uuid: Uuid) -> bool {
        self.lock()
            .attrs
            .iter()
            .any(|a| a.uuid == uuid && a.notify.is_some())
    }
}

impl GattClient for SimClient {
    fn connect(&self, peer: BleAddress, refresh: bool, _timeout_ms: u32) -> Result<(), GattError> {
        let mut inner = self.lock();
        inner.connects.push(refresh);
        if inner.fail_connect || peer != inner.address {
            debug!("sim {}: refusing connect to {}", inner.address, peer);
            return Err(GattError::Timeout);
        }
        inner.connected = true;
        inner.last_peer = Some(peer);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn disconnect(&self) {
        let handler = {
            let mut inner = self.lock();
            if !inner.connected {
                return;
            }
            inner.connected = false;
            inner.discovered = false;
            inner.on_disconnect.take()
        };
        self.run_disconnect_handler(handler);
    }

    fn peer_address(&self) -> Option<BleAddress> {
        self.lock().last_peer
    }

    fn set_disconnect_handler(&self, handler: DisconnectFn) {
        self.lock().on_disconnect = Some(handler);
    }

    fn discover_attributes(&self) -> Result<(), GattError> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(GattError::NotConnected);
        }
        inner.discovered = true;
        Ok(())
    }

    fn has_service(&self, service: Uuid) -> bool {
        let inner = self.lock();
        inner.discovered && inner.services.contains(&service)
    }

    fn find_characteristic(&self, service: Uuid, uuid: Uuid) -> Option<CharacteristicRef> {
        let inner = self.lock();
        if !inner.discovered {
            return None;
        }
        inner
            .attrs
            .iter()
            .find(|a| a.service == service && a.uuid == uuid)
            .map(|a| CharacteristicRef {
                service: a.service,
                uuid: a.uuid,
            })
    }

    fn read(&self, ch: CharacteristicRef) -> Result<AttrValue, GattError> {
        let inner = self.lock();
        if !inner.connected {
            return Err(GattError::NotConnected);
        }
        inner
            .attrs
            .iter()
            .find(|a| a.service == ch.service && a.uuid == ch.uuid)
            .map(|a| a.value.clone())
            .ok_or(GattError::UnknownAttribute)
    }

    fn write(&self, ch: CharacteristicRef, data: &[u8]) -> Result<(), GattError> {
        if data.len() > MAX_WRITE_LEN {
            return Err(GattError::TooLong);
        }
        let mut inner = self.lock();
        if !inner.connected {
            return Err(GattError::NotConnected);
        }
        if !inner.attrs.iter().any(|a| a.uuid == ch.uuid) {
            return Err(GattError::UnknownAttribute);
        }
        inner.writes.push(SimWrite {
            uuid: ch.uuid,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn subscribe(&self, ch: CharacteristicRef, callback: NotifyFn) -> Result<(), GattError> {
        let mut inner = self.lock();
        if !inner.connected {
            return Err(GattError::NotConnected);
        }
        if inner.fail_subscribe == Some(ch.uuid) {
            return Err(GattError::Io);
        }
        let attr = inner
            .attrs
            .iter_mut()
            .find(|a| a.service == ch.service && a.uuid == ch.uuid)
            .ok_or(GattError::UnknownAttribute)?;
        attr.notify = Some(callback);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SimPool
// ---------------------------------------------------------------------------

/// Pool of simulated clients.  Peers registered with [`add_peer`](Self::add_peer)
/// are handed out by [`create_client`](ClientPool::create_client) when the
/// requested address matches.
pub struct SimPool {
    slots: usize,
    peers: Vec<Arc<SimClient>>,
    free: Vec<Arc<SimClient>>,
    handed_out: Vec<Arc<SimClient>>,
    created: usize,
}

impl Default for SimPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SLOTS)
    }
}

impl SimPool {
    pub fn new(slots: usize) -> Self {
        Self {
            slots,
            peers: Vec::new(),
            free: Vec::new(),
            handed_out: Vec::new(),
            created: 0,
        }
    }

    /// Make a peer reachable through `create_client`.
    pub fn add_peer(&mut self, peer: Arc<SimClient>) {
        self.peers.push(peer);
    }

    /// Offer an idle client through `free_client`.
    pub fn add_free(&mut self, client: Arc<SimClient>) {
        self.free.push(client);
    }

    /// Number of clients created so far.
    pub fn created(&self) -> usize {
        self.created
    }

    fn hand_out(&mut self, client: Arc<SimClient>) -> Arc<dyn GattClient> {
        if !self.handed_out.iter().any(|c| Arc::ptr_eq(c, &client)) {
            self.handed_out.push(Arc::clone(&client));
        }
        client
    }
}

impl ClientPool for SimPool {
    /// Any client handed out earlier for `peer`, connected or not.
    fn client_for_peer(&mut self, peer: BleAddress) -> Option<Arc<dyn GattClient>> {
        self.handed_out
            .iter()
            .find(|c| c.address() == peer)
            .map(|c| Arc::clone(c) as Arc<dyn GattClient>)
    }

    fn free_client(&mut self) -> Option<Arc<dyn GattClient>> {
        let idx = self.free.iter().position(|c| !c.is_connected())?;
        let client = self.free.remove(idx);
        Some(self.hand_out(client))
    }

    fn create_client(&mut self, peer: BleAddress) -> Option<Arc<dyn GattClient>> {
        if self.created >= self.slots {
            debug!("sim pool: out of client slots");
            return None;
        }
        let idx = self.peers.iter().position(|c| c.address() == peer)?;
        let client = self.peers.remove(idx);
        self.created += 1;
        Some(self.hand_out(client))
    }
}

// ---------------------------------------------------------------------------
// SimClock
// ---------------------------------------------------------------------------

/// Shared, manually advanced millisecond clock.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Arc<AtomicU64>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::Relaxed);
    }

    pub fn advance(&self, ms: u64) -> u64 {
        self.now.fetch_add(ms, Ordering::Relaxed) + ms
    }
}

impl TimePort for SimClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}
