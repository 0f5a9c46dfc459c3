//! Shared rig for integration tests.
//!
//! Wires one declared device to a simulated peer through a [`SimPool`],
//! with every lifecycle event captured by a [`RecordingSink`].

use std::sync::{Arc, Mutex};

use coyote_link::adapters::sim::{SimClient, SimPool};
use coyote_link::app::device::Device;
use coyote_link::app::events::{DeviceEvent, LifecycleEvent};
use coyote_link::app::ports::{Advertisement, BleAddress, EventSink};
use coyote_link::app::registry::DeviceRegistry;
use coyote_link::channel::Channel;
use coyote_link::config::SystemConfig;
use coyote_link::coyote::v2::CoyoteV2;
use coyote_link::coyote::v3::CoyoteV3;
use coyote_link::protocol::v2::V2Segment;
use coyote_link::protocol::v3::V3Segment;
use coyote_link::protocol::{v2, v3};

pub const ADDR: BleAddress = BleAddress([0xC4, 0x6F, 0x21, 0x00, 0x10, 0x01]);
pub const NAME: &str = "coyote";

// ── Recording sink ────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<DeviceEvent>>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().iter().map(|e| e.event).collect()
    }

    pub fn last(&self) -> Option<LifecycleEvent> {
        self.events.lock().unwrap().last().map(|e| e.event)
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn all(&self) -> Vec<DeviceEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &DeviceEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ── Rig ───────────────────────────────────────────────────────

pub struct Rig {
    pub registry: DeviceRegistry,
    pub pool: SimPool,
    pub sim: Arc<SimClient>,
    pub events: RecordingSink,
    peer_name: &'static str,
}

/// Defaults with no settle delay, so the first service call emits.
pub fn fast_config() -> SystemConfig {
    SystemConfig {
        settle_delay_ms: 0,
        ..SystemConfig::default()
    }
}

#[allow(dead_code)]
impl Rig {
    pub fn v3(config: &SystemConfig) -> Self {
        let device = Device::coyote_v3(NAME, None, config).unwrap();
        Self::with(device, SimClient::coyote_v3(ADDR), v3::PEER_NAME)
    }

    /// V2 peer with a power step of 7 and a 2000-unit maximum.
    pub fn v2(config: &SystemConfig) -> Self {
        let device = Device::coyote_v2(NAME, None, config).unwrap();
        Self::with(device, SimClient::coyote_v2(ADDR, 7, 2000), v2::PEER_NAME)
    }

    fn with(device: Device, sim: SimClient, peer_name: &'static str) -> Self {
        let events = RecordingSink::new();
        device.subscribe(Box::new(events.clone()));
        let mut registry = DeviceRegistry::new();
        registry.register(device, true).unwrap();
        let sim = Arc::new(sim);
        let mut pool = SimPool::default();
        pool.add_peer(Arc::clone(&sim));
        Self {
            registry,
            pool,
            sim,
            events,
            peer_name,
        }
    }

    pub fn discover(&mut self) -> bool {
        self.registry
            .match_advertisement(&Advertisement {
                name: self.peer_name,
                address: ADDR,
            })
            .is_some()
    }

    /// Discover, connect and initialize.
    pub fn bring_up(&mut self) {
        assert!(self.discover());
        self.registry.bring_up_all(&mut self.pool).unwrap();
        assert!(self.device().is_initialized());
    }

    pub fn device(&self) -> &Device {
        self.registry.get(NAME).unwrap()
    }

    pub fn device_mut(&mut self) -> &mut Device {
        self.registry.get_mut(NAME).unwrap()
    }

    pub fn service(&mut self, now_ms: u64) {
        self.registry.service_all(now_ms);
    }

    /// Service every `step_ms` over `[from, to)`.
    pub fn run(&mut self, from: u64, to: u64, step_ms: u64) {
        let mut t = from;
        while t < to {
            self.service(t);
            t += step_ms;
        }
    }

    pub fn v2_engine(&self) -> &CoyoteV2 {
        self.device().peripheral().as_v2().unwrap()
    }

    pub fn v2_engine_mut(&mut self) -> &mut CoyoteV2 {
        self.device_mut().peripheral_mut().as_v2_mut().unwrap()
    }

    pub fn v3_engine(&self) -> &CoyoteV3 {
        self.device().peripheral().as_v3().unwrap()
    }

    pub fn v3_engine_mut(&mut self) -> &mut CoyoteV3 {
        self.device_mut().peripheral_mut().as_v3_mut().unwrap()
    }

    pub fn v2_a(&self) -> &Channel<V2Segment> {
        self.v2_engine().channel_a()
    }

    pub fn v3_a(&self) -> &Channel<V3Segment> {
        self.v3_engine().channel_a()
    }

    pub fn v3_b(&self) -> &Channel<V3Segment> {
        self.v3_engine().channel_b()
    }

    /// B0 frames written so far.
    pub fn v3_frames(&self) -> Vec<Vec<u8>> {
        self.sim
            .writes_to(v3::CHAR_WRITE)
            .into_iter()
            .filter(|w| w[0] == 0xB0)
            .collect()
    }

    /// BF frames written so far.
    pub fn v3_balance_frames(&self) -> Vec<Vec<u8>> {
        self.sim
            .writes_to(v3::CHAR_WRITE)
            .into_iter()
            .filter(|w| w[0] == 0xBF)
            .collect()
    }

    /// Deliver a B1 power ack.
    pub fn v3_ack(&self, serial: u8, a: u8, b: u8) {
        assert!(self.sim.notify(v3::CHAR_NOTIFY, &[0xB1, serial, a, b]));
    }
}
