//! Several devices in one registry, driven in batch and by the background
//! scheduler.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use coyote_link::adapters::sim::{SimClient, SimClock, SimPool};
use coyote_link::app::device::Device;
use coyote_link::app::ports::{Advertisement, BleAddress};
use coyote_link::app::registry::DeviceRegistry;
use coyote_link::protocol::{v2, v3};
use coyote_link::scheduler::Scheduler;

use crate::fixtures::fast_config;

const V2_ADDR: BleAddress = BleAddress([0xD0, 0, 0, 0, 0, 2]);
const V3_ADDR: BleAddress = BleAddress([0xD0, 0, 0, 0, 0, 3]);

struct Pair {
    registry: DeviceRegistry,
    pool: SimPool,
    v2: Arc<SimClient>,
    v3: Arc<SimClient>,
}

fn pair() -> Pair {
    let cfg = fast_config();
    let mut registry = DeviceRegistry::new();
    registry
        .register(Device::coyote_v2("left", Some(V2_ADDR), &cfg).unwrap(), true)
        .unwrap();
    registry
        .register(Device::coyote_v3("right", None, &cfg).unwrap(), false)
        .unwrap();
    let v2 = Arc::new(SimClient::coyote_v2(V2_ADDR, 7, 2000));
    let v3 = Arc::new(SimClient::coyote_v3(V3_ADDR));
    let mut pool = SimPool::default();
    pool.add_peer(Arc::clone(&v2));
    pool.add_peer(Arc::clone(&v3));
    Pair {
        registry,
        pool,
        v2,
        v3,
    }
}

fn advertise(registry: &mut DeviceRegistry, name: &str, address: BleAddress) -> Option<String> {
    registry
        .match_advertisement(&Advertisement { name, address })
        .map(|d| d.name().to_owned())
}

#[test]
fn scan_results_match_by_name_and_address() {
    let mut p = pair();
    assert_eq!(advertise(&mut p.registry, v2::PEER_NAME, V3_ADDR), None);
    assert_eq!(
        advertise(&mut p.registry, v2::PEER_NAME, V2_ADDR).as_deref(),
        Some("left")
    );
    assert_eq!(
        advertise(&mut p.registry, v3::PEER_NAME, V3_ADDR).as_deref(),
        Some("right")
    );
    assert_eq!(p.registry.found_devices().count(), 2);
    assert_eq!(p.registry.pending_discovery(), 0);
}

#[test]
fn only_found_devices_are_brought_up() {
    let mut p = pair();
    advertise(&mut p.registry, v2::PEER_NAME, V2_ADDR);
    p.registry.bring_up_all(&mut p.pool).unwrap();
    assert!(p.registry.get("left").unwrap().is_initialized());
    assert!(!p.registry.get("right").unwrap().is_connected());
    assert!(p.registry.all_found(), "right is optional");
    assert!(p.v3.connect_calls().is_empty());
}

#[test]
fn service_all_drives_both_protocols() {
    let mut p = pair();
    advertise(&mut p.registry, v2::PEER_NAME, V2_ADDR);
    advertise(&mut p.registry, v3::PEER_NAME, V3_ADDR);
    p.registry.bring_up_all(&mut p.pool).unwrap();

    let left = p.registry.get("left").unwrap().peripheral().as_v2().unwrap();
    left.channel_a().set_waveform(v2::presets::MEDIUM_WAVE, None).unwrap();
    left.channel_a().start(0);

    for t in (0..1000).step_by(50) {
        p.registry.service_all(t);
    }
    assert_eq!(p.v2.writes_to(v2::CHAR_WAVE_A).len(), 11);
    assert_eq!(
        p.v3.writes_to(v3::CHAR_WRITE)
            .iter()
            .filter(|f| f[0] == 0xB0)
            .count(),
        10
    );
}

#[test]
fn background_scheduler_services_devices() {
    let mut p = pair();
    advertise(&mut p.registry, v3::PEER_NAME, V3_ADDR);
    p.registry.bring_up_all(&mut p.pool).unwrap();

    let clock = SimClock::new();
    let registry = Arc::new(Mutex::new(p.registry));
    let mut handle = Scheduler::new(&fast_config())
        .spawn(Arc::clone(&registry), clock.clone())
        .unwrap();

    for _ in 0..5 {
        clock.advance(100);
        thread::sleep(Duration::from_millis(30));
    }
    handle.stop();

    let frames = p.v3.writes_to(v3::CHAR_WRITE);
    assert!(frames.iter().any(|f| f[..4] == [0xB0, 0xFF, 0, 0]));
    assert!(
        registry
            .lock()
            .unwrap()
            .get("right")
            .unwrap()
            .is_initialized()
    );
}
