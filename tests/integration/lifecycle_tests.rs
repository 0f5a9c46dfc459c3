//! Device lifecycle against the simulated peer: discovery, connect, init,
//! link loss and reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use coyote_link::adapters::sim::SimPool;
use coyote_link::app::events::LifecycleEvent as Ev;
use coyote_link::app::ports::GattClient;
use coyote_link::error::{ConnectError, Error, GattError, InitError};
use coyote_link::fsm::LifecycleState;
use coyote_link::protocol::{v2, v3};

use crate::fixtures::{NAME, Rig, fast_config};

const CLEAN_BRING_UP: [Ev; 5] = [
    Ev::Found,
    Ev::StartConnect,
    Ev::Connected,
    Ev::StartInit,
    Ev::Init,
];

#[test]
fn clean_bring_up_emits_events_in_order() {
    let mut rig = Rig::v3(&fast_config());
    rig.bring_up();
    assert_eq!(rig.events.kinds(), CLEAN_BRING_UP);
    assert!(rig.events.all().iter().all(|e| e.device.as_str() == NAME));
    assert_eq!(rig.device().state(), LifecycleState::Ready);
    assert!(rig.registry.all_found());
}

#[test]
fn first_service_moves_ready_to_servicing() {
    let mut rig = Rig::v3(&fast_config());
    rig.bring_up();
    rig.service(0);
    assert_eq!(rig.device().state(), LifecycleState::Servicing);
    assert!(rig.device().is_initialized());
}

#[test]
fn connect_before_discovery_is_refused() {
    let mut rig = Rig::v3(&fast_config());
    let mut pool = SimPool::default();
    assert_eq!(
        rig.device_mut().connect(&mut pool),
        Err(Error::Connect(ConnectError::NotFound))
    );
    assert!(rig.events.kinds().is_empty());
}

#[test]
fn failed_connect_returns_to_found_and_reports_error() {
    let mut rig = Rig::v3(&fast_config());
    rig.sim.fail_connect(true);
    assert!(rig.discover());
    assert_eq!(
        rig.registry.bring_up_all(&mut rig.pool),
        Err(Error::Connect(ConnectError::Failed(GattError::Timeout)))
    );
    assert_eq!(rig.device().state(), LifecycleState::Found);
    assert_eq!(rig.events.kinds(), [Ev::Found, Ev::StartConnect, Ev::Error]);

    // Retry reuses the same client without refreshing attributes.
    rig.sim.fail_connect(false);
    rig.registry.bring_up_all(&mut rig.pool).unwrap();
    assert!(rig.device().is_initialized());
    assert_eq!(rig.sim.connect_calls(), [true, false]);
    assert_eq!(rig.pool.created(), 1);
}

#[test]
fn exhausted_pool_reports_no_client() {
    let mut rig = Rig::v3(&fast_config());
    assert!(rig.discover());
    let mut empty = SimPool::new(0);
    assert_eq!(
        rig.device_mut().connect(&mut empty),
        Err(Error::Connect(ConnectError::NoClient))
    );
    assert_eq!(rig.device().state(), LifecycleState::Found);
    assert_eq!(rig.events.last(), Some(Ev::Error));
}

#[test]
fn missing_control_service_leaves_device_connected() {
    let mut rig = Rig::v3(&fast_config());
    rig.sim.remove_service(v3::SERVICE_CONTROL);
    assert!(rig.discover());
    assert_eq!(
        rig.registry.bring_up_all(&mut rig.pool),
        Err(Error::Init(InitError::MissingService(v3::SERVICE_CONTROL)))
    );
    assert_eq!(rig.device().state(), LifecycleState::Connected);
    assert!(rig.device().is_connected());
    assert!(!rig.device().is_initialized());
    assert_eq!(
        rig.events.kinds(),
        [
            Ev::Found,
            Ev::StartConnect,
            Ev::Connected,
            Ev::StartInit,
            Ev::Error
        ]
    );
    assert!(!rig.registry.all_found());
}

#[test]
fn missing_notify_characteristic_fails_init() {
    let mut rig = Rig::v3(&fast_config());
    rig.sim.remove_characteristic(v3::CHAR_NOTIFY);
    assert!(rig.discover());
    assert_eq!(
        rig.registry.bring_up_all(&mut rig.pool),
        Err(Error::Init(InitError::MissingCharacteristic(v3::CHAR_NOTIFY)))
    );
    assert!(rig.device().is_connected());
}

#[test]
fn subscribe_failure_fails_init() {
    let mut rig = Rig::v3(&fast_config());
    rig.sim.fail_subscribe(Some(v3::CHAR_NOTIFY));
    assert!(rig.discover());
    assert_eq!(
        rig.registry.bring_up_all(&mut rig.pool),
        Err(Error::Init(InitError::SubscribeFailed(v3::CHAR_NOTIFY)))
    );
}

#[test]
fn battery_characteristic_is_optional() {
    let mut rig = Rig::v3(&fast_config());
    rig.sim.remove_characteristic(v3::CHAR_BATTERY);
    rig.bring_up();
    assert_eq!(rig.device().battery_level(), None);
}

#[test]
fn battery_notifications_reach_listener() {
    let mut rig = Rig::v3(&fast_config());
    let seen = Arc::new(AtomicU8::new(0));
    let s = Arc::clone(&seen);
    rig.device()
        .subscribe_battery(Box::new(move |level: u8| s.store(level, Ordering::Relaxed)));
    rig.bring_up();
    assert!(rig.sim.notify(v3::CHAR_BATTERY, &[77]));
    assert_eq!(rig.device().battery_level(), Some(77));
    assert_eq!(seen.load(Ordering::Relaxed), 77);
}

#[test]
fn repeated_init_is_a_no_op() {
    let mut rig = Rig::v3(&fast_config());
    rig.bring_up();
    rig.events.clear();
    rig.registry.bring_up_all(&mut rig.pool).unwrap();
    assert!(rig.events.kinds().is_empty());
    assert_eq!(rig.sim.connect_calls().len(), 1);
}

#[test]
fn link_loss_moves_to_disconnected_and_stops_writes() {
    let mut rig = Rig::v3(&fast_config());
    rig.bring_up();
    rig.service(0);
    rig.sim.drop_link();

    assert_eq!(rig.device().state(), LifecycleState::Disconnected);
    assert_eq!(rig.events.last(), Some(Ev::Disconnected));
    assert!(rig.device().is_found());
    assert!(!rig.device().is_connected());
    assert!(!rig.registry.all_found());

    rig.sim.clear_writes();
    rig.run(100, 1000, 100);
    assert!(rig.sim.writes().is_empty());
}

#[test]
fn reconnect_after_link_loss_restarts_the_engine() {
    let mut rig = Rig::v3(&fast_config());
    rig.bring_up();
    rig.run(0, 300, 100);
    rig.sim.drop_link();
    rig.events.clear();
    rig.sim.clear_writes();

    rig.registry.bring_up_all(&mut rig.pool).unwrap();
    assert_eq!(
        rig.events.kinds(),
        [Ev::StartConnect, Ev::Connected, Ev::StartInit, Ev::Init]
    );
    rig.service(1000);
    let frames = rig.v3_frames();
    assert_eq!(&frames[0][..4], &[0xB0, 0xFF, 0, 0], "zeroing frame again");
}

#[test]
fn local_disconnect_reports_once() {
    let mut rig = Rig::v3(&fast_config());
    rig.bring_up();
    rig.device_mut().disconnect();
    assert!(!rig.sim.is_connected());
    let disconnects = rig
        .events
        .kinds()
        .into_iter()
        .filter(|e| *e == Ev::Disconnected)
        .count();
    assert_eq!(disconnects, 1);
}

#[test]
fn teardown_drops_every_link() {
    let mut rig = Rig::v3(&fast_config());
    rig.bring_up();
    rig.registry.teardown();
    assert!(!rig.sim.is_connected());
    assert!(rig.registry.is_empty());
}

#[test]
fn v2_zero_power_step_fails_init() {
    let mut rig = Rig::v2(&fast_config());
    rig.sim.set_value(v2::CHAR_CONFIG, &[0, 0x10, 0]);
    assert!(rig.discover());
    assert_eq!(
        rig.registry.bring_up_all(&mut rig.pool),
        Err(Error::Init(InitError::InvalidConfig("zero power step")))
    );
    assert!(rig.device().is_connected());
}

#[test]
fn v2_probe_reads_firmware_and_power_limits() {
    let mut rig = Rig::v2(&fast_config());
    rig.bring_up();
    let engine = rig.v2_engine();
    assert_eq!(engine.firmware(), Some((0x01, 0x02)));
    assert_eq!(engine.step(), Some(7));
    assert_eq!(engine.hardware_max(), 255, "2000 / 7 saturates");
    assert_eq!(engine.channel_a().max_power(), 100);
}

#[test]
fn auto_service_opt_out_needs_manual_service() {
    let mut rig = Rig::v3(&fast_config());
    rig.bring_up();
    rig.device_mut().disable_auto_service();
    rig.service(0);
    assert!(rig.sim.writes().is_empty());
    assert_eq!(rig.device().state(), LifecycleState::Ready);

    rig.registry.service(NAME, 0).unwrap();
    assert!(!rig.sim.writes().is_empty());
}
