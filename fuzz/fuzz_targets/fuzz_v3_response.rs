//! Fuzz target: V3 0x150B notification handling
//!
//! Feeds arbitrary payloads to a started V3 device as notifications and
//! asserts the engine keeps producing well-formed 20-byte frames whose
//! serial stays in range.
//!
//! cargo fuzz run fuzz_v3_response

#![no_main]

use std::sync::Arc;

use coyote_link::adapters::sim::{SimClient, SimPool};
use coyote_link::app::device::Device;
use coyote_link::app::ports::{Advertisement, BleAddress};
use coyote_link::app::registry::DeviceRegistry;
use coyote_link::config::SystemConfig;
use coyote_link::protocol::v3::{self, FRAME_LEN, Response};
use libfuzzer_sys::fuzz_target;

const ADDR: BleAddress = BleAddress([0xF0, 0, 0, 0, 0, 1]);

fuzz_target!(|data: &[u8]| {
    // Decoding alone must be total.
    let _ = Response::decode(data);

    let cfg = SystemConfig {
        settle_delay_ms: 0,
        ..SystemConfig::default()
    };
    let mut registry = DeviceRegistry::new();
    let Ok(device) = Device::coyote_v3("fuzz", None, &cfg) else {
        return;
    };
    if registry.register(device, true).is_err() {
        return;
    }
    let sim = Arc::new(SimClient::coyote_v3(ADDR));
    let mut pool = SimPool::default();
    pool.add_peer(Arc::clone(&sim));
    registry.match_advertisement(&Advertisement {
        name: v3::PEER_NAME,
        address: ADDR,
    });
    if registry.bring_up_all(&mut pool).is_err() {
        return;
    }

    let mut now = 0;
    for chunk in data.chunks(7) {
        sim.notify(v3::CHAR_NOTIFY, chunk);
        if let Some(dev) = registry.get("fuzz").and_then(|d| d.peripheral().as_v3()) {
            let _ = dev.channel_a().set_power(chunk[0], coyote_link::channel::PowerMode::Safe);
        }
        registry.service_all(now);
        now += 100;
    }

    for frame in sim.writes_to(v3::CHAR_WRITE) {
        match frame[0] {
            0xB0 => assert_eq!(frame.len(), FRAME_LEN),
            0xBF => assert_eq!(frame.len(), v3::BALANCE_FRAME_LEN),
            other => panic!("unexpected frame header {other:#04x}"),
        }
    }
});
