//! Coyote V3 engine against the simulated peer: frame cadence, serial
//! handshake, balance frames and slot filling.

use std::sync::{Arc, Mutex};

use coyote_link::channel::{ChannelId, PowerMode};
use coyote_link::config::SystemConfig;
use coyote_link::protocol::v3::{self, Balance, V3Segment};

use crate::fixtures::{Rig, fast_config};

/// Brought-up V3 rig that has already sent its start-up frames and seen
/// them acknowledged.
fn started() -> Rig {
    let mut rig = Rig::v3(&fast_config());
    rig.bring_up();
    rig.service(0);
    rig.v3_ack(0x0F, 0, 0);
    rig.sim.clear_writes();
    rig
}

#[test]
fn first_frames_are_zeroing_then_balance() {
    let mut rig = Rig::v3(&fast_config());
    rig.bring_up();
    rig.service(0);
    let writes = rig.sim.writes_to(v3::CHAR_WRITE);
    assert_eq!(writes.len(), 2);
    assert_eq!(&writes[0][..4], &[0xB0, 0xFF, 0x00, 0x00]);
    assert_eq!(&writes[0][4..], &[0xFF; 16], "silent slots");
    assert_eq!(writes[1], [0xBF, 200, 200, 32, 32, 32, 32]);
    assert_eq!(rig.v3_engine().pending_serial(), Some(0x0F));
}

#[test]
fn settle_delay_holds_back_the_first_frame() {
    let mut rig = Rig::v3(&SystemConfig::default());
    rig.bring_up();
    rig.service(0);
    rig.service(999);
    assert!(rig.sim.writes().is_empty());
    rig.service(1000);
    assert_eq!(rig.v3_frames().len(), 1);
}

#[test]
fn one_frame_per_period() {
    let mut rig = started();
    rig.run(100, 1100, 10);
    assert_eq!(rig.v3_frames().len(), 10);
    assert!(rig.v3_frames().iter().all(|f| f.len() == v3::FRAME_LEN));
}

#[test]
fn late_driver_does_not_burst() {
    let mut rig = started();
    rig.service(100);
    rig.service(750);
    rig.service(760);
    assert_eq!(rig.v3_frames().len(), 2);
    rig.service(850);
    assert_eq!(rig.v3_frames().len(), 3);
}

#[test]
fn power_change_carries_serial_and_only_its_mode_bits() {
    let mut rig = started();
    rig.v3_a().set_power(20, PowerMode::Safe).unwrap();
    rig.service(100);
    let f = &rig.v3_frames()[0];
    assert_eq!(f[1], 0x1C, "serial 1, absolute set on A only");
    assert_eq!(f[2], 20);
    assert_eq!(f[3], 0);
    assert_eq!(rig.v3_engine().pending_serial(), Some(1));
    assert_eq!(rig.v3_a().sent_power(), 20);
}

#[test]
fn no_new_serial_while_one_is_outstanding() {
    let mut rig = started();
    rig.v3_a().set_power(20, PowerMode::Safe).unwrap();
    rig.service(100);
    rig.v3_b().set_power(10, PowerMode::Safe).unwrap();
    rig.service(200);
    rig.service(300);
    let frames = rig.v3_frames();
    assert_eq!(frames[1][1], 0x00);
    assert_eq!(frames[2][1], 0x00);

    rig.v3_ack(1, 20, 0);
    assert_eq!(rig.v3_a().power(), 20);
    assert_eq!(rig.v3_engine().pending_serial(), None);

    rig.service(400);
    let f = &rig.v3_frames()[3];
    assert_eq!(f[1], 0x23, "serial 2, absolute set on B only");
    assert_eq!(f[3], 10);
}

#[test]
fn both_channels_change_in_one_frame() {
    let mut rig = started();
    rig.v3_a().set_power(15, PowerMode::Safe).unwrap();
    rig.v3_b().set_power(25, PowerMode::Safe).unwrap();
    rig.service(100);
    let f = &rig.v3_frames()[0];
    assert_eq!(&f[1..4], &[0x1F, 15, 25]);
}

#[test]
fn wrong_serial_unblocks_without_confirming() {
    let mut rig = started();
    rig.v3_a().set_power(30, PowerMode::Safe).unwrap();
    rig.service(100);
    rig.v3_ack(9, 30, 0);
    assert_eq!(rig.v3_engine().pending_serial(), None);
    assert_eq!(rig.v3_a().power(), 0, "mismatched ack is not applied");

    // Still pending, so the next frame retries with a fresh serial.
    rig.service(200);
    let f = &rig.v3_frames()[1];
    assert_eq!(f[1], 0x2C);
    assert_eq!(f[2], 30);
}

#[test]
fn device_side_change_is_adopted() {
    let mut rig = started();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    rig.v3_a()
        .subscribe_power(Box::new(move |p: u8| s.lock().unwrap().push(p)));

    // Serial 0 with nothing outstanding: the wheel was turned on the box.
    rig.v3_ack(0, 37, 48);
    assert_eq!(rig.v3_a().power(), 37);
    assert_eq!(rig.v3_b().power(), 48);
    assert_eq!(*seen.lock().unwrap(), [37]);
}

#[test]
fn balance_report_is_recorded() {
    let rig = started();
    assert_eq!(rig.v3_engine().reported_balance(), None);
    assert!(rig.sim.notify(v3::CHAR_NOTIFY, &[0xBE, 100, 120, 1, 2, 3, 4]));
    assert_eq!(
        rig.v3_engine().reported_balance(),
        Some(Balance {
            limit_a: 100,
            limit_b: 120,
            freq_balance_a: 1,
            freq_balance_b: 2,
            intensity_balance_a: 3,
            intensity_balance_b: 4,
        })
    );
}

#[test]
fn garbage_notifications_are_ignored() {
    let mut rig = started();
    rig.v3_a().set_power(20, PowerMode::Safe).unwrap();
    rig.service(100);
    for junk in [&[][..], &[0xB1, 1][..], &[0x42, 0, 0, 0][..]] {
        rig.sim.notify(v3::CHAR_NOTIFY, junk);
    }
    assert_eq!(rig.v3_engine().pending_serial(), Some(1));
}

#[test]
fn max_power_updates_soft_limits() {
    let mut rig = started();
    rig.v3_engine_mut().set_max_power(80, 250);
    assert_eq!(rig.v3_a().max_power(), 80);
    assert_eq!(rig.v3_b().max_power(), 200);
    rig.service(100);
    assert_eq!(rig.v3_balance_frames(), [vec![0xBF, 80, 200, 32, 32, 32, 32]]);

    rig.service(200);
    assert_eq!(rig.v3_balance_frames().len(), 1, "balance only resent on change");
}

#[test]
fn balance_parameters_per_channel() {
    let mut rig = started();
    rig.v3_engine_mut().set_balance(ChannelId::B, 10, 90);
    rig.service(100);
    assert_eq!(rig.v3_balance_frames(), [vec![0xBF, 200, 200, 32, 10, 32, 90]]);
}

#[test]
fn idle_channel_sends_sentinel_slots() {
    let mut rig = started();
    rig.v3_a()
        .set_waveform(&[V3Segment::new(20, 30, 1)], None)
        .unwrap();
    rig.v3_a().start(0);
    rig.service(100);
    let f = &rig.v3_frames()[0];
    assert_eq!(&f[4..8], &[20; 4]);
    assert_eq!(&f[8..12], &[30; 4]);
    assert_eq!(&f[12..20], &[0xFF; 8], "B idle");
}

#[test]
fn slots_cycle_through_the_waveform() {
    let mut rig = started();
    let wave = [V3Segment::new(10, 1, 1), V3Segment::new(20, 2, 1), V3Segment::new(30, 3, 1)];
    rig.v3_a().set_waveform(&wave, None).unwrap();
    rig.v3_a().start(0);
    rig.service(100);
    rig.service(200);
    let frames = rig.v3_frames();
    assert_eq!(&frames[0][4..8], &[10, 20, 30, 10]);
    assert_eq!(&frames[1][4..8], &[20, 30, 10, 20]);
    assert_eq!(&frames[1][8..12], &[2, 3, 1, 2]);
}

#[test]
fn stopped_channel_goes_silent() {
    let mut rig = started();
    rig.v3_a()
        .set_waveform(&[V3Segment::new(20, 30, 1)], None)
        .unwrap();
    rig.v3_a().start(0);
    rig.service(100);
    rig.v3_a().stop();
    rig.service(200);
    assert_eq!(&rig.v3_frames()[1][4..12], &[0xFF; 8]);
}

#[test]
fn v2_waveform_plays_on_v3() {
    let mut rig = started();
    rig.v3_a()
        .set_v2_waveform(coyote_link::protocol::v2::presets::AUDIO_BASE, Some(10))
        .unwrap();
    rig.v3_a().start(0);
    rig.service(100);
    let f = &rig.v3_frames()[0];
    assert_eq!(&f[1..3], &[0x1C, 10]);
    assert_eq!(&f[4..8], &[10; 4]);
    assert_eq!(&f[8..12], &[80; 4]);
}
