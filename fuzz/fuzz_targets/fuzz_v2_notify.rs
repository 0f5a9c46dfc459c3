//! Fuzz target: V2 segment and power unpacking
//!
//! Arbitrary bytes go through the snooped-segment and 0x1504 power
//! decoders; every decoded value must re-encode inside its wire width.
//!
//! cargo fuzz run fuzz_v2_notify

#![no_main]

use coyote_link::protocol::v2::{PowerConfig, V2Segment, decode_power, encode_power};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some((a, b)) = decode_power(data) {
        assert!(a < 2048 && b < 2048, "power exceeds 11 bits");
        assert_eq!(decode_power(&encode_power(a, b)), Some((a, b)));
    }

    if let Some(cfg) = PowerConfig::decode(data) {
        assert!(cfg.step <= 0xFF);
        if let Some(max) = cfg.max_level() {
            assert!(cfg.step > 0);
            assert!(u16::from(max) <= cfg.max_raw / cfg.step);
        }
    }

    if let [b0, b1, b2, ..] = *data {
        let seg = V2Segment::from_bytes([b0, b1, b2], 1);
        assert_eq!(V2Segment::from_bytes(seg.encode(), 1), seg);
    }
});
