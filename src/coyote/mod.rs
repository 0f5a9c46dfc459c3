//! Protocol engines for the two Coyote revisions.
//!
//! | Variant     | Cadence                                   | Power path              |
//! |-------------|-------------------------------------------|-------------------------|
//! | `CoyoteV2`  | 50 ms sub-ticks, one segment write / 100 ms per channel | 0x1504 write every ~1 s |
//! | `CoyoteV3`  | one 20-byte B0 frame / 100 ms             | serial-tagged in B0, acked by B1 |
//!
//! Both engines keep their own deadline so frames go out on their cadence
//! however often the scheduler calls in.

pub mod v2;
pub mod v3;

use std::sync::Arc;

use crate::app::device::DeviceLink;
use crate::app::ports::{CharacteristicRef, GattClient};
use crate::error::InitError;
use crate::protocol::Uuid;

use v2::CoyoteV2;
use v3::CoyoteV3;

/// Protocol-specific half of a [`Device`](crate::app::device::Device).
pub enum Peripheral {
    CoyoteV2(CoyoteV2),
    CoyoteV3(CoyoteV3),
}

impl Peripheral {
    pub fn as_v2(&self) -> Option<&CoyoteV2> {
        match self {
            Self::CoyoteV2(p) => Some(p),
            Self::CoyoteV3(_) => None,
        }
    }

    pub fn as_v3(&self) -> Option<&CoyoteV3> {
        match self {
            Self::CoyoteV3(p) => Some(p),
            Self::CoyoteV2(_) => None,
        }
    }

    pub fn as_v2_mut(&mut self) -> Option<&mut CoyoteV2> {
        match self {
            Self::CoyoteV2(p) => Some(p),
            Self::CoyoteV3(_) => None,
        }
    }

    pub fn as_v3_mut(&mut self) -> Option<&mut CoyoteV3> {
        match self {
            Self::CoyoteV3(p) => Some(p),
            Self::CoyoteV2(_) => None,
        }
    }

    /// Discover and subscribe to everything the engine needs.
    pub(crate) fn probe(
        &mut self,
        client: &Arc<dyn GattClient>,
        link: &Arc<DeviceLink>,
    ) -> Result<(), InitError> {
        match self {
            Self::CoyoteV2(p) => p.probe(client.as_ref(), link),
            Self::CoyoteV3(p) => p.probe(client.as_ref(), link),
        }
    }

    pub(crate) fn service(&mut self, client: &dyn GattClient, now_ms: u64) {
        match self {
            Self::CoyoteV2(p) => p.service(client, now_ms),
            Self::CoyoteV3(p) => p.service(client, now_ms),
        }
    }

    /// Forget bound characteristics after link loss or a failed probe.
    pub(crate) fn unbind(&mut self) {
        match self {
            Self::CoyoteV2(p) => p.unbind(),
            Self::CoyoteV3(p) => p.unbind(),
        }
    }
}

// ── Shared helpers ────────────────────────────────────────────────

/// Next deadline after `deadline` fired at `now_ms`.  When the driver fell
/// a whole period or more behind, re-anchor on `now_ms` instead of
/// bursting to catch up.
pub(crate) fn advance_deadline(deadline: u64, now_ms: u64, period_ms: u64) -> u64 {
    let next = deadline + period_ms;
    if next <= now_ms {
        now_ms + period_ms
    } else {
        next
    }
}

pub(crate) fn require_service(client: &dyn GattClient, service: Uuid) -> Result<(), InitError> {
    if client.has_service(service) {
        Ok(())
    } else {
        Err(InitError::MissingService(service))
    }
}

pub(crate) fn require_characteristic(
    client: &dyn GattClient,
    service: Uuid,
    uuid: Uuid,
) -> Result<CharacteristicRef, InitError> {
    client
        .find_characteristic(service, uuid)
        .ok_or(InitError::MissingCharacteristic(uuid))
}

/// Subscribe to the optional battery characteristic, if present.
pub(crate) fn subscribe_battery(
    client: &dyn GattClient,
    link: &Arc<DeviceLink>,
    service: Uuid,
    uuid: Uuid,
) {
    let Some(ch) = client.find_characteristic(service, uuid) else {
        log::debug!("{}: no battery characteristic", link.name());
        return;
    };
    let sink = Arc::clone(link);
    let result = client.subscribe(
        ch,
        Box::new(move |data: &[u8]| {
            if let Some(&level) = data.first() {
                sink.report_battery(level);
            }
        }),
    );
    if let Err(e) = result {
        log::warn!("{}: battery subscribe failed: {}", link.name(), e);
    }
}
