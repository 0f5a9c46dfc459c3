//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing every lifecycle event to the `log`
//! facade.  A UI or telemetry adapter would implement the same trait.

use log::{Level, log};

use crate::app::events::{DeviceEvent, LifecycleEvent};
use crate::app::ports::EventSink;

/// Adapter that logs every [`DeviceEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

/// Log level an event is reported at.
pub(crate) fn level_for(event: LifecycleEvent) -> Level {
    match event {
        LifecycleEvent::Error => Level::Error,
        LifecycleEvent::Disconnected => Level::Warn,
        _ => Level::Info,
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &DeviceEvent) {
        log!(
            level_for(event.event),
            "EVENT | {} | {}",
            event.device,
            event.event
        );
    }
}
