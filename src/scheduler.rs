//! Periodic service driver.
//!
//! Calls [`DeviceRegistry::service_all`] on a fixed period, either from
//! the caller's own loop ([`Scheduler::tick`]) or from a dedicated
//! background thread ([`Scheduler::spawn`]).
//!
//! ```text
//! ┌───────────────────── "coyote-svc" thread ─────────────────────┐
//! │                                                               │
//! │  loop {                                                       │
//! │      stop requested? ──yes──▶ exit                            │
//! │      lock registry ─▶ service_all(clock.now_ms()) ─▶ unlock    │
//! │      sleep(period)                                            │
//! │  }                                                            │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each engine keeps its own frame deadline, so the period only bounds
//! jitter.  It must be shorter than the fastest engine cadence.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, warn};

use crate::app::ports::TimePort;
use crate::app::registry::DeviceRegistry;
use crate::config::SystemConfig;

/// Name of the background service thread.
pub const THREAD_NAME: &str = "coyote-svc";

/// Stack for the service thread.  Engines allocate nothing per tick.
const STACK_KB: usize = 8;

pub struct Scheduler {
    period_ms: u32,
    ticks: u64,
}

impl Scheduler {
    pub fn new(config: &SystemConfig) -> Self {
        Self {
            period_ms: config.scheduler_period_ms,
            ticks: 0,
        }
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    /// Number of service passes run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// One service pass over every auto-serviced device.
    pub fn tick(&mut self, registry: &mut DeviceRegistry, now_ms: u64) {
        self.ticks += 1;
        registry.service_all(now_ms);
    }

    /// Move the driver onto its own thread.
    pub fn spawn(
        mut self,
        registry: Arc<Mutex<DeviceRegistry>>,
        clock: impl TimePort + Send + 'static,
    ) -> std::io::Result<SchedulerHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let period = Duration::from_millis(u64::from(self.period_ms));

        info!(
            "Spawning '{}' (period={}ms, stack={}KB)",
            THREAD_NAME, self.period_ms, STACK_KB
        );

        let join = thread::Builder::new()
            .name(THREAD_NAME.into())
            .stack_size(STACK_KB * 1024)
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    {
                        let mut reg = registry.lock().unwrap_or_else(PoisonError::into_inner);
                        self.tick(&mut reg, clock.now_ms());
                    }
                    thread::sleep(period);
                }
                info!("{}: stopped after {} ticks", THREAD_NAME, self.ticks);
            })?;

        Ok(SchedulerHandle {
            stop,
            join: Some(join),
        })
    }
}

/// Owner of a running service thread.  Dropping it stops the thread.
pub struct SchedulerHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Signal the thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("{}: thread panicked", THREAD_NAME);
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
