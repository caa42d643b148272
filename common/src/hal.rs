//! Seams between the scheduler and everything it does not own: the two PWM
//! outputs, wall-clock time and sleeping, and the remote services.
//!
//! The firmware provides ESP-IDF backed implementations, the host build
//! provides simulated ones, and the tests provide recording fakes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    error::{FetchError, HardwareError},
    event_log::LogRecord,
    sunset::{SunsetQuery, SunsetResponse},
};

/// One dimmable LED channel. The PWM frequency is fixed when the channel is
/// built; `duty` is on the configured logical scale (`0..=max_duty`).
pub trait PwmChannel {
    fn set_duty_cycle(&mut self, duty: u32) -> Result<(), HardwareError>;
}

pub trait Timebase {
    /// Seconds since the unix epoch, UTC.
    fn utc_now(&self) -> i64;

    fn sleep(&mut self, duration: Duration);
}

/// Sets the device real-time clock to UTC.
pub trait TimeSync {
    fn sync_time(&mut self) -> Result<(), FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneOffsets {
    pub raw_offset: i32,
    pub dst_offset: i32,
}

pub trait TimeZoneSource {
    fn fetch_offsets(&mut self, zone: &str) -> Result<ZoneOffsets, FetchError>;
}

pub trait SunsetSource {
    fn fetch_sunset(&mut self, query: &SunsetQuery) -> Result<SunsetResponse, FetchError>;
}

/// Raw text of the manual override file.
pub trait OverrideSource {
    fn fetch_override(&mut self) -> Result<String, FetchError>;
}

pub trait LogSink {
    fn send(&mut self, record: &LogRecord) -> Result<(), FetchError>;
}

/// Every remote collaborator the controller talks to during a tick.
pub trait RemoteServices: TimeSync + TimeZoneSource + SunsetSource + OverrideSource {}

impl<T> RemoteServices for T where T: TimeSync + TimeZoneSource + SunsetSource + OverrideSource {}
