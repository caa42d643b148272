pub mod brightness;
pub mod clock;
pub mod config;
pub mod error;
pub mod event_log;
pub mod hal;
pub mod lamp;
pub mod override_gate;
pub mod ramp;
pub mod scheduler;
pub mod sunset;
pub mod tick;
pub mod types;

pub use brightness::duty_for;
pub use clock::{diff_time, ClockService, TimeCorrection};
pub use config::{LampConfig, PhaseBoundaries, PwmConfig};
pub use error::{ConfigError, FetchError, HardwareError, LampError};
pub use event_log::{EventLog, LogLevel, LogRecord};
pub use hal::{
    LogSink, OverrideSource, PwmChannel, RemoteServices, SunsetSource, TimeSync, TimeZoneSource,
    Timebase, ZoneOffsets,
};
pub use lamp::{LampController, NIGHT_LIGHT_IDLE};
pub use override_gate::{parse_override, OverrideSetting, OVERRIDE_HOLD};
pub use ramp::RampPlan;
pub use scheduler::select_phase;
pub use sunset::{SunsetEstimator, SunsetQuery, SunsetResponse};
pub use tick::{tick_queue, TickReceiver, TickTrigger, TriggerOutcome};
pub use types::{LampStatus, Levels, Phase, RefreshOutcome};

pub const SECONDS_PER_DAY: u32 = 86_400;
