use serde::{Deserialize, Serialize};

use crate::{brightness::duty_for, clock::TimeCorrection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Update,
    Sunrise,
    Daytime,
    Sunset,
    Bedtime,
    NightLight,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Update => "UPDATE",
            Self::Sunrise => "SUNRISE",
            Self::Daytime => "DAYTIME",
            Self::Sunset => "SUNSET",
            Self::Bedtime => "BEDTIME",
            Self::NightLight => "NIGHT_LIGHT",
        }
    }
}

/// Perceived brightness of both channels, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Levels {
    pub warm: f32,
    pub cool: f32,
}

impl Levels {
    pub const NIGHT_LIGHT: Self = Self::new(0.25, 0.0);

    pub const fn new(warm: f32, cool: f32) -> Self {
        Self { warm, cool }
    }

    pub fn clamped(self) -> Self {
        Self {
            warm: clamp_level(self.warm),
            cool: clamp_level(self.cool),
        }
    }

    pub fn duties(self, max_duty: u32) -> (u32, u32) {
        let levels = self.clamped();
        (duty_for(levels.warm, max_duty), duty_for(levels.cool, max_duty))
    }
}

fn clamp_level(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshOutcome {
    Pending,
    Ok,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LampStatus {
    pub phase: Option<Phase>,
    #[serde(rename = "warmLevel")]
    pub warm_level: f32,
    #[serde(rename = "coolLevel")]
    pub cool_level: f32,
    #[serde(rename = "warmDuty")]
    pub warm_duty: u32,
    #[serde(rename = "coolDuty")]
    pub cool_duty: u32,
    #[serde(rename = "sunsetSeconds")]
    pub sunset_seconds: u32,
    #[serde(rename = "timezoneOffsetSeconds")]
    pub timezone_offset_seconds: i32,
    #[serde(rename = "dstOffsetSeconds")]
    pub dst_offset_seconds: i32,
    #[serde(rename = "overrideActive")]
    pub override_active: bool,
    #[serde(rename = "tickCount")]
    pub tick_count: u64,
    #[serde(rename = "clockRefresh")]
    pub clock_refresh: RefreshOutcome,
    #[serde(rename = "sunsetRefresh")]
    pub sunset_refresh: RefreshOutcome,
}

impl LampStatus {
    pub fn new(sunset_seconds: u32, correction: TimeCorrection) -> Self {
        Self {
            phase: None,
            warm_level: 0.0,
            cool_level: 0.0,
            warm_duty: 0,
            cool_duty: 0,
            sunset_seconds,
            timezone_offset_seconds: correction.timezone_offset_secs,
            dst_offset_seconds: correction.dst_offset_secs,
            override_active: false,
            tick_count: 0,
            clock_refresh: RefreshOutcome::Pending,
            sunset_refresh: RefreshOutcome::Pending,
        }
    }
}
