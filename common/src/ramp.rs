use std::time::Duration;

use crate::types::{Levels, Phase};

/// Brightness resolution of every ramp: levels advance by 1/1000 per step.
pub const RAMP_RESOLUTION: u32 = 1000;

/// Lowest warm level while the cool channel crosses over, so the lamp never
/// looks fully cold.
pub const WARM_FLOOR: f32 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Curve {
    WarmRise,
    CoolIn,
    CoolOut,
    WarmFall,
}

impl Curve {
    fn levels_at(self, index: u32) -> Levels {
        let up = index as f32 / RAMP_RESOLUTION as f32;
        let down = (RAMP_RESOLUTION - index) as f32 / RAMP_RESOLUTION as f32;

        match self {
            Self::WarmRise | Self::WarmFall => Levels::new(up, 0.0),
            Self::CoolIn => Levels::new(WARM_FLOOR.max(down), up),
            Self::CoolOut => Levels::new(WARM_FLOOR.max(up), down),
        }
    }
}

/// The shape of one phase routine: the baseline set before waiting for the
/// phase boundary, then a fixed number of 1/1000 steps with a fixed delay.
///
/// Every ramp lasts 30 minutes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampPlan {
    pub baseline: Levels,
    pub step_delay: Duration,
    curve: Curve,
    start: u32,
    steps: u32,
    descending: bool,
}

impl RampPlan {
    /// `None` for phases that only hold a level.
    pub fn for_phase(phase: Phase) -> Option<Self> {
        let plan = match phase {
            Phase::Sunrise => Self {
                baseline: Levels::NIGHT_LIGHT,
                step_delay: Duration::from_millis(2_400),
                curve: Curve::WarmRise,
                start: 250,
                steps: 750,
                descending: false,
            },
            Phase::Daytime => Self {
                baseline: Levels::new(1.0, 0.0),
                step_delay: Duration::from_millis(1_800),
                curve: Curve::CoolIn,
                start: 0,
                steps: 1_000,
                descending: false,
            },
            Phase::Sunset => Self {
                baseline: Levels::new(WARM_FLOOR, 1.0),
                step_delay: Duration::from_millis(1_800),
                curve: Curve::CoolOut,
                start: 0,
                steps: 1_000,
                descending: false,
            },
            Phase::Bedtime => Self {
                baseline: Levels::new(1.0, 0.0),
                step_delay: Duration::from_millis(2_400),
                curve: Curve::WarmFall,
                start: RAMP_RESOLUTION,
                steps: 750,
                descending: true,
            },
            Phase::Update | Phase::NightLight => return None,
        };

        Some(plan)
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn total_duration(&self) -> Duration {
        self.step_delay * self.steps
    }

    /// Levels applied at each step, in order.
    pub fn levels(&self) -> impl Iterator<Item = Levels> {
        let plan = *self;
        (0..plan.steps).map(move |offset| {
            let index = if plan.descending {
                plan.start - offset
            } else {
                plan.start + offset
            };
            plan.curve.levels_at(index)
        })
    }
}
