use crate::{config::PhaseBoundaries, types::Phase};

/// Picks the phase whose routine should run at `now` (seconds since local
/// midnight). Windows are checked in day order and the first boundary not yet
/// reached wins, so every second of the day maps to exactly one phase.
pub fn select_phase(now: u32, boundaries: &PhaseBoundaries, sunset: u32) -> Phase {
    if now < boundaries.update {
        Phase::Update
    } else if now < boundaries.sunrise {
        Phase::Sunrise
    } else if now < boundaries.daytime {
        Phase::Daytime
    } else if now < sunset {
        Phase::Sunset
    } else if now < boundaries.bedtime {
        Phase::Bedtime
    } else {
        Phase::NightLight
    }
}

/// Time of day at which `phase` starts its ramp.
pub fn phase_boundary(phase: Phase, boundaries: &PhaseBoundaries, sunset: u32) -> Option<u32> {
    match phase {
        Phase::Update => Some(boundaries.update),
        Phase::Sunrise => Some(boundaries.sunrise),
        Phase::Daytime => Some(boundaries.daytime),
        Phase::Sunset => Some(sunset),
        Phase::Bedtime => Some(boundaries.bedtime),
        Phase::NightLight => None,
    }
}
