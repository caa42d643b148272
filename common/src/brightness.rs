pub const GAMMA: f64 = 2.2;

/// Duty cycle that makes an LED channel look `brightness` bright.
///
/// LED output is linear in duty but perceived brightness is not, so the ratio
/// is raised to [`GAMMA`] before scaling. Callers clamp `brightness` into
/// `0.0..=1.0`; see [`crate::Levels::clamped`].
pub fn duty_for(brightness: f32, max_duty: u32) -> u32 {
    let linear = f64::from(brightness).powf(GAMMA);
    let duty = (f64::from(max_duty) * linear).round() as u32;
    duty.min(max_duty)
}
