use std::time::Duration;

use serde::Serialize;

use crate::{error::FetchError, types::Levels};

/// How long a manual setting holds the lamp before the schedule resumes.
pub const OVERRIDE_HOLD: Duration = Duration::from_secs(12 * 60 * 60);

pub const OVERRIDE_SENTINEL: &str = "-1,-1";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverrideSetting {
    pub cool: f32,
    pub warm: f32,
}

impl OverrideSetting {
    pub fn levels(self) -> Levels {
        Levels::new(self.warm, self.cool).clamped()
    }
}

/// Reads the override file body: `cool,warm`. An empty body or the
/// sentinel means the schedule runs.
pub fn parse_override(text: &str) -> Result<Option<OverrideSetting>, FetchError> {
    let text = text.trim();
    if text.is_empty() || text.contains(OVERRIDE_SENTINEL) {
        return Ok(None);
    }

    let mut fields = text.split(',').map(str::trim);
    let (Some(cool), Some(warm)) = (fields.next(), fields.next()) else {
        return Err(FetchError::malformed(format!("expected `cool,warm`, got `{text}`")));
    };

    let cool = parse_level(cool)?;
    let warm = parse_level(warm)?;

    Ok(Some(OverrideSetting { cool, warm }))
}

fn parse_level(field: &str) -> Result<f32, FetchError> {
    match field.parse::<f32>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(FetchError::malformed(format!("`{field}` is not a brightness"))),
    }
}
