use serde::{Deserialize, Serialize};

use crate::{error::FetchError, hal::SunsetSource};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SunsetQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub zone: String,
}

/// Payload of the sunrise-sunset API with `formatted=0`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SunsetResponse {
    pub status: String,
    #[serde(default)]
    pub results: Option<SunsetResults>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SunsetResults {
    pub sunset: String,
}

/// Today's effective sunset, never earlier than the configured floor.
#[derive(Debug, Clone)]
pub struct SunsetEstimator {
    floor: u32,
    current: u32,
    query: SunsetQuery,
}

impl SunsetEstimator {
    pub fn new(floor: u32, query: SunsetQuery) -> Self {
        Self {
            floor,
            current: floor,
            query,
        }
    }

    pub fn floor(&self) -> u32 {
        self.floor
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn refresh<S>(&mut self, source: &mut S) -> Result<u32, FetchError>
    where
        S: SunsetSource + ?Sized,
    {
        let response = source.fetch_sunset(&self.query)?;
        if response.status != "OK" {
            return Err(FetchError::Status(response.status));
        }

        let results = response
            .results
            .ok_or_else(|| FetchError::malformed("response has no results"))?;
        let parsed = parse_sunset_seconds(&results.sunset)?;

        self.current = clamp_sunset(self.floor, parsed);
        Ok(self.current)
    }
}

pub fn clamp_sunset(floor: u32, parsed: u32) -> u32 {
    floor.max(parsed)
}

/// Seconds since midnight of an ISO-8601-like timestamp such as
/// `2024-06-21T20:31:05-05:00`. The date and the UTC offset are ignored.
pub fn parse_sunset_seconds(timestamp: &str) -> Result<u32, FetchError> {
    let time_part = timestamp
        .split_once('T')
        .map(|(_, time)| time)
        .ok_or_else(|| FetchError::malformed(format!("no time component in `{timestamp}`")))?;

    let time = time_part
        .split(['-', '+'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('Z');

    let mut fields = time.split(':');
    let (Some(hours), Some(minutes), Some(seconds), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(FetchError::malformed(format!("expected HH:MM:SS, got `{time}`")));
    };

    let hours = parse_field(hours, 24, time)?;
    let minutes = parse_field(minutes, 60, time)?;
    let seconds = parse_field(seconds, 60, time)?;

    Ok(hours * 3_600 + minutes * 60 + seconds)
}

fn parse_field(field: &str, limit: u32, time: &str) -> Result<u32, FetchError> {
    match field.parse::<u32>() {
        Ok(value) if value < limit => Ok(value),
        _ => Err(FetchError::malformed(format!("bad field `{field}` in `{time}`"))),
    }
}
