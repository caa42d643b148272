use chrono::{DateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::{
    error::FetchError,
    hal::{TimeSync, TimeZoneSource},
    SECONDS_PER_DAY,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeCorrection {
    pub timezone_offset_secs: i32,
    pub dst_offset_secs: i32,
}

impl TimeCorrection {
    pub fn total_secs(self) -> i64 {
        i64::from(self.timezone_offset_secs) + i64::from(self.dst_offset_secs)
    }
}

/// Local wall-clock time, derived from a UTC timestamp plus the last known
/// time-zone and daylight-saving offsets.
#[derive(Debug, Clone)]
pub struct ClockService {
    zone: String,
    correction: TimeCorrection,
}

impl ClockService {
    pub fn new(zone: impl Into<String>, defaults: TimeCorrection) -> Self {
        Self {
            zone: zone.into(),
            correction: defaults,
        }
    }

    pub fn correction(&self) -> TimeCorrection {
        self.correction
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Syncs the RTC, then fetches fresh offsets. Any failure leaves the
    /// current correction untouched.
    pub fn refresh<S>(&mut self, source: &mut S) -> Result<TimeCorrection, FetchError>
    where
        S: TimeSync + TimeZoneSource + ?Sized,
    {
        source.sync_time()?;
        let offsets = source.fetch_offsets(&self.zone)?;

        self.correction = TimeCorrection {
            timezone_offset_secs: offsets.raw_offset,
            dst_offset_secs: offsets.dst_offset,
        };
        Ok(self.correction)
    }

    pub fn seconds_since_midnight(&self, utc_epoch: i64) -> u32 {
        local_seconds(utc_epoch, self.correction)
    }
}

pub fn local_seconds(utc_epoch: i64, correction: TimeCorrection) -> u32 {
    let corrected = utc_epoch.saturating_add(correction.total_secs());

    match DateTime::from_timestamp(corrected, 0) {
        Some(local) => local.hour() * 3_600 + local.minute() * 60 + local.second(),
        None => corrected.rem_euclid(i64::from(SECONDS_PER_DAY)) as u32,
    }
}

/// Seconds from `now` until `reference`, or zero once it has passed.
pub fn diff_time(reference: u32, now: u32) -> u32 {
    reference.saturating_sub(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::ZoneOffsets;

    struct FakeTime {
        sync: Result<(), FetchError>,
        offsets: Result<ZoneOffsets, FetchError>,
        requested_zone: Option<String>,
    }

    impl TimeSync for FakeTime {
        fn sync_time(&mut self) -> Result<(), FetchError> {
            self.sync.clone()
        }
    }

    impl TimeZoneSource for FakeTime {
        fn fetch_offsets(&mut self, zone: &str) -> Result<ZoneOffsets, FetchError> {
            self.requested_zone = Some(zone.to_string());
            self.offsets.clone()
        }
    }

    fn central_summer() -> ZoneOffsets {
        ZoneOffsets {
            raw_offset: -21_600,
            dst_offset: 3_600,
        }
    }

    #[test]
    fn diff_time_never_goes_negative() {
        assert_eq!(diff_time(25_200, 25_100), 100);
        assert_eq!(diff_time(25_200, 25_300), 0);
        assert_eq!(diff_time(25_200, 25_200), 0);
    }

    #[test]
    fn applies_both_offsets() {
        // 2024-06-21T12:00:00Z
        let utc = 1_718_971_200;
        let correction = TimeCorrection {
            timezone_offset_secs: -21_600,
            dst_offset_secs: 3_600,
        };

        assert_eq!(local_seconds(utc, correction), 7 * 3_600);
    }

    #[test]
    fn wraps_across_midnight() {
        // 2024-06-21T02:30:00Z is 21:30 the previous evening in Chicago.
        let utc = 1_718_937_000;
        let correction = TimeCorrection {
            timezone_offset_secs: -21_600,
            dst_offset_secs: 3_600,
        };

        assert_eq!(local_seconds(utc, correction), 21 * 3_600 + 30 * 60);
    }

    #[test]
    fn refresh_replaces_correction() {
        let mut clock = ClockService::new("America/Chicago", TimeCorrection::default());
        let mut source = FakeTime {
            sync: Ok(()),
            offsets: Ok(central_summer()),
            requested_zone: None,
        };

        let correction = clock.refresh(&mut source).unwrap();

        assert_eq!(correction.total_secs(), -18_000);
        assert_eq!(clock.correction(), correction);
        assert_eq!(source.requested_zone.as_deref(), Some(clock.zone()));
    }

    #[test]
    fn failed_sync_keeps_previous_correction() {
        let defaults = TimeCorrection {
            timezone_offset_secs: -21_600,
            dst_offset_secs: 0,
        };
        let mut clock = ClockService::new("America/Chicago", defaults);
        let mut source = FakeTime {
            sync: Err(FetchError::Http("ntp timeout".to_string())),
            offsets: Ok(central_summer()),
            requested_zone: None,
        };

        assert!(clock.refresh(&mut source).is_err());
        assert_eq!(clock.correction(), defaults);
        assert!(source.requested_zone.is_none());
    }

    #[test]
    fn failed_offsets_keep_previous_correction() {
        let mut clock = ClockService::new("America/Chicago", TimeCorrection::default());
        let mut source = FakeTime {
            sync: Ok(()),
            offsets: Err(FetchError::malformed("missing raw_offset")),
            requested_zone: None,
        };

        assert_eq!(
            clock.refresh(&mut source),
            Err(FetchError::malformed("missing raw_offset"))
        );
        assert_eq!(clock.correction(), TimeCorrection::default());
    }
}
