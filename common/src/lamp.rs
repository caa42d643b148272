use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    clock::{diff_time, ClockService},
    config::LampConfig,
    error::{ConfigError, HardwareError, LampError},
    event_log::EventLog,
    hal::{PwmChannel, RemoteServices, Timebase},
    override_gate::{parse_override, OverrideSetting, OVERRIDE_HOLD},
    ramp::RampPlan,
    scheduler::{phase_boundary, select_phase},
    sunset::{SunsetEstimator, SunsetQuery},
    tick::TickReceiver,
    types::{LampStatus, Levels, Phase, RefreshOutcome},
};

/// Sleep after parking the lamp on the night light past bedtime.
pub const NIGHT_LIGHT_IDLE: Duration = Duration::from_secs(720);

/// Owns everything the lamp's control loop mutates: both PWM outputs, the
/// clock correction, today's sunset and the published status.
///
/// Ticks block for the whole phase routine (waits and ramps included) and
/// must not overlap; see [`crate::tick_queue`].
pub struct LampController<P, T, R> {
    config: LampConfig,
    warm: P,
    cool: P,
    timebase: T,
    remote: R,
    clock: ClockService,
    sunset: SunsetEstimator,
    log: EventLog,
    status: Arc<Mutex<LampStatus>>,
}

impl<P, T, R> LampController<P, T, R>
where
    P: PwmChannel,
    T: Timebase,
    R: RemoteServices,
{
    pub fn new(
        mut config: LampConfig,
        warm: P,
        cool: P,
        timebase: T,
        remote: R,
        log: EventLog,
    ) -> Result<Self, ConfigError> {
        config.sanitize();
        config.validate()?;

        let clock = ClockService::new(config.location.timezone.clone(), config.correction);
        let sunset = SunsetEstimator::new(
            config.boundaries.sunset_floor,
            SunsetQuery {
                latitude: config.location.latitude,
                longitude: config.location.longitude,
                zone: config.location.timezone.clone(),
            },
        );
        let status = LampStatus::new(sunset.current(), clock.correction());

        Ok(Self {
            config,
            warm,
            cool,
            timebase,
            remote,
            clock,
            sunset,
            log,
            status: Arc::new(Mutex::new(status)),
        })
    }

    pub fn config(&self) -> &LampConfig {
        &self.config
    }

    pub fn status_handle(&self) -> Arc<Mutex<LampStatus>> {
        Arc::clone(&self.status)
    }

    pub fn effective_sunset(&self) -> u32 {
        self.sunset.current()
    }

    pub fn now_seconds(&self) -> u32 {
        self.clock.seconds_since_midnight(self.timebase.utc_now())
    }

    /// Boot sequence: dim night light, honour a manual override, then fetch
    /// the local time and today's sunset.
    pub fn start(&mut self) -> Result<(), LampError> {
        self.night_light()?;
        self.check_override()?;
        self.refresh_clock();
        self.refresh_sunset();
        Ok(())
    }

    /// Boots the lamp, then runs one tick per queued trigger until the queue
    /// closes. Any hardware error ends the loop.
    pub fn run(&mut self, ticks: TickReceiver) -> Result<(), LampError> {
        self.start()?;

        while ticks.wait() {
            let phase = self.tick()?;
            self.log.debug(format!("tick finished in {}", phase.as_str()));
        }

        self.log.info("tick queue closed");
        Ok(())
    }

    /// Runs one scheduler tick to completion and returns the phase it ran.
    pub fn tick(&mut self) -> Result<Phase, LampError> {
        let now = self.now_seconds();
        let sunset = self.sunset.current();

        if sunset < self.config.boundaries.daytime {
            self.log.error(format!(
                "sunset {sunset}s precedes daytime {}s; skipping sunset window",
                self.config.boundaries.daytime
            ));
        }

        let phase = select_phase(now, &self.config.boundaries, sunset);
        self.update_status(|status| {
            status.tick_count = status.tick_count.saturating_add(1);
            status.phase = Some(phase);
        });
        self.log.debug(format!("tick at {now}s selected {}", phase.as_str()));

        self.run_phase(phase)?;
        Ok(phase)
    }

    /// Runs a single phase routine. Every routine sets a known baseline
    /// before it blocks, so re-running one mid-phase is safe.
    pub fn run_phase(&mut self, phase: Phase) -> Result<(), LampError> {
        match phase {
            Phase::Update => {
                self.night_light()?;
                self.wait_until(self.config.boundaries.update);
                self.refresh_clock();
                self.refresh_sunset();
            }
            Phase::NightLight => {
                self.night_light()?;
                self.timebase.sleep(NIGHT_LIGHT_IDLE);
            }
            Phase::Sunrise | Phase::Daytime | Phase::Sunset | Phase::Bedtime => {
                self.run_ramp(phase)?;
            }
        }
        Ok(())
    }

    /// Applies a manual setting for [`OVERRIDE_HOLD`] if one is published.
    /// Fetch or parse problems fall through to the schedule.
    pub fn check_override(&mut self) -> Result<Option<OverrideSetting>, LampError> {
        let setting = match self
            .remote
            .fetch_override()
            .and_then(|text| parse_override(&text))
        {
            Ok(Some(setting)) => setting,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.log.error(format!("override check failed: {err}"));
                return Ok(None);
            }
        };

        self.log.info(format!(
            "manual override: cool = {}, warm = {}",
            setting.cool, setting.warm
        ));
        self.apply(setting.levels())?;
        self.update_status(|status| status.override_active = true);

        self.timebase.sleep(OVERRIDE_HOLD);

        self.update_status(|status| status.override_active = false);
        Ok(Some(setting))
    }

    pub fn refresh_clock(&mut self) {
        let outcome = match self.clock.refresh(&mut self.remote) {
            Ok(correction) => {
                self.log.info(format!(
                    "time synced: tz offset {}s, dst offset {}s",
                    correction.timezone_offset_secs, correction.dst_offset_secs
                ));
                RefreshOutcome::Ok
            }
            Err(err) => {
                self.log.error(format!("time refresh failed: {err}"));
                RefreshOutcome::Failed
            }
        };

        let correction = self.clock.correction();
        self.update_status(|status| {
            status.clock_refresh = outcome;
            status.timezone_offset_seconds = correction.timezone_offset_secs;
            status.dst_offset_seconds = correction.dst_offset_secs;
        });
    }

    pub fn refresh_sunset(&mut self) {
        let outcome = match self.sunset.refresh(&mut self.remote) {
            Ok(seconds) => {
                self.log.info(format!("sunset at {seconds}s"));
                RefreshOutcome::Ok
            }
            Err(err) => {
                self.log.error(format!("sunset refresh failed: {err}"));
                RefreshOutcome::Failed
            }
        };

        let sunset = self.sunset.current();
        self.update_status(|status| {
            status.sunset_refresh = outcome;
            status.sunset_seconds = sunset;
        });
    }

    pub fn night_light(&mut self) -> Result<(), HardwareError> {
        self.log.info(Phase::NightLight.as_str());
        self.apply(Levels::NIGHT_LIGHT)
    }

    fn run_ramp(&mut self, phase: Phase) -> Result<(), LampError> {
        let Some(plan) = RampPlan::for_phase(phase) else {
            return Ok(());
        };
        let sunset = self.sunset.current();
        let Some(boundary) = phase_boundary(phase, &self.config.boundaries, sunset) else {
            return Ok(());
        };

        self.log.info(phase.as_str());
        self.apply(plan.baseline)?;
        self.wait_until(boundary);

        for levels in plan.levels() {
            self.apply(levels)?;
            self.timebase.sleep(plan.step_delay);
        }
        Ok(())
    }

    fn wait_until(&mut self, boundary: u32) {
        let wait = diff_time(boundary, self.now_seconds());
        if wait > 0 {
            self.timebase.sleep(Duration::from_secs(u64::from(wait)));
        }
    }

    fn apply(&mut self, levels: Levels) -> Result<(), HardwareError> {
        let levels = levels.clamped();
        let (warm_duty, cool_duty) = levels.duties(self.config.pwm.max_duty);

        self.warm.set_duty_cycle(warm_duty)?;
        self.cool.set_duty_cycle(cool_duty)?;

        self.update_status(|status| {
            status.warm_level = levels.warm;
            status.cool_level = levels.cool;
            status.warm_duty = warm_duty;
            status.cool_duty = cool_duty;
        });
        Ok(())
    }

    fn update_status(&self, update: impl FnOnce(&mut LampStatus)) {
        if let Ok(mut status) = self.status.lock() {
            update(&mut status);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        brightness::duty_for,
        clock::TimeCorrection,
        error::FetchError,
        hal::{OverrideSource, SunsetSource, TimeSync, TimeZoneSource, ZoneOffsets},
        sunset::{SunsetResponse, SunsetResults},
    };

    // 2024-06-21T00:00:00Z
    const MIDNIGHT_UTC: i64 = 1_718_928_000;
    const MAX_DUTY: u32 = 65_535;

    #[derive(Clone, Default)]
    struct RecordingPwm {
        duties: Arc<Mutex<Vec<u32>>>,
        fail: bool,
    }

    impl RecordingPwm {
        fn history(&self) -> Vec<u32> {
            self.duties.lock().unwrap().clone()
        }
    }

    impl PwmChannel for RecordingPwm {
        fn set_duty_cycle(&mut self, duty: u32) -> Result<(), HardwareError> {
            if self.fail {
                return Err(HardwareError {
                    channel: "test",
                    duty,
                    detail: "ledc timeout".to_string(),
                });
            }
            self.duties.lock().unwrap().push(duty);
            Ok(())
        }
    }

    #[derive(Clone)]
    struct FakeTimebase {
        now_ms: Arc<Mutex<i64>>,
        sleeps: Arc<Mutex<Vec<Duration>>>,
    }

    impl FakeTimebase {
        fn at_local(seconds: i64) -> Self {
            Self {
                now_ms: Arc::new(Mutex::new((MIDNIGHT_UTC + seconds) * 1_000)),
                sleeps: Arc::default(),
            }
        }

        fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    impl Timebase for FakeTimebase {
        fn utc_now(&self) -> i64 {
            *self.now_ms.lock().unwrap() / 1_000
        }

        fn sleep(&mut self, duration: Duration) {
            *self.now_ms.lock().unwrap() += duration.as_millis() as i64;
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    struct FakeRemote {
        offsets: Result<ZoneOffsets, FetchError>,
        sunset: Result<SunsetResponse, FetchError>,
        override_text: Result<String, FetchError>,
        syncs: usize,
    }

    impl Default for FakeRemote {
        fn default() -> Self {
            Self {
                offsets: Ok(ZoneOffsets {
                    raw_offset: 0,
                    dst_offset: 0,
                }),
                sunset: Ok(SunsetResponse {
                    status: "OK".to_string(),
                    results: Some(SunsetResults {
                        sunset: "2024-06-21T20:00:00+00:00".to_string(),
                    }),
                }),
                override_text: Ok("-1,-1".to_string()),
                syncs: 0,
            }
        }
    }

    impl TimeSync for FakeRemote {
        fn sync_time(&mut self) -> Result<(), FetchError> {
            self.syncs += 1;
            Ok(())
        }
    }

    impl TimeZoneSource for FakeRemote {
        fn fetch_offsets(&mut self, _zone: &str) -> Result<ZoneOffsets, FetchError> {
            self.offsets.clone()
        }
    }

    impl SunsetSource for FakeRemote {
        fn fetch_sunset(&mut self, _query: &SunsetQuery) -> Result<SunsetResponse, FetchError> {
            self.sunset.clone()
        }
    }

    impl OverrideSource for FakeRemote {
        fn fetch_override(&mut self) -> Result<String, FetchError> {
            self.override_text.clone()
        }
    }

    struct Rig {
        warm: RecordingPwm,
        cool: RecordingPwm,
        time: FakeTimebase,
        lamp: LampController<RecordingPwm, FakeTimebase, FakeRemote>,
    }

    fn rig(local_seconds: i64, remote: FakeRemote) -> Rig {
        let warm = RecordingPwm::default();
        let cool = RecordingPwm::default();
        let time = FakeTimebase::at_local(local_seconds);
        let config = LampConfig {
            correction: TimeCorrection::default(),
            ..LampConfig::default()
        };
        let lamp = LampController::new(
            config,
            warm.clone(),
            cool.clone(),
            time.clone(),
            remote,
            EventLog::local(),
        )
        .unwrap();

        Rig {
            warm,
            cool,
            time,
            lamp,
        }
    }

    #[test]
    fn daytime_waits_for_boundary_then_ramps() {
        let mut rig = rig(26_000, FakeRemote::default());

        assert_eq!(rig.lamp.tick().unwrap(), Phase::Daytime);

        let sleeps = rig.time.sleeps();
        assert_eq!(sleeps.len(), 1_001);
        assert_eq!(sleeps[0], Duration::from_secs(1_000));
        assert!(sleeps[1..].iter().all(|d| *d == Duration::from_millis(1_800)));

        let warm = rig.warm.history();
        let cool = rig.cool.history();
        assert_eq!((warm[0], cool[0]), (MAX_DUTY, 0));
        assert_eq!(warm.len(), 1_001);
        assert_eq!(*warm.last().unwrap(), duty_for(0.75, MAX_DUTY));
        assert_eq!(*cool.last().unwrap(), duty_for(0.999, MAX_DUTY));
    }

    #[test]
    fn past_bedtime_idles_on_night_light() {
        let mut rig = rig(84_000, FakeRemote::default());

        assert_eq!(rig.lamp.tick().unwrap(), Phase::NightLight);
        assert_eq!(rig.time.sleeps(), vec![NIGHT_LIGHT_IDLE]);
        assert_eq!(rig.warm.history(), vec![duty_for(0.25, MAX_DUTY)]);
        assert_eq!(rig.cool.history(), vec![0]);
    }

    #[test]
    fn after_midnight_wraps_into_update() {
        let mut rig = rig(90_000, FakeRemote::default());

        assert_eq!(rig.lamp.now_seconds(), 3_600);
        assert_eq!(rig.lamp.tick().unwrap(), Phase::Update);
        assert_eq!(rig.time.sleeps(), vec![Duration::from_secs(10_800)]);
    }

    #[test]
    fn update_phase_waits_then_refreshes() {
        let remote = FakeRemote {
            offsets: Ok(ZoneOffsets {
                raw_offset: -21_600,
                dst_offset: 3_600,
            }),
            ..FakeRemote::default()
        };
        let mut rig = rig(3_600, remote);

        assert_eq!(rig.lamp.tick().unwrap(), Phase::Update);
        assert_eq!(rig.time.sleeps(), vec![Duration::from_secs(10_800)]);
        assert_eq!(rig.lamp.effective_sunset(), 72_000);

        let status = rig.lamp.status_handle().lock().unwrap().clone();
        assert_eq!(status.clock_refresh, RefreshOutcome::Ok);
        assert_eq!(status.sunset_refresh, RefreshOutcome::Ok);
        assert_eq!(status.timezone_offset_seconds, -21_600);
        assert_eq!(status.dst_offset_seconds, 3_600);
        assert_eq!(status.sunset_seconds, 72_000);

        // 04:00 UTC corrected by -5h is 23:00 local the previous day.
        assert_eq!(rig.lamp.now_seconds(), 82_800);
    }

    #[test]
    fn failed_refreshes_keep_previous_values() {
        let remote = FakeRemote {
            offsets: Err(FetchError::Http("dns".to_string())),
            sunset: Err(FetchError::Http("dns".to_string())),
            ..FakeRemote::default()
        };
        let mut rig = rig(3_600, remote);

        assert_eq!(rig.lamp.tick().unwrap(), Phase::Update);

        let status = rig.lamp.status_handle().lock().unwrap().clone();
        assert_eq!(status.clock_refresh, RefreshOutcome::Failed);
        assert_eq!(status.sunset_refresh, RefreshOutcome::Failed);
        assert_eq!(status.timezone_offset_seconds, 0);
        assert_eq!(rig.lamp.effective_sunset(), 70_200);
    }

    #[test]
    fn later_sunset_is_used_for_selection() {
        let mut rig = rig(71_000, FakeRemote::default());
        rig.lamp.refresh_sunset();

        let sleeps_before = rig.time.sleeps().len();
        assert_eq!(rig.lamp.tick().unwrap(), Phase::Sunset);

        let sleeps = rig.time.sleeps();
        assert_eq!(sleeps[sleeps_before], Duration::from_secs(1_000));
        assert_eq!(sleeps.len() - sleeps_before, 1_001);
    }

    #[test]
    fn rerunning_a_routine_restores_the_same_baseline() {
        let mut rig = rig(70_300, FakeRemote::default());

        rig.lamp.run_phase(Phase::Sunset).unwrap();
        let first_len = rig.warm.history().len();
        rig.lamp.run_phase(Phase::Sunset).unwrap();

        let warm = rig.warm.history();
        let cool = rig.cool.history();
        let baseline = (duty_for(0.75, MAX_DUTY), MAX_DUTY);

        assert_eq!((warm[0], cool[0]), baseline);
        assert_eq!((warm[first_len], cool[first_len]), baseline);
        assert!(warm.iter().chain(cool.iter()).all(|duty| *duty <= MAX_DUTY));
    }

    #[test]
    fn override_holds_for_twelve_hours() {
        let remote = FakeRemote {
            override_text: Ok("0.5,0.3".to_string()),
            ..FakeRemote::default()
        };
        let mut rig = rig(30_000, remote);
        let status = rig.lamp.status_handle();

        let setting = rig.lamp.check_override().unwrap();

        assert_eq!(
            setting,
            Some(OverrideSetting {
                cool: 0.5,
                warm: 0.3,
            })
        );
        assert_eq!(rig.cool.history(), vec![duty_for(0.5, MAX_DUTY)]);
        assert_eq!(rig.warm.history(), vec![duty_for(0.3, MAX_DUTY)]);
        assert_eq!(rig.time.sleeps(), vec![OVERRIDE_HOLD]);
        assert!(!status.lock().unwrap().override_active);
    }

    #[test]
    fn sentinel_or_broken_override_runs_schedule() {
        for text in [Ok("-1,-1".to_string()), Ok(String::new()), Ok("x,y".to_string())] {
            let remote = FakeRemote {
                override_text: text,
                ..FakeRemote::default()
            };
            let mut rig = rig(30_000, remote);

            assert_eq!(rig.lamp.check_override().unwrap(), None);
            assert!(rig.time.sleeps().is_empty());
            assert!(rig.warm.history().is_empty());
        }

        let remote = FakeRemote {
            override_text: Err(FetchError::Status("404".to_string())),
            ..FakeRemote::default()
        };
        let mut rig = rig(30_000, remote);
        assert_eq!(rig.lamp.check_override().unwrap(), None);
    }

    #[test]
    fn start_sets_night_light_and_refreshes() {
        let mut rig = rig(30_000, FakeRemote::default());

        rig.lamp.start().unwrap();

        assert_eq!(rig.warm.history(), vec![duty_for(0.25, MAX_DUTY)]);
        assert_eq!(rig.cool.history(), vec![0]);
        assert_eq!(rig.lamp.effective_sunset(), 72_000);
        assert!(rig.time.sleeps().is_empty());
    }

    #[test]
    fn pwm_failure_aborts_the_tick() {
        let mut rig = rig(84_000, FakeRemote::default());
        rig.lamp.warm.fail = true;

        let err = rig.lamp.tick().unwrap_err();

        assert!(matches!(err, LampError::Hardware(_)));
        assert!(rig.time.sleeps().is_empty());
    }

    #[test]
    fn run_boots_then_ticks_until_queue_closes() {
        let mut rig = rig(84_000, FakeRemote::default());
        let (trigger, receiver) = crate::tick::tick_queue();
        trigger.trigger();
        drop(trigger);

        rig.lamp.run(receiver).unwrap();

        let status = rig.lamp.status_handle().lock().unwrap().clone();
        assert_eq!(status.tick_count, 1);
        assert_eq!(status.phase, Some(Phase::NightLight));
        assert_eq!(rig.time.sleeps(), vec![NIGHT_LIGHT_IDLE]);
        assert_eq!(rig.lamp.remote.syncs, 1);
    }

    #[test]
    fn new_sanitizes_pwm_settings() {
        let mut config = LampConfig::default();
        config.pwm.frequency_hz = 100_000;
        config.pwm.max_duty = 0;

        let lamp = LampController::new(
            config,
            RecordingPwm::default(),
            RecordingPwm::default(),
            FakeTimebase::at_local(0),
            FakeRemote::default(),
            EventLog::local(),
        )
        .unwrap();

        assert_eq!(lamp.config().pwm.frequency_hz, 40_000);
        assert_eq!(lamp.config().pwm.max_duty, 65_535);
    }

    #[test]
    fn rejects_invalid_boundaries() {
        let mut config = LampConfig::default();
        config.boundaries.sunrise = config.boundaries.update;

        let result = LampController::new(
            config,
            RecordingPwm::default(),
            RecordingPwm::default(),
            FakeTimebase::at_local(0),
            FakeRemote::default(),
            EventLog::local(),
        );

        assert!(result.is_err());
    }
}
