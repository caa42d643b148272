use std::{
    future::Future,
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};
use serde::Serialize;
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{debug, info, warn};

use daylight_common::{
    tick_queue, EventLog, FetchError, HardwareError, LampConfig, LampController, LampError,
    LampStatus, OverrideSource, PwmChannel, SunsetQuery, SunsetResponse, SunsetSource,
    TickTrigger, TimeSync, TimeZoneSource, Timebase, TriggerOutcome, ZoneOffsets,
};

const TICK_PERIOD: Duration = Duration::from_secs(60);

type StatusHandle = Arc<Mutex<LampStatus>>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Stand-in for an LEDC channel; duty changes only show up in the log.
struct SimulatedPwm {
    channel: &'static str,
    duty: Option<u32>,
}

impl SimulatedPwm {
    fn new(channel: &'static str) -> Self {
        Self {
            channel,
            duty: None,
        }
    }
}

impl PwmChannel for SimulatedPwm {
    fn set_duty_cycle(&mut self, duty: u32) -> Result<(), HardwareError> {
        if self.duty != Some(duty) {
            debug!(channel = self.channel, duty, "pwm duty");
            self.duty = Some(duty);
        }
        Ok(())
    }
}

struct SystemTimebase;

impl Timebase for SystemTimebase {
    fn utc_now(&self) -> i64 {
        Utc::now().timestamp()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Remote collaborators for a development machine: the OS keeps the clock in
/// sync, offsets come from the tz database, sunset and override payloads are
/// read from local files.
struct HostServices {
    sunset_file: Option<PathBuf>,
    override_file: Option<PathBuf>,
}

impl HostServices {
    fn from_env() -> Self {
        Self {
            sunset_file: std::env::var_os("LAMP_SUNSET_FILE").map(PathBuf::from),
            override_file: std::env::var_os("LAMP_OVERRIDE_FILE").map(PathBuf::from),
        }
    }
}

impl TimeSync for HostServices {
    fn sync_time(&mut self) -> Result<(), FetchError> {
        Ok(())
    }
}

impl TimeZoneSource for HostServices {
    fn fetch_offsets(&mut self, zone: &str) -> Result<ZoneOffsets, FetchError> {
        let tz: Tz = zone
            .parse()
            .map_err(|err| FetchError::Unavailable(format!("unknown zone `{zone}`: {err}")))?;
        let offset = tz.offset_from_utc_datetime(&Utc::now().naive_utc());

        Ok(ZoneOffsets {
            raw_offset: offset.base_utc_offset().num_seconds() as i32,
            dst_offset: offset.dst_offset().num_seconds() as i32,
        })
    }
}

impl SunsetSource for HostServices {
    fn fetch_sunset(&mut self, query: &SunsetQuery) -> Result<SunsetResponse, FetchError> {
        let path = self
            .sunset_file
            .as_deref()
            .ok_or_else(|| FetchError::Unavailable("LAMP_SUNSET_FILE is not set".to_string()))?;
        debug!(
            latitude = query.latitude,
            longitude = query.longitude,
            "reading sunset from {}",
            path.display()
        );

        let raw = read_file(path)?;
        serde_json::from_str(&raw).map_err(|err| FetchError::malformed(err.to_string()))
    }
}

impl OverrideSource for HostServices {
    fn fetch_override(&mut self) -> Result<String, FetchError> {
        match self.override_file.as_deref() {
            Some(path) => read_file(path),
            None => Ok(String::new()),
        }
    }
}

fn read_file(path: &Path) -> Result<String, FetchError> {
    std::fs::read_to_string(path)
        .map_err(|err| FetchError::Unavailable(format!("{}: {err}", path.display())))
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::var("LAMP_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.daylight/config.json"));
    let mut config = load_config(&config_path).await.unwrap_or_else(|err| {
        warn!("failed to load lamp config from {}: {err:#}", config_path.display());
        LampConfig::default()
    });
    config.fill_from_env(|key| std::env::var(key).ok());

    let mut lamp = LampController::new(
        config,
        SimulatedPwm::new("warm"),
        SimulatedPwm::new("cool"),
        SystemTimebase,
        HostServices::from_env(),
        EventLog::local(),
    )
    .context("invalid lamp configuration")?;
    let status = lamp.status_handle();

    let (trigger, ticks) = tick_queue();
    trigger.trigger();

    let control = tokio::task::spawn_blocking(move || lamp.run(ticks));
    spawn_tick_timer(trigger);

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .with_state(status);

    let port = std::env::var("LAMP_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status server at {addr}"))?;
    info!("lamp status on http://{addr}/api/status");

    let server = async move { axum::serve(listener, app).await };
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    match wait_for_shutdown(control, server, interrupt).await? {
        Shutdown::Interrupted => {
            info!("interrupted; shutting down");
            // Dropping the runtime would block on the sleeping control thread.
            std::process::exit(0);
        }
        Shutdown::Finished => Ok(()),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Shutdown {
    Interrupted,
    Finished,
}

/// Resolves as soon as the control loop or the server stops, or the
/// interrupt fires. Never waits for a blocked control loop to return.
async fn wait_for_shutdown<S, I>(
    control: JoinHandle<Result<(), LampError>>,
    server: S,
    interrupt: I,
) -> anyhow::Result<Shutdown>
where
    S: Future<Output = std::io::Result<()>>,
    I: Future<Output = ()>,
{
    tokio::select! {
        result = control => {
            result.context("control loop panicked")?.context("lamp control loop failed")?;
            Ok(Shutdown::Finished)
        }
        result = server => {
            result.context("status server stopped")?;
            Ok(Shutdown::Finished)
        }
        () = interrupt => Ok(Shutdown::Interrupted),
    }
}

fn spawn_tick_timer(trigger: TickTrigger) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_PERIOD);
        // The first tick is already queued.
        interval.tick().await;

        loop {
            interval.tick().await;
            match trigger.trigger() {
                TriggerOutcome::Queued => {}
                TriggerOutcome::Coalesced => debug!("tick still pending; coalesced"),
                TriggerOutcome::Closed => break,
            }
        }
    });
}

async fn load_config(path: &Path) -> anyhow::Result<LampConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(serde_json::from_slice::<LampConfig>(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(LampConfig::default()),
        Err(err) => Err(err.into()),
    }
}

async fn handle_get_status(State(status): State<StatusHandle>) -> impl IntoResponse {
    let snapshot = status.lock().map(|status| status.clone());
    match snapshot {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "status unavailable"),
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
