use core::convert::TryInto;
use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use chrono::Utc;
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver, Resolution};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{gpio::AnyOutputPin, modem::Modem, prelude::*},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    sntp::{EspSntp, SyncStatus},
    wifi::{BlockingWifi, EspWifi},
};
use log::{error, info, warn};
use serde::Serialize;

use daylight_common::{
    config::{EndpointConfig, NetworkConfig},
    tick_queue, EventLog, FetchError, HardwareError, LampConfig, LampController, LampStatus,
    LogRecord, LogSink, OverrideSource, PwmChannel, SunsetQuery, SunsetResponse, SunsetSource,
    TickTrigger, TimeSync, TimeZoneSource, Timebase, TriggerOutcome, ZoneOffsets,
};

const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_HTTP_BODY: usize = 4096;
const SNTP_SYNC_TIMEOUT: Duration = Duration::from_secs(30);
const SNTP_POLL_INTERVAL: Duration = Duration::from_millis(500);
const TICK_PERIOD: Duration = Duration::from_secs(60);
const RESTART_DELAY_MS: u64 = 2_000;
const AUTH_HEADER: &str = "X-Custom-Auth";

const APB_CLOCK_HZ: u32 = 80_000_000;

/// One LEDC channel. Duties arrive on the lamp's logical scale and are
/// rescaled to whatever the timer resolution allows.
struct LedChannel<'d> {
    name: &'static str,
    driver: LedcDriver<'d>,
    logical_max: u32,
}

impl<'d> LedChannel<'d> {
    fn new(
        name: &'static str,
        mut driver: LedcDriver<'d>,
        logical_max: u32,
    ) -> anyhow::Result<Self> {
        driver
            .set_duty(0)
            .map_err(|err| anyhow!("failed to zero {name} channel: {err:?}"))?;

        Ok(Self {
            name,
            driver,
            logical_max,
        })
    }
}

impl PwmChannel for LedChannel<'_> {
    fn set_duty_cycle(&mut self, duty: u32) -> Result<(), HardwareError> {
        let hardware_max = u64::from(self.driver.get_max_duty());
        let scaled = u64::from(duty.min(self.logical_max)) * hardware_max
            / u64::from(self.logical_max.max(1));

        self.driver
            .set_duty(scaled as u32)
            .map_err(|err| HardwareError {
                channel: self.name,
                duty,
                detail: format!("{err:?}"),
            })
    }
}

struct EspTimebase;

impl Timebase for EspTimebase {
    fn utc_now(&self) -> i64 {
        Utc::now().timestamp()
    }

    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// SNTP plus the three HTTP endpoints the lamp polls.
struct EspServices {
    sntp: EspSntp<'static>,
    endpoints: EndpointConfig,
    auth_token: String,
}

impl TimeSync for EspServices {
    fn sync_time(&mut self) -> Result<(), FetchError> {
        let started = Instant::now();
        while self.sntp.get_sync_status() != SyncStatus::Completed {
            if started.elapsed() >= SNTP_SYNC_TIMEOUT {
                return Err(FetchError::Unavailable(format!(
                    "SNTP not synced after {}s",
                    SNTP_SYNC_TIMEOUT.as_secs()
                )));
            }
            thread::sleep(SNTP_POLL_INTERVAL);
        }
        Ok(())
    }
}

impl TimeZoneSource for EspServices {
    fn fetch_offsets(&mut self, zone: &str) -> Result<ZoneOffsets, FetchError> {
        let url = format!("{}/{zone}", self.endpoints.timezone_url.trim_end_matches('/'));
        let body = http_get(&url, &[])?;
        serde_json::from_str(&body).map_err(|err| FetchError::malformed(err.to_string()))
    }
}

impl SunsetSource for EspServices {
    fn fetch_sunset(&mut self, query: &SunsetQuery) -> Result<SunsetResponse, FetchError> {
        let url = format!(
            "{}?lat={}&lng={}&tzid={}&formatted=0",
            self.endpoints.sunset_url, query.latitude, query.longitude, query.zone
        );
        let body = http_get(&url, &[])?;
        serde_json::from_str(&body).map_err(|err| FetchError::malformed(err.to_string()))
    }
}

impl OverrideSource for EspServices {
    fn fetch_override(&mut self) -> Result<String, FetchError> {
        match self.endpoints.override_url.as_deref() {
            Some(url) => http_get(url, &[(AUTH_HEADER, self.auth_token.as_str())]),
            None => Ok(String::new()),
        }
    }
}

/// Mirrors lamp events to the remote log endpoint.
struct HttpLogSink {
    url: String,
    auth_token: String,
}

impl LogSink for HttpLogSink {
    fn send(&mut self, record: &LogRecord) -> Result<(), FetchError> {
        let body =
            serde_json::to_vec(record).map_err(|err| FetchError::malformed(err.to_string()))?;
        let content_length = body.len().to_string();
        let headers = [
            ("Content-Type", "application/json"),
            ("Content-Length", content_length.as_str()),
            (AUTH_HEADER, self.auth_token.as_str()),
        ];

        let mut client = http_client()?;
        let mut request = client
            .request(Method::Post, &self.url, &headers)
            .map_err(|err| FetchError::Http(format!("{err:?}")))?;
        request
            .write_all(&body)
            .map_err(|err| FetchError::Http(format!("{err:?}")))?;
        request
            .flush()
            .map_err(|err| FetchError::Http(format!("{err:?}")))?;

        let response = request
            .submit()
            .map_err(|err| FetchError::Http(format!("{err:?}")))?;
        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(FetchError::Status(format!("HTTP {status}")));
        }
        Ok(())
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    if let Err(err) = run_lamp() {
        error!("lamp stopped: {err:#}");
        thread::sleep(Duration::from_millis(RESTART_DELAY_MS));
        unsafe { esp_idf_svc::sys::esp_restart() };
    }
    Ok(())
}

fn run_lamp() -> anyhow::Result<()> {
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut config = LampConfig::default();
    config.sanitize();
    config.fill_from_env(build_env);

    info!(
        "lamp config: ssid=`{}`, zone=`{}`, override={}, pwm {} Hz on GPIO{}/GPIO{}",
        config.network.wifi_ssid,
        config.location.timezone,
        config.endpoints.override_url.as_deref().unwrap_or("none"),
        config.pwm.frequency_hz,
        config.pwm.warm_pin,
        config.pwm.cool_pin,
    );

    let peripherals = Peripherals::take()?;
    let timer = LedcTimerDriver::new(
        peripherals.ledc.timer0,
        &TimerConfig::default()
            .frequency(config.pwm.frequency_hz.Hz().into())
            .resolution(ledc_resolution(config.pwm.frequency_hz)),
    )
    .context("failed to configure LEDC timer")?;

    let warm_driver = LedcDriver::new(peripherals.ledc.channel0, &timer, unsafe {
        AnyOutputPin::new(config.pwm.warm_pin)
    })
    .context("failed to attach warm LED channel")?;
    let cool_driver = LedcDriver::new(peripherals.ledc.channel1, &timer, unsafe {
        AnyOutputPin::new(config.pwm.cool_pin)
    })
    .context("failed to attach cool LED channel")?;
    let warm = LedChannel::new("warm", warm_driver, config.pwm.max_duty)?;
    let cool = LedChannel::new("cool", cool_driver, config.pwm.max_duty)?;

    let wifi = connect_wifi(peripherals.modem, sys_loop, nvs_partition, &config.network)
        .context("wifi startup failed")?;

    let sntp = EspSntp::new_default().context("failed to start SNTP")?;
    info!("SNTP initialized");

    let log = match config.endpoints.log_url.clone() {
        Some(url) => {
            info!("forwarding lamp events to {url}");
            EventLog::with_sink(Box::new(HttpLogSink {
                url,
                auth_token: config.network.auth_token.clone(),
            }))
        }
        None => EventLog::local(),
    };
    let services = EspServices {
        sntp,
        endpoints: config.endpoints.clone(),
        auth_token: config.network.auth_token.clone(),
    };

    let mut lamp = LampController::new(config, warm, cool, EspTimebase, services, log)
        .context("invalid lamp configuration")?;

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = create_http_server(lamp.status_handle())?;

    let (trigger, ticks) = tick_queue();
    trigger.trigger();
    spawn_tick_timer(trigger)?;

    lamp.run(ticks).context("lamp control loop failed")?;
    Err(anyhow!("tick timer stopped"))
}

/// Finest duty resolution the APB clock can drive at `frequency_hz`, capped
/// at 13 bits. 8 kHz gets 13 bits, 40 kHz gets 10.
fn ledc_resolution(frequency_hz: u32) -> Resolution {
    match APB_CLOCK_HZ / frequency_hz.max(1) {
        divider if divider >= 1 << 13 => Resolution::Bits13,
        divider if divider >= 1 << 12 => Resolution::Bits12,
        divider if divider >= 1 << 11 => Resolution::Bits11,
        _ => Resolution::Bits10,
    }
}

/// Settings baked in at build time. Only fills what the config leaves blank.
fn build_env(key: &str) -> Option<String> {
    let value = match key {
        "WIFI_SSID" => option_env!("WIFI_SSID"),
        "WIFI_PASS" => option_env!("WIFI_PASS"),
        "LAMP_AUTH_TOKEN" => option_env!("LAMP_AUTH_TOKEN"),
        "LAMP_OVERRIDE_URL" => option_env!("LAMP_OVERRIDE_URL"),
        "LAMP_LOG_URL" => option_env!("LAMP_LOG_URL"),
        _ => None,
    };
    value.map(str::to_string)
}

fn spawn_tick_timer(trigger: TickTrigger) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("tick-timer".into())
        .stack_size(4 * 1024)
        .spawn(move || loop {
            thread::sleep(TICK_PERIOD);
            match trigger.trigger() {
                TriggerOutcome::Queued => {}
                TriggerOutcome::Coalesced => log::debug!("tick still pending; coalesced"),
                TriggerOutcome::Closed => break,
            }
        })
        .context("failed to spawn tick timer")?;
    Ok(())
}

fn create_http_server(status: Arc<Mutex<LampStatus>>) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 8 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/api/status", Method::Get, move |req| {
        let snapshot = status.lock().map(|status| status.clone());
        match snapshot {
            Ok(snapshot) => write_json(req, &snapshot),
            Err(_) => write_error(req, 500, "status unavailable"),
        }
    })?;

    Ok(server)
}

fn write_json<T: Serialize>(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn http_client() -> Result<HttpClient<EspHttpConnection>, FetchError> {
    let conf = HttpClientConfiguration {
        timeout: Some(HTTP_TIMEOUT),
        crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
        ..Default::default()
    };
    let connection =
        EspHttpConnection::new(&conf).map_err(|err| FetchError::Http(format!("{err:?}")))?;
    Ok(HttpClient::wrap(connection))
}

fn http_get(url: &str, headers: &[(&str, &str)]) -> Result<String, FetchError> {
    let mut client = http_client()?;
    let request = client
        .request(Method::Get, url, headers)
        .map_err(|err| FetchError::Http(format!("{err:?}")))?;
    let mut response = request
        .submit()
        .map_err(|err| FetchError::Http(format!("{err:?}")))?;

    let status = response.status();
    if !(200..300).contains(&status) {
        return Err(FetchError::Status(format!("HTTP {status} from {url}")));
    }

    let mut body = Vec::new();
    let mut chunk = [0_u8; 512];
    loop {
        let read = response
            .read(&mut chunk)
            .map_err(|err| FetchError::Http(format!("{err:?}")))?;
        if read == 0 {
            break;
        }
        if body.len() + read > MAX_HTTP_BODY {
            return Err(FetchError::malformed(format!("response from {url} too large")));
        }
        body.extend_from_slice(&chunk[..read]);
    }

    String::from_utf8(body).map_err(|err| FetchError::malformed(err.to_string()))
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    if network.wifi_ssid.is_empty() {
        return Err(anyhow!("wifi ssid is not configured"));
    }

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected on attempt {attempt}");
                last_err = None;
                break;
            }
            Err(err) => {
                warn!("wifi connect failed on attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    if let Some(err) = last_err {
        return Err(anyhow!(
            "all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed: {err:#}"
        ));
    }

    drop(wifi);
    Ok(esp_wifi)
}
