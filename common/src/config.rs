use serde::{Deserialize, Serialize};

use crate::{clock::TimeCorrection, error::ConfigError, SECONDS_PER_DAY};

/// Phase boundaries in seconds since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseBoundaries {
    pub update: u32,
    pub sunrise: u32,
    pub daytime: u32,
    pub sunset_floor: u32,
    pub bedtime: u32,
}

impl Default for PhaseBoundaries {
    fn default() -> Self {
        Self {
            update: 14_400,
            sunrise: 25_200,
            daytime: 27_000,
            sunset_floor: 70_200,
            bedtime: 82_800,
        }
    }
}

impl PhaseBoundaries {
    fn named(&self) -> [(&'static str, u32); 5] {
        [
            ("update", self.update),
            ("sunrise", self.sunrise),
            ("daytime", self.daytime),
            ("sunset_floor", self.sunset_floor),
            ("bedtime", self.bedtime),
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let named = self.named();

        for (name, value) in named {
            if value >= SECONDS_PER_DAY {
                return Err(ConfigError::BoundaryOutOfRange { name, value });
            }
        }

        for pair in named.windows(2) {
            let (earlier, earlier_value) = pair[0];
            let (later, later_value) = pair[1];
            if later_value <= earlier_value {
                return Err(ConfigError::BoundaryOrder { earlier, later });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 41.878,
            longitude: -87.630,
            timezone: "America/Chicago".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmConfig {
    pub frequency_hz: u32,
    pub max_duty: u32,
    pub warm_pin: i32,
    pub cool_pin: i32,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 8_000,
            max_duty: 65_535,
            warm_pin: 10,
            cool_pin: 20,
        }
    }
}

impl PwmConfig {
    pub fn sanitize(&mut self) {
        // IEEE 1789 low-risk region starts at 3 kHz.
        self.frequency_hz = self.frequency_hz.clamp(3_000, 40_000);

        if self.max_duty == 0 {
            self.max_duty = 65_535;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub timezone_url: String,
    pub sunset_url: String,
    /// No override source when unset; the schedule always runs.
    pub override_url: Option<String>,
    pub log_url: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            timezone_url: "https://worldtimeapi.org/api/timezone".to_string(),
            sunset_url: "https://api.sunrise-sunset.org/json".to_string(),
            override_url: None,
            log_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub auth_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LampConfig {
    #[serde(default)]
    pub boundaries: PhaseBoundaries,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub pwm: PwmConfig,
    #[serde(default)]
    pub endpoints: EndpointConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub correction: TimeCorrection,
}

impl LampConfig {
    pub fn sanitize(&mut self) {
        self.pwm.sanitize();
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.boundaries.validate()
    }

    /// Fills blank credentials and unset endpoints from `lookup`, keyed by
    /// variable name (`WIFI_SSID`, `WIFI_PASS`, `LAMP_AUTH_TOKEN`,
    /// `LAMP_OVERRIDE_URL`, `LAMP_LOG_URL`). Values already configured win.
    pub fn fill_from_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        fill_blank(&mut self.network.wifi_ssid, lookup("WIFI_SSID"));
        fill_blank(&mut self.network.wifi_pass, lookup("WIFI_PASS"));
        fill_blank(&mut self.network.auth_token, lookup("LAMP_AUTH_TOKEN"));

        if self.endpoints.override_url.is_none() {
            self.endpoints.override_url = lookup("LAMP_OVERRIDE_URL");
        }
        if self.endpoints.log_url.is_none() {
            self.endpoints.log_url = lookup("LAMP_LOG_URL");
        }
    }
}

fn fill_blank(field: &mut String, value: Option<String>) {
    if field.is_empty() {
        if let Some(value) = value {
            *field = value;
        }
    }
}
