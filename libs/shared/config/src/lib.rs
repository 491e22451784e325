use std::env;
use std::str::FromStr;

use chrono_tz::Tz;
use tracing::warn;

pub const DEFAULT_FHIR_REQUEST_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;
pub const DEFAULT_PLANNED_WAIT_MINUTES: u32 = 10;
pub const DEFAULT_SLOT_MINUTES: u32 = 15;
pub const DEFAULT_FIRST_STATUS_TIMEOUT_SECONDS: u64 = 15;
pub const DEFAULT_API_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub fhir_base_url: String,
    pub fhir_request_timeout_seconds: u64,
    pub clinic_timezone: Tz,
    pub poll_interval_seconds: u64,
    pub planned_wait_minutes: u32,
    pub default_slot_minutes: u32,
    pub first_status_timeout_seconds: u64,
    pub api_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fhir_base_url: String::new(),
            fhir_request_timeout_seconds: DEFAULT_FHIR_REQUEST_TIMEOUT_SECONDS,
            clinic_timezone: Tz::UTC,
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            planned_wait_minutes: DEFAULT_PLANNED_WAIT_MINUTES,
            default_slot_minutes: DEFAULT_SLOT_MINUTES,
            first_status_timeout_seconds: DEFAULT_FIRST_STATUS_TIMEOUT_SECONDS,
            api_port: DEFAULT_API_PORT,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            fhir_base_url: env::var("FHIR_BASE_URL")
                .unwrap_or_else(|_| {
                    warn!("FHIR_BASE_URL not set, using empty value");
                    String::new()
                }),
            fhir_request_timeout_seconds: parse_var(
                "FHIR_REQUEST_TIMEOUT_SECONDS",
                DEFAULT_FHIR_REQUEST_TIMEOUT_SECONDS,
            ),
            clinic_timezone: parse_var("CLINIC_TIMEZONE", Tz::UTC),
            poll_interval_seconds: parse_var(
                "QUEUE_POLL_INTERVAL_SECONDS",
                DEFAULT_POLL_INTERVAL_SECONDS,
            )
            .max(1),
            planned_wait_minutes: parse_var("QUEUE_PLANNED_WAIT_MINUTES", DEFAULT_PLANNED_WAIT_MINUTES),
            default_slot_minutes: parse_var("QUEUE_DEFAULT_SLOT_MINUTES", DEFAULT_SLOT_MINUTES),
            first_status_timeout_seconds: parse_var(
                "QUEUE_FIRST_STATUS_TIMEOUT_SECONDS",
                DEFAULT_FIRST_STATUS_TIMEOUT_SECONDS,
            ),
            api_port: parse_var("API_PORT", DEFAULT_API_PORT),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.fhir_base_url.is_empty()
    }
}

/// Reads an optional variable, falling back to `default` when it is absent or
/// does not parse.
fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {:?}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
