// libs/queue-status-cell/src/services/roster.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, instrument};

use shared_config::AppConfig;
use shared_database::{FhirClient, FhirError};

use crate::error::QueueStatusError;
use crate::fhir::{decode_resources, FhirAppointment, FhirBundle, FhirEncounter};
use crate::models::{AppointmentRef, EncounterRef, Roster};

/// Upper bound on followed bundle pages for one roster query.
const MAX_ROSTER_PAGES: usize = 20;
const ROSTER_PAGE_SIZE: usize = 100;

/// Read port onto the clinical record store. Implementations are stateless
/// and shared by every poller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RosterFetcher: Send + Sync {
    /// Loads a single appointment by id.
    async fn fetch_appointment(
        &self,
        appointment_id: &str,
        auth_token: &str,
    ) -> Result<AppointmentRef, QueueStatusError>;

    /// Loads every appointment of `practitioner_id` on the clinic-local `day`
    /// and the encounter linked to `target_appointment_id`, if any.
    async fn fetch_roster(
        &self,
        practitioner_id: &str,
        day: NaiveDate,
        target_appointment_id: &str,
        auth_token: &str,
    ) -> Result<Roster, QueueStatusError>;
}

pub struct FhirRosterFetcher {
    fhir: FhirClient,
    timezone: Tz,
}

impl FhirRosterFetcher {
    pub fn new(config: &AppConfig) -> Result<Self, QueueStatusError> {
        let fhir = FhirClient::new(config).map_err(|e| QueueStatusError::Fetch(e.to_string()))?;

        Ok(Self {
            fhir,
            timezone: config.clinic_timezone,
        })
    }

    pub fn shared(config: &AppConfig) -> Result<Arc<dyn RosterFetcher>, QueueStatusError> {
        Ok(Arc::new(Self::new(config)?))
    }

    /// UTC bounds `[start, end)` covering the whole clinic-local day.
    pub fn day_window(&self, day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = local_midnight(self.timezone, day);
        let end = day
            .succ_opt()
            .map(|next| local_midnight(self.timezone, next))
            .unwrap_or(start + Duration::days(1));
        (start, end)
    }

    async fn fetch_bundle_pages(
        &self,
        first_path: &str,
        auth_token: &str,
    ) -> Result<Vec<Value>, QueueStatusError> {
        let mut bundle: FhirBundle = self
            .fhir
            .request(Method::GET, first_path, Some(auth_token))
            .await
            .map_err(|e| QueueStatusError::Fetch(e.to_string()))?;

        let mut resources = Vec::new();

        for page in 1..=MAX_ROSTER_PAGES {
            let next = bundle.next_link().map(str::to_string);
            resources.extend(bundle.resources());

            let Some(next_url) = next else { break };
            if page == MAX_ROSTER_PAGES {
                return Err(QueueStatusError::Fetch(format!(
                    "Roster spans more than {} pages",
                    MAX_ROSTER_PAGES
                )));
            }

            debug!("Following roster page {}: {}", page + 1, next_url);
            bundle = self
                .fhir
                .get_absolute(&next_url, Some(auth_token))
                .await
                .map_err(|e| QueueStatusError::Fetch(e.to_string()))?;
        }

        Ok(resources)
    }

    async fn fetch_target_encounter(
        &self,
        appointment_id: &str,
        auth_token: &str,
    ) -> Result<Option<EncounterRef>, QueueStatusError> {
        let path = format!(
            "/Encounter?appointment=Appointment/{}",
            urlencoding::encode(appointment_id)
        );

        let bundle: FhirBundle = self
            .fhir
            .request(Method::GET, &path, Some(auth_token))
            .await
            .map_err(|e| QueueStatusError::Fetch(e.to_string()))?;

        let encounter = decode_resources::<FhirEncounter>(bundle.resources(), "Encounter")
            .into_iter()
            .next()
            .map(|e| e.into_encounter_ref(appointment_id));

        Ok(encounter)
    }
}

#[async_trait]
impl RosterFetcher for FhirRosterFetcher {
    #[instrument(skip(self, auth_token))]
    async fn fetch_appointment(
        &self,
        appointment_id: &str,
        auth_token: &str,
    ) -> Result<AppointmentRef, QueueStatusError> {
        let path = format!("/Appointment/{}", urlencoding::encode(appointment_id));

        let raw: FhirAppointment = self
            .fhir
            .request(Method::GET, &path, Some(auth_token))
            .await
            .map_err(|e| {
                if FhirError::is_not_found(&e) {
                    QueueStatusError::AppointmentNotFound(appointment_id.to_string())
                } else {
                    QueueStatusError::Fetch(e.to_string())
                }
            })?;

        raw.into_appointment_ref().ok_or_else(|| {
            QueueStatusError::MalformedData(format!(
                "Appointment {} has no usable start time",
                appointment_id
            ))
        })
    }

    #[instrument(skip(self, auth_token))]
    async fn fetch_roster(
        &self,
        practitioner_id: &str,
        day: NaiveDate,
        target_appointment_id: &str,
        auth_token: &str,
    ) -> Result<Roster, QueueStatusError> {
        let (window_start, window_end) = self.day_window(day);

        let path = format!(
            "/Appointment?practitioner=Practitioner/{}&date=ge{}&date=lt{}&_count={}",
            urlencoding::encode(practitioner_id),
            window_start.format("%Y-%m-%dT%H:%M:%SZ"),
            window_end.format("%Y-%m-%dT%H:%M:%SZ"),
            ROSTER_PAGE_SIZE,
        );

        let resources = self.fetch_bundle_pages(&path, auth_token).await?;
        let appointments: Vec<AppointmentRef> =
            decode_resources::<FhirAppointment>(resources.into_iter(), "Appointment")
                .into_iter()
                .filter_map(FhirAppointment::into_appointment_ref)
                .collect();

        let target_encounter = self
            .fetch_target_encounter(target_appointment_id, auth_token)
            .await?;

        debug!(
            "Fetched roster for practitioner {} on {}: {} appointments, encounter present: {}",
            practitioner_id,
            day,
            appointments.len(),
            target_encounter.is_some()
        );

        Ok(Roster {
            appointments,
            target_encounter,
        })
    }
}

/// First instant of `day` in `tz`. A midnight skipped by a DST jump resolves
/// to the first valid local hour.
fn local_midnight(tz: Tz, day: NaiveDate) -> DateTime<Utc> {
    let midnight = day.and_time(NaiveTime::MIN);

    (0..3)
        .find_map(|h| tz.from_local_datetime(&(midnight + Duration::hours(h))).earliest())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}
