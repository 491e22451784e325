#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};

use queue_status_cell::{
    AppointmentRef, AppointmentStatus, Clock, EncounterRef, FixedClock, PollerDeps, QueueEstimator,
    QueueSettings, QueueStatusError, Roster, RosterFetcher,
};

pub const TOKEN: &str = "patient-session-token";

/// Mid-morning on the clinic day every fixture lives on.
pub fn clinic_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 10, 30, 0).unwrap()
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, hour, minute, 0).unwrap()
}

pub fn appointment(id: &str, start: DateTime<Utc>, minutes: Option<i64>, status: AppointmentStatus) -> AppointmentRef {
    AppointmentRef {
        id: id.to_string(),
        start,
        end: minutes.map(|m| start + Duration::minutes(m)),
        status,
        practitioner_id: "dr-1".to_string(),
    }
}

pub fn target(status: AppointmentStatus) -> AppointmentRef {
    appointment("target", at(11, 0), Some(15), status)
}

/// Fetch port double with a mutable script, call counting and an optional
/// artificial latency (observed on tokio's virtual clock).
pub struct ScriptedFetcher {
    appointment: Mutex<AppointmentRef>,
    roster: Mutex<Roster>,
    failing: AtomicBool,
    delay: std::time::Duration,
    roster_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(appointment: AppointmentRef, appointments: Vec<AppointmentRef>) -> Arc<Self> {
        Self::with_delay(appointment, appointments, std::time::Duration::ZERO)
    }

    pub fn with_delay(
        appointment: AppointmentRef,
        appointments: Vec<AppointmentRef>,
        delay: std::time::Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            appointment: Mutex::new(appointment),
            roster: Mutex::new(Roster {
                appointments,
                target_encounter: None,
            }),
            failing: AtomicBool::new(false),
            delay,
            roster_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn set_appointments(&self, appointments: Vec<AppointmentRef>) {
        self.roster.lock().unwrap().appointments = appointments;
    }

    pub fn set_encounter(&self, encounter: Option<EncounterRef>) {
        self.roster.lock().unwrap().target_encounter = encounter;
    }

    pub fn set_appointment(&self, appointment: AppointmentRef) {
        *self.appointment.lock().unwrap() = appointment;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn roster_calls(&self) -> usize {
        self.roster_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RosterFetcher for ScriptedFetcher {
    async fn fetch_appointment(
        &self,
        _appointment_id: &str,
        _auth_token: &str,
    ) -> Result<AppointmentRef, QueueStatusError> {
        Ok(self.appointment.lock().unwrap().clone())
    }

    async fn fetch_roster(
        &self,
        _practitioner_id: &str,
        _day: NaiveDate,
        _target_appointment_id: &str,
        _auth_token: &str,
    ) -> Result<Roster, QueueStatusError> {
        self.roster_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueStatusError::Fetch("record store unavailable".to_string()));
        }

        Ok(self.roster.lock().unwrap().clone())
    }
}

pub fn deps_with(fetcher: Arc<dyn RosterFetcher>, clock: Arc<dyn Clock>) -> PollerDeps {
    let settings = QueueSettings::default();
    PollerDeps {
        fetcher,
        estimator: QueueEstimator::new(&settings, Tz::UTC),
        clock,
        settings,
    }
}

pub fn deps(fetcher: Arc<ScriptedFetcher>) -> PollerDeps {
    deps_with(fetcher, Arc::new(FixedClock::new(clinic_now())))
}

// ==============================================================================
// FHIR FIXTURES
// ==============================================================================

pub fn fhir_appointment(id: &str, start: &str, end: Option<&str>, status: &str) -> Value {
    let mut resource = json!({
        "resourceType": "Appointment",
        "id": id,
        "status": status,
        "start": start,
        "participant": [
            {"actor": {"reference": "Patient/p-1"}, "status": "accepted"},
            {"actor": {"reference": "Practitioner/dr-1"}, "status": "accepted"}
        ]
    });
    if let Some(end) = end {
        resource["end"] = json!(end);
    }
    resource
}

pub fn fhir_bundle(resources: Vec<Value>, next: Option<String>) -> Value {
    let mut links = vec![json!({"relation": "self", "url": "http://fhir.test/self"})];
    if let Some(next) = next {
        links.push(json!({"relation": "next", "url": next}));
    }

    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": resources.len(),
        "link": links,
        "entry": resources
            .into_iter()
            .map(|r| json!({"resource": r}))
            .collect::<Vec<_>>()
    })
}
