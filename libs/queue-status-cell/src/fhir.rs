// libs/queue-status-cell/src/fhir.rs
//
// Wire shapes of the FHIR R4 resources the roster fetcher reads, and their
// conversion into roster models. Only the fields the queue needs are decoded.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{AppointmentRef, AppointmentStatus, EncounterRef, EncounterStatus};

const PRACTITIONER_PREFIX: &str = "Practitioner/";
const APPOINTMENT_PREFIX: &str = "Appointment/";

#[derive(Debug, Clone, Deserialize)]
pub struct FhirBundle {
    #[serde(default)]
    pub link: Vec<FhirBundleLink>,
    #[serde(default)]
    pub entry: Vec<FhirBundleEntry>,
}

impl FhirBundle {
    pub fn next_link(&self) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == "next")
            .map(|l| l.url.as_str())
    }

    pub fn resources(self) -> impl Iterator<Item = Value> {
        self.entry.into_iter().filter_map(|e| e.resource)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FhirBundleLink {
    pub relation: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FhirBundleEntry {
    pub resource: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FhirReference {
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FhirParticipant {
    pub actor: Option<FhirReference>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FhirAppointment {
    pub resource_type: Option<String>,
    pub id: Option<String>,
    pub status: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    #[serde(default)]
    pub participant: Vec<FhirParticipant>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FhirEncounter {
    pub resource_type: Option<String>,
    pub id: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub appointment: Vec<FhirReference>,
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn strip_reference<'a>(reference: &'a FhirReference, prefix: &str) -> Option<&'a str> {
    reference
        .reference
        .as_deref()
        .and_then(|r| r.strip_prefix(prefix))
}

impl FhirAppointment {
    pub fn practitioner_id(&self) -> Option<&str> {
        self.participant
            .iter()
            .filter_map(|p| p.actor.as_ref())
            .find_map(|actor| strip_reference(actor, PRACTITIONER_PREFIX))
    }

    /// Converts to a roster entry. Entries without an id or a parsable start
    /// cannot be placed in the queue and yield `None`.
    pub fn into_appointment_ref(self) -> Option<AppointmentRef> {
        let id = match self.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                warn!("Skipping appointment without id");
                return None;
            }
        };

        let start = match self.start.as_deref().and_then(parse_instant) {
            Some(start) => start,
            None => {
                warn!("Skipping appointment {} with missing or unparsable start {:?}", id, self.start);
                return None;
            }
        };

        let end = self.end.as_deref().and_then(|raw| {
            let parsed = parse_instant(raw);
            if parsed.is_none() {
                warn!("Appointment {} has unparsable end {:?}, treating duration as unknown", id, raw);
            }
            parsed
        });

        let status = self
            .status
            .as_deref()
            .map(AppointmentStatus::from_fhir)
            .unwrap_or(AppointmentStatus::Unknown);

        let practitioner_id = self.practitioner_id().unwrap_or_default().to_string();

        Some(AppointmentRef {
            id,
            start,
            end,
            status,
            practitioner_id,
        })
    }
}

impl FhirEncounter {
    pub fn into_encounter_ref(self, appointment_id: &str) -> EncounterRef {
        let linked = self
            .appointment
            .iter()
            .find_map(|r| strip_reference(r, APPOINTMENT_PREFIX))
            .unwrap_or(appointment_id)
            .to_string();

        let status = self.status.as_deref().and_then(|code| {
            let status = EncounterStatus::from_fhir(code);
            if status.is_none() {
                debug!("Encounter status {:?} carries no queue meaning", code);
            }
            status
        });

        EncounterRef {
            id: self.id,
            status,
            appointment_id: linked,
        }
    }
}

/// Decodes bundle resources of one type, skipping anything that fails to
/// decode rather than failing the whole roster.
pub fn decode_resources<T>(resources: impl Iterator<Item = Value>, resource_type: &str) -> Vec<T>
where
    T: for<'de> Deserialize<'de>,
{
    resources
        .filter(|r| r.get("resourceType").and_then(Value::as_str) == Some(resource_type))
        .filter_map(|r| match serde_json::from_value::<T>(r) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("Skipping malformed {} resource: {}", resource_type, e);
                None
            }
        })
        .collect()
}
