// libs/queue-status-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shared_config::AppConfig;

// ==============================================================================
// ROSTER MODELS
// ==============================================================================

/// An appointment as seen by the queue estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentRef {
    pub id: String,
    pub start: DateTime<Utc>,
    /// Absent when the duration is unknown.
    pub end: Option<DateTime<Utc>>,
    pub status: AppointmentStatus,
    pub practitioner_id: String,
}

impl AppointmentRef {
    /// True when the fields the poller reacts to differ between two versions
    /// of the same appointment.
    pub fn differs_for_tracking(&self, other: &AppointmentRef) -> bool {
        self.id != other.id || self.start != other.start || self.status != other.status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Proposed,
    Pending,
    Booked,
    Arrived,
    Fulfilled,
    Cancelled,
    Noshow,
    EnteredInError,
    #[serde(other)]
    Unknown,
}

impl AppointmentStatus {
    pub fn from_fhir(code: &str) -> Self {
        match code {
            "proposed" => AppointmentStatus::Proposed,
            "pending" => AppointmentStatus::Pending,
            "booked" => AppointmentStatus::Booked,
            "arrived" => AppointmentStatus::Arrived,
            "fulfilled" => AppointmentStatus::Fulfilled,
            "cancelled" => AppointmentStatus::Cancelled,
            "noshow" => AppointmentStatus::Noshow,
            "entered-in-error" => AppointmentStatus::EnteredInError,
            _ => AppointmentStatus::Unknown,
        }
    }

    /// Appointments that no longer occupy the practitioner's queue.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Cancelled | AppointmentStatus::Fulfilled | AppointmentStatus::EnteredInError
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Proposed => write!(f, "proposed"),
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Booked => write!(f, "booked"),
            AppointmentStatus::Arrived => write!(f, "arrived"),
            AppointmentStatus::Fulfilled => write!(f, "fulfilled"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Noshow => write!(f, "noshow"),
            AppointmentStatus::EnteredInError => write!(f, "entered-in-error"),
            AppointmentStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// The clinical encounter linked to an appointment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterRef {
    pub id: Option<String>,
    pub status: Option<EncounterStatus>,
    pub appointment_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncounterStatus {
    Planned,
    InProgress,
    Finished,
}

impl EncounterStatus {
    /// Statuses outside planned / in-progress / finished carry no queue
    /// meaning and are treated as absent.
    pub fn from_fhir(code: &str) -> Option<Self> {
        match code {
            "planned" => Some(EncounterStatus::Planned),
            "in-progress" => Some(EncounterStatus::InProgress),
            "finished" => Some(EncounterStatus::Finished),
            _ => None,
        }
    }
}

/// One practitioner's appointments for a day plus the encounter linked to
/// the tracked appointment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    pub appointments: Vec<AppointmentRef>,
    pub target_encounter: Option<EncounterRef>,
}

impl Roster {
    pub fn find(&self, appointment_id: &str) -> Option<&AppointmentRef> {
        self.appointments.iter().find(|a| a.id == appointment_id)
    }
}

// ==============================================================================
// QUEUE STATUS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStage {
    NotApplicable,
    Waiting,
    EncounterPlanned,
    InProgress,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub position: u32,
    pub estimated_wait_minutes: u32,
    pub stage: QueueStage,
}

impl QueueStatus {
    pub fn not_applicable() -> Self {
        Self::settled(QueueStage::NotApplicable)
    }

    /// A status with nobody ahead and no wait.
    pub fn settled(stage: QueueStage) -> Self {
        Self {
            position: 0,
            estimated_wait_minutes: 0,
            stage,
        }
    }
}

impl Default for QueueStatus {
    fn default() -> Self {
        Self::not_applicable()
    }
}

// ==============================================================================
// SETTINGS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub poll_interval_seconds: u64,
    pub planned_wait_minutes: u32,
    pub default_slot_minutes: u32,
}

impl QueueSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval_seconds: config.poll_interval_seconds.max(1),
            planned_wait_minutes: config.planned_wait_minutes,
            default_slot_minutes: config.default_slot_minutes,
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_seconds)
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

// ==============================================================================
// API MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    Idle,
    Active,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedAppointment {
    pub appointment_id: String,
    pub state: PollerState,
    pub status: QueueStatus,
}
