// libs/queue-status-cell/src/services/estimator.rs
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::models::{
    AppointmentRef, AppointmentStatus, EncounterRef, EncounterStatus, QueueSettings, QueueStage,
    QueueStatus,
};

/// Derives a patient's place in the practitioner's queue from one roster
/// snapshot. Holds only configuration; every call is a pure function of its
/// arguments.
#[derive(Debug, Clone, Copy)]
pub struct QueueEstimator {
    planned_wait_minutes: u32,
    default_slot_minutes: u32,
    timezone: Tz,
}

impl QueueEstimator {
    pub fn new(settings: &QueueSettings, timezone: Tz) -> Self {
        Self {
            planned_wait_minutes: settings.planned_wait_minutes,
            default_slot_minutes: settings.default_slot_minutes,
            timezone,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Calendar day of an instant in the clinic's time zone.
    pub fn local_day(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone).date_naive()
    }

    /// Queue tracking only runs for same-day appointments whose patient has
    /// checked in.
    pub fn is_applicable(&self, target: &AppointmentRef, now: DateTime<Utc>) -> bool {
        self.local_day(target.start) == self.local_day(now)
            && target.status == AppointmentStatus::Arrived
    }

    pub fn estimate(
        &self,
        target: &AppointmentRef,
        roster: &[AppointmentRef],
        encounter: Option<&EncounterRef>,
        now: DateTime<Utc>,
    ) -> QueueStatus {
        if !self.is_applicable(target, now) {
            return QueueStatus::not_applicable();
        }

        let encounter_status = encounter.and_then(|e| e.status);

        match encounter_status {
            Some(EncounterStatus::InProgress) => return QueueStatus::settled(QueueStage::InProgress),
            Some(EncounterStatus::Finished) => return QueueStatus::settled(QueueStage::Finished),
            _ => {}
        }

        let ahead: Vec<&AppointmentRef> = roster
            .iter()
            .filter(|a| is_ahead_of(a, target))
            .collect();
        let position = ahead.len() as u32;

        let (estimated_wait_minutes, stage) = if encounter_status == Some(EncounterStatus::Planned) {
            (self.planned_wait_minutes, QueueStage::EncounterPlanned)
        } else if position == 0 && encounter.is_none() {
            (self.planned_wait_minutes, QueueStage::Waiting)
        } else {
            let total = ahead
                .iter()
                .fold(0u32, |acc, a| acc.saturating_add(self.slot_minutes(a)));
            (total, QueueStage::Waiting)
        };

        debug!(
            "Estimated queue for appointment {}: position={}, wait={}min, stage={:?}",
            target.id, position, estimated_wait_minutes, stage
        );

        QueueStatus {
            position,
            estimated_wait_minutes,
            stage,
        }
    }

    /// Booked length of an appointment in whole minutes, or the default slot
    /// length when the end is missing or precedes the start.
    pub fn slot_minutes(&self, appointment: &AppointmentRef) -> u32 {
        match appointment.end {
            Some(end) => {
                let seconds = (end - appointment.start).num_seconds();
                if seconds < 0 {
                    self.default_slot_minutes
                } else {
                    (seconds as f64 / 60.0).round() as u32
                }
            }
            None => self.default_slot_minutes,
        }
    }
}

/// Membership of the eligible set: still open, scheduled earlier, not the
/// target itself.
pub fn is_ahead_of(candidate: &AppointmentRef, target: &AppointmentRef) -> bool {
    candidate.id != target.id && !candidate.status.is_closed() && candidate.start < target.start
}
