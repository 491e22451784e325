// libs/queue-status-cell/src/services/poller.rs
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::models::{AppointmentRef, PollerState, QueueSettings, QueueStatus};
use crate::services::clock::Clock;
use crate::services::estimator::QueueEstimator;
use crate::services::roster::RosterFetcher;

/// Collaborators shared by every poller.
#[derive(Clone)]
pub struct PollerDeps {
    pub fetcher: Arc<dyn RosterFetcher>,
    pub estimator: QueueEstimator,
    pub clock: Arc<dyn Clock>,
    pub settings: QueueSettings,
}

/// Consumer handle onto one appointment's poller. Dropping it stops the
/// poller.
pub struct QueueSubscription {
    appointment_id: String,
    status_rx: watch::Receiver<QueueStatus>,
    state_rx: watch::Receiver<PollerState>,
    target_tx: Arc<watch::Sender<AppointmentRef>>,
    cancel: CancellationToken,
}

impl QueueSubscription {
    pub fn appointment_id(&self) -> &str {
        &self.appointment_id
    }

    pub fn current(&self) -> QueueStatus {
        *self.status_rx.borrow()
    }

    /// A fresh observer of published statuses.
    pub fn receiver(&self) -> watch::Receiver<QueueStatus> {
        self.status_rx.clone()
    }

    pub fn state(&self) -> PollerState {
        *self.state_rx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<PollerState> {
        self.state_rx.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.state() == PollerState::Stopped
    }

    /// The appointment as the poller last saw it, from the consumer or the
    /// record store.
    pub fn target(&self) -> AppointmentRef {
        self.target_tx.borrow().clone()
    }

    /// Hands the poller a newer version of the tracked appointment. Versions
    /// that do not change id, start or status are ignored.
    pub fn update_target(&self, target: AppointmentRef) -> bool {
        self.target_tx.send_if_modified(|current| {
            if current.differs_for_tracking(&target) {
                *current = target;
                true
            } else {
                false
            }
        })
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for QueueSubscription {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!("Unsubscribing queue status for appointment {}", self.appointment_id);
            self.cancel.cancel();
        }
    }
}

enum Wake {
    Cancelled,
    TargetChanged,
    Timer,
}

/// Refresh loop for one tracked appointment: Idle until the target is a
/// same-day arrived appointment, Active while it is, Stopped once the
/// subscription goes away.
///
/// Active ticks read the practitioner's roster. Idle ticks only re-read the
/// target appointment, so a check-in or a new clinic day is noticed without
/// any consumer involvement.
pub struct QueuePoller {
    target: AppointmentRef,
    auth_token: String,
    deps: PollerDeps,
    status_tx: watch::Sender<QueueStatus>,
    state_tx: watch::Sender<PollerState>,
    target_tx: Arc<watch::Sender<AppointmentRef>>,
    target_rx: watch::Receiver<AppointmentRef>,
    cancel: CancellationToken,
}

impl QueuePoller {
    pub fn spawn(target: AppointmentRef, auth_token: impl Into<String>, deps: PollerDeps) -> QueueSubscription {
        let (status_tx, status_rx) = watch::channel(QueueStatus::not_applicable());
        let (state_tx, state_rx) = watch::channel(PollerState::Idle);
        let (target_tx, target_rx) = watch::channel(target.clone());
        let target_tx = Arc::new(target_tx);
        let cancel = CancellationToken::new();

        let appointment_id = target.id.clone();
        let poller = Self {
            target,
            auth_token: auth_token.into(),
            deps,
            status_tx,
            state_tx,
            target_tx: target_tx.clone(),
            target_rx,
            cancel: cancel.clone(),
        };

        tokio::spawn(poller.run());

        QueueSubscription {
            appointment_id,
            status_rx,
            state_rx,
            target_tx,
            cancel,
        }
    }

    async fn run(mut self) {
        info!("Queue poller started for appointment {}", self.target.id);

        let mut state = self.evaluate_target(true);

        while state != PollerState::Stopped {
            if state == PollerState::Active {
                state = self.tick().await;
                if state != PollerState::Active {
                    continue;
                }
            }

            state = match self.wait().await {
                Wake::Cancelled => PollerState::Stopped,
                Wake::TargetChanged => {
                    self.target = self.target_rx.borrow_and_update().clone();
                    debug!("Target appointment {} changed to status {}", self.target.id, self.target.status);
                    self.evaluate_target(state == PollerState::Active)
                }
                Wake::Timer if state == PollerState::Idle => self.refresh_idle_target().await,
                Wake::Timer => state,
            };
        }

        self.state_tx.send_replace(PollerState::Stopped);
        info!("Queue poller stopped for appointment {}", self.target.id);
    }

    /// Sleeps one interval, armed from the end of the previous tick, unless
    /// cancelled or handed a new target first.
    async fn wait(&mut self) -> Wake {
        let interval = self.deps.settings.poll_interval();

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Wake::Cancelled,
            changed = self.target_rx.changed() => match changed {
                Ok(()) => Wake::TargetChanged,
                Err(_) => Wake::Cancelled,
            },
            _ = tokio::time::sleep(interval) => Wake::Timer,
        }
    }

    /// Decides between Idle and Active for the current target. Leaving Active
    /// (or starting out Idle) publishes `NotApplicable`.
    fn evaluate_target(&mut self, publish_when_idle: bool) -> PollerState {
        let now = self.deps.clock.now();

        if self.deps.estimator.is_applicable(&self.target, now) {
            self.set_state(PollerState::Active);
            PollerState::Active
        } else {
            if publish_when_idle {
                self.publish(QueueStatus::not_applicable());
            }
            self.set_state(PollerState::Idle);
            PollerState::Idle
        }
    }

    /// Re-reads the target appointment while Idle. The clock is re-checked
    /// even when the read fails.
    #[instrument(skip(self), fields(appointment_id = %self.target.id))]
    async fn refresh_idle_target(&mut self) -> PollerState {
        let result = self
            .deps
            .fetcher
            .fetch_appointment(&self.target.id, &self.auth_token)
            .await;

        if self.cancel.is_cancelled() {
            return PollerState::Stopped;
        }

        match result {
            Ok(fresh) => self.store_target(fresh),
            Err(e) => warn!("Idle target refresh failed: {}", e),
        }

        self.evaluate_target(false)
    }

    /// Adopts the record store's version of the target and writes it back to
    /// the subscription without waking this poller, so consumer updates are
    /// compared against what the poller actually saw. A consumer update still
    /// waiting to be read takes precedence.
    fn store_target(&mut self, fresh: AppointmentRef) {
        if fresh.differs_for_tracking(&self.target) {
            info!(
                "Appointment {} changed in the record store: status {} -> {}",
                self.target.id, self.target.status, fresh.status
            );
        }

        if !self.target_rx.has_changed().unwrap_or(false) {
            self.target_tx.send_if_modified(|current| {
                *current = fresh.clone();
                false
            });
        }

        self.target = fresh;
    }

    #[instrument(skip(self), fields(appointment_id = %self.target.id))]
    async fn tick(&mut self) -> PollerState {
        let day = self.deps.estimator.local_day(self.target.start);

        let result = self
            .deps
            .fetcher
            .fetch_roster(&self.target.practitioner_id, day, &self.target.id, &self.auth_token)
            .await;

        if self.cancel.is_cancelled() {
            debug!("Discarding in-flight queue refresh for stopped poller");
            return PollerState::Stopped;
        }

        let roster = match result {
            Ok(roster) => roster,
            Err(e) => {
                warn!("Queue refresh failed, keeping previous status: {}", e);
                return PollerState::Active;
            }
        };

        if let Some(fresh) = roster.find(&self.target.id) {
            self.store_target(fresh.clone());
        }

        let now = self.deps.clock.now();
        if !self.deps.estimator.is_applicable(&self.target, now) {
            return self.evaluate_target(true);
        }

        let status = self.deps.estimator.estimate(
            &self.target,
            &roster.appointments,
            roster.target_encounter.as_ref(),
            now,
        );
        self.publish(status);

        PollerState::Active
    }

    fn publish(&self, status: QueueStatus) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.status_tx.send_replace(status);
    }

    fn set_state(&self, state: PollerState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!("Queue poller for appointment {}: {:?} -> {:?}", self.target.id, previous, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use chrono_tz::Tz;

    use crate::error::QueueStatusError;
    use crate::models::{AppointmentStatus, QueueStage, Roster};
    use crate::services::clock::FixedClock;
    use crate::services::roster::MockRosterFetcher;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 10, 30, 0).unwrap()
    }

    fn target(status: AppointmentStatus) -> AppointmentRef {
        AppointmentRef {
            id: "target".to_string(),
            start: now() + Duration::minutes(30),
            end: None,
            status,
            practitioner_id: "dr-1".to_string(),
        }
    }

    fn deps(fetcher: MockRosterFetcher) -> PollerDeps {
        let settings = QueueSettings::default();
        PollerDeps {
            fetcher: Arc::new(fetcher),
            estimator: QueueEstimator::new(&settings, Tz::UTC),
            clock: Arc::new(FixedClock::new(now())),
            settings,
        }
    }

    async fn next_status(rx: &mut watch::Receiver<QueueStatus>) -> QueueStatus {
        rx.changed().await.unwrap();
        *rx.borrow_and_update()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_keeps_previous_status() {
        let mut fetcher = MockRosterFetcher::new();
        let mut calls = 0;
        fetcher.expect_fetch_roster().returning(move |_, _, _, _| {
            calls += 1;
            if calls == 2 {
                Err(QueueStatusError::Fetch("store unavailable".to_string()))
            } else {
                Ok(Roster {
                    appointments: vec![target(AppointmentStatus::Arrived)],
                    target_encounter: None,
                })
            }
        });

        let subscription = QueuePoller::spawn(target(AppointmentStatus::Arrived), "token", deps(fetcher));
        let mut rx = subscription.receiver();

        let first = next_status(&mut rx).await;
        assert_eq!(first.stage, QueueStage::Waiting);
        assert_eq!(first.estimated_wait_minutes, 10);

        // Second tick fails: nothing is published and the value is retained.
        tokio::time::sleep(std::time::Duration::from_secs(6)).await;
        assert_eq!(subscription.current(), first);
        assert_eq!(subscription.state(), PollerState::Active);

        // Third tick succeeds again.
        let third = next_status(&mut rx).await;
        assert_eq!(third, first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_arrived_target_stays_idle_without_fetching_roster() {
        let mut fetcher = MockRosterFetcher::new();
        fetcher.expect_fetch_roster().never();
        fetcher
            .expect_fetch_appointment()
            .returning(|_, _| Ok(target(AppointmentStatus::Booked)));

        let subscription = QueuePoller::spawn(target(AppointmentStatus::Booked), "token", deps(fetcher));
        let mut rx = subscription.receiver();

        assert_eq!(next_status(&mut rx).await, QueueStatus::not_applicable());
        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        assert_eq!(subscription.state(), PollerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fulfilled_in_store_moves_poller_to_idle() {
        let mut fetcher = MockRosterFetcher::new();
        fetcher.expect_fetch_roster().times(1).returning(|_, _, _, _| {
            Ok(Roster {
                appointments: vec![target(AppointmentStatus::Fulfilled)],
                target_encounter: None,
            })
        });
        fetcher
            .expect_fetch_appointment()
            .returning(|_, _| Ok(target(AppointmentStatus::Fulfilled)));

        let subscription = QueuePoller::spawn(target(AppointmentStatus::Arrived), "token", deps(fetcher));
        let mut state_rx = subscription.state_receiver();

        state_rx.wait_for(|s| *s == PollerState::Idle).await.unwrap();
        assert_eq!(subscription.current(), QueueStatus::not_applicable());
        assert_eq!(subscription.target().status, AppointmentStatus::Fulfilled);

        // No further roster reads while idle.
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        assert_eq!(subscription.state(), PollerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_poller_notices_check_in() {
        let mut fetcher = MockRosterFetcher::new();
        let mut reads = 0;
        fetcher.expect_fetch_appointment().returning(move |_, _| {
            reads += 1;
            if reads < 2 {
                Ok(target(AppointmentStatus::Booked))
            } else {
                Ok(target(AppointmentStatus::Arrived))
            }
        });
        fetcher.expect_fetch_roster().returning(|_, _, _, _| {
            Ok(Roster {
                appointments: vec![target(AppointmentStatus::Arrived)],
                target_encounter: None,
            })
        });

        let subscription = QueuePoller::spawn(target(AppointmentStatus::Booked), "token", deps(fetcher));
        let mut rx = subscription.receiver();

        assert_eq!(next_status(&mut rx).await, QueueStatus::not_applicable());

        // First idle read still sees booked; the second sees the check-in.
        let status = next_status(&mut rx).await;
        assert_eq!(status.stage, QueueStage::Waiting);
        assert_eq!(subscription.state(), PollerState::Active);
        assert_eq!(subscription.target().status, AppointmentStatus::Arrived);
    }
}
