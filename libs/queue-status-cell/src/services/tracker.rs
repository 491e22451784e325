// libs/queue-status-cell/src/services/tracker.rs
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, instrument, warn};

use shared_config::AppConfig;

use crate::error::QueueStatusError;
use crate::models::{PollerState, QueueSettings, QueueStatus, TrackedAppointment};
use crate::services::clock::SystemClock;
use crate::services::estimator::QueueEstimator;
use crate::services::poller::{PollerDeps, QueuePoller, QueueSubscription};
use crate::services::roster::FhirRosterFetcher;

/// Registry of live queue subscriptions, one poller per appointment.
pub struct QueueTrackerService {
    deps: PollerDeps,
    first_status_timeout: Duration,
    subscriptions: RwLock<HashMap<String, QueueSubscription>>,
}

impl QueueTrackerService {
    pub fn new(config: &AppConfig) -> Result<Self, QueueStatusError> {
        let settings = QueueSettings::from_config(config);
        let deps = PollerDeps {
            fetcher: FhirRosterFetcher::shared(config)?,
            estimator: QueueEstimator::new(&settings, config.clinic_timezone),
            clock: Arc::new(SystemClock),
            settings,
        };

        Ok(Self::with_deps(
            deps,
            Duration::from_secs(config.first_status_timeout_seconds),
        ))
    }

    pub fn with_deps(deps: PollerDeps, first_status_timeout: Duration) -> Self {
        Self {
            deps,
            first_status_timeout,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns an observer of the appointment's queue status, starting a
    /// poller when none is running.
    #[instrument(skip(self, auth_token))]
    pub async fn subscribe(
        &self,
        appointment_id: &str,
        auth_token: &str,
    ) -> Result<watch::Receiver<QueueStatus>, QueueStatusError> {
        if let Some(rx) = self.live_receiver(appointment_id).await {
            return Ok(rx);
        }

        let target = self.deps.fetcher.fetch_appointment(appointment_id, auth_token).await?;

        let mut subscriptions = self.subscriptions.write().await;
        if let Some(existing) = subscriptions.get(appointment_id) {
            if !existing.is_stopped() {
                return Ok(existing.receiver());
            }
        }

        info!("Starting queue tracking for appointment {}", appointment_id);
        let subscription = QueuePoller::spawn(target, auth_token, self.deps.clone());
        let rx = subscription.receiver();
        subscriptions.insert(appointment_id.to_string(), subscription);

        Ok(rx)
    }

    /// Current status for an appointment. A new subscription waits (bounded)
    /// for its first tick; an idle one re-reads the appointment so a patient
    /// who has since checked in starts being tracked.
    #[instrument(skip(self, auth_token))]
    pub async fn current_status(
        &self,
        appointment_id: &str,
        auth_token: &str,
    ) -> Result<QueueStatus, QueueStatusError> {
        let existed = self.live_receiver(appointment_id).await.is_some();

        let mut rx = self.subscribe(appointment_id, auth_token).await?;

        let needs_wait = if existed {
            rx.mark_unchanged();
            self.refresh_target(appointment_id, auth_token).await?
        } else {
            true
        };

        if needs_wait && timeout(self.first_status_timeout, rx.changed()).await.is_err() {
            debug!("No queue status published for {} within {:?}", appointment_id, self.first_status_timeout);
        }

        let status = *rx.borrow();
        Ok(status)
    }

    /// Re-reads an idle subscription's appointment from the store. Returns
    /// true only when the new version makes the poller go Active, which is
    /// when a fresh estimate is about to be published.
    pub async fn refresh_target(
        &self,
        appointment_id: &str,
        auth_token: &str,
    ) -> Result<bool, QueueStatusError> {
        let is_idle = {
            let subscriptions = self.subscriptions.read().await;
            let subscription = subscriptions
                .get(appointment_id)
                .ok_or_else(|| QueueStatusError::SubscriptionNotFound(appointment_id.to_string()))?;
            subscription.state() == PollerState::Idle
        };

        if !is_idle {
            return Ok(false);
        }

        let target = self.deps.fetcher.fetch_appointment(appointment_id, auth_token).await?;

        let activates = self.deps.estimator.is_applicable(&target, self.deps.clock.now());

        let subscriptions = self.subscriptions.read().await;
        let updated = subscriptions
            .get(appointment_id)
            .map(|s| s.update_target(target))
            .unwrap_or(false);

        Ok(updated && activates)
    }

    pub async fn unsubscribe(&self, appointment_id: &str) -> Result<(), QueueStatusError> {
        let removed = self.subscriptions.write().await.remove(appointment_id);

        match removed {
            Some(subscription) => {
                info!("Stopped queue tracking for appointment {}", appointment_id);
                subscription.unsubscribe();
                Ok(())
            }
            None => {
                warn!("Unsubscribe for untracked appointment {}", appointment_id);
                Err(QueueStatusError::SubscriptionNotFound(appointment_id.to_string()))
            }
        }
    }

    pub async fn active_appointments(&self) -> Vec<TrackedAppointment> {
        let subscriptions = self.subscriptions.read().await;
        let mut tracked: Vec<TrackedAppointment> = subscriptions
            .values()
            .map(|s| TrackedAppointment {
                appointment_id: s.appointment_id().to_string(),
                state: s.state(),
                status: s.current(),
            })
            .collect();
        tracked.sort_by(|a, b| a.appointment_id.cmp(&b.appointment_id));
        tracked
    }

    pub async fn shutdown(&self) {
        let drained: Vec<QueueSubscription> = self.subscriptions.write().await.drain().map(|(_, s)| s).collect();
        info!("Stopping {} queue pollers", drained.len());
        drained.into_iter().for_each(QueueSubscription::unsubscribe);
    }

    async fn live_receiver(&self, appointment_id: &str) -> Option<watch::Receiver<QueueStatus>> {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .get(appointment_id)
            .filter(|s| !s.is_stopped())
            .map(QueueSubscription::receiver)
    }
}
