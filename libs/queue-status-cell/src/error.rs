use thiserror::Error;

use shared_models::AppError;

#[derive(Error, Debug)]
pub enum QueueStatusError {
    #[error("Roster fetch failed: {0}")]
    Fetch(String),

    #[error("Appointment not found: {0}")]
    AppointmentNotFound(String),

    #[error("Malformed clinical data: {0}")]
    MalformedData(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No queue subscription for appointment {0}")]
    SubscriptionNotFound(String),
}

impl From<QueueStatusError> for AppError {
    fn from(err: QueueStatusError) -> Self {
        match err {
            QueueStatusError::AppointmentNotFound(_) | QueueStatusError::SubscriptionNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            QueueStatusError::Fetch(_) => AppError::ExternalService(err.to_string()),
            QueueStatusError::MalformedData(_) | QueueStatusError::Serialization(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}
