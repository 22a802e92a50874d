use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::{
    control::SchedulerError, sensors::CollectError, shelly::DeviceError, status::StatusError,
};

/// Error body returned by every handler: `{"success": false, "error": "..."}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn internal(e: &anyhow::Error) -> Self {
        error!(error = %format!("{e:#}"), "Request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "success": false, "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        Self::internal(&e)
    }
}

impl From<StatusError> for AppError {
    fn from(e: StatusError) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    }
}

impl From<DeviceError> for AppError {
    fn from(e: DeviceError) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, e.to_string())
    }
}

impl From<SchedulerError> for AppError {
    fn from(e: SchedulerError) -> Self {
        let message = e.to_string();
        match e {
            SchedulerError::Unauthorized => Self::new(StatusCode::UNAUTHORIZED, "Unauthorized"),
            SchedulerError::InvalidTime(_) => Self::bad_request(message),
            SchedulerError::Control(inner) => inner.into(),
            SchedulerError::Store(inner) => Self::internal(&inner),
        }
    }
}

impl From<CollectError> for AppError {
    fn from(e: CollectError) -> Self {
        match e {
            CollectError::NoSensorData => Self::new(StatusCode::SERVICE_UNAVAILABLE, "No sensor data"),
            CollectError::Store(inner) => Self::internal(&inner),
        }
    }
}
