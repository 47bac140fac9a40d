use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::models::{
    channel::Channel,
    response::ApiResponse,
    status::{FailureKind, QueueStatus},
};

/// Error taxonomy of the dispatch pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("template '{0}' is inactive")]
    TemplateInactive(String),
    #[error("template '{0}' not found")]
    TemplateNotFound(String),
    #[error("no transport registered for channel {0}")]
    UnsupportedChannel(Channel),
    #[error("transport failed: {reason}")]
    Transport { reason: String, transient: bool },
    #[error("invalid transition {from} -> {to} for entry {id}")]
    InvalidTransition {
        id: Uuid,
        from: QueueStatus,
        to: QueueStatus,
    },
    #[error("entry {0} was modified concurrently")]
    ConcurrentUpdate(Uuid),
    #[error("queue entry {0} not found")]
    EntryNotFound(Uuid),
    #[error("signal {0} not found")]
    SignalNotFound(Uuid),
    #[error("storage error: {0}")]
    Storage(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        DispatchError::Storage(err.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::TemplateInactive(_) => "TEMPLATE_INACTIVE",
            Self::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            Self::UnsupportedChannel(_) => "UNSUPPORTED_CHANNEL",
            Self::Transport { .. } => "TRANSPORT",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ConcurrentUpdate(_) => "CONCURRENT_UPDATE",
            Self::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            Self::SignalNotFound(_) => "SIGNAL_NOT_FOUND",
            Self::Storage(_) => "STORAGE",
        }
    }

    /// How the failure is recorded on a queue entry, for errors that can be
    /// folded into one.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Validation(_) => Some(FailureKind::Validation),
            Self::TemplateInactive(_) => Some(FailureKind::TemplateInactive),
            Self::TemplateNotFound(_) => Some(FailureKind::TemplateNotFound),
            Self::UnsupportedChannel(_) => Some(FailureKind::UnsupportedChannel),
            Self::Transport { transient: true, .. } => Some(FailureKind::Transport),
            Self::Transport { transient: false, .. } => Some(FailureKind::Validation),
            _ => None,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::TemplateInactive(_) | Self::UnsupportedChannel(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::TemplateNotFound(_) | Self::EntryNotFound(_) | Self::SignalNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::InvalidTransition { .. } | Self::ConcurrentUpdate(_) => StatusCode::CONFLICT,
            Self::Transport { .. } => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let Self::Storage(ref e) = self {
            tracing::error!(error = %e, kind = "STORAGE", "storage error");
        }

        let body = ApiResponse::<()>::error(self.kind().to_string(), self.to_string());
        (status, Json(body)).into_response()
    }
}

impl From<tokio_postgres::Error> for DispatchError {
    fn from(err: tokio_postgres::Error) -> Self {
        DispatchError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Storage(format!("serialization failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;

    async fn assert_error(error: DispatchError, expected_status: StatusCode, expected_kind: &str) {
        let message = error.to_string();
        let resp = error.into_response();
        assert_eq!(resp.status(), expected_status);

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], expected_kind);
        assert_eq!(json["message"], message);
    }

    #[tokio::test]
    async fn should_return_not_found_for_missing_template() {
        assert_error(
            DispatchError::TemplateNotFound("T1".into()),
            StatusCode::NOT_FOUND,
            "TEMPLATE_NOT_FOUND",
        )
        .await;
    }

    #[tokio::test]
    async fn should_return_conflict_for_invalid_transition() {
        assert_error(
            DispatchError::InvalidTransition {
                id: Uuid::nil(),
                from: QueueStatus::Sent,
                to: QueueStatus::Pending,
            },
            StatusCode::CONFLICT,
            "INVALID_TRANSITION",
        )
        .await;
    }

    #[tokio::test]
    async fn should_return_bad_request_for_validation() {
        assert_error(
            DispatchError::Validation("signalType must not be empty".into()),
            StatusCode::BAD_REQUEST,
            "VALIDATION",
        )
        .await;
    }

    #[tokio::test]
    async fn should_return_internal_for_storage() {
        assert_error(
            DispatchError::storage("connection reset"),
            StatusCode::INTERNAL_SERVER_ERROR,
            "STORAGE",
        )
        .await;
    }

    #[test]
    fn only_transient_transport_errors_map_to_retryable_failures() {
        let transient = DispatchError::Transport {
            reason: "timeout".into(),
            transient: true,
        };
        let permanent = DispatchError::Transport {
            reason: "400".into(),
            transient: false,
        };

        assert_eq!(transient.failure_kind(), Some(FailureKind::Transport));
        assert_eq!(permanent.failure_kind(), Some(FailureKind::Validation));
        assert_eq!(DispatchError::storage("x").failure_kind(), None);
    }
}
