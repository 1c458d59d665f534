// =============================================================================
// ERROR MODULE
// =============================================================================
// This module defines the error types of the service and their HTTP responses.
//
// Three layers:
// - ApiError:  what went wrong talking to the warehouse backend
// - FlowError: what the flow controller reports to the user, grouped into
//              the categories the UI reacts to (input, lookup, context,
//              domain conflict, transport)
// - AppError:  what the flow service itself answers over HTTP
// =============================================================================

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::ErrorResponse;

// =============================================================================
// BACKEND ERROR CODES
// =============================================================================
/// Error codes the warehouse backend puts in its error bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiErrorCode {
    AssortmentNotFound,
    OutboundFifoViolation,
    UserNotFound,
    ItemNotFound,
    InvalidInput,
    PlacementInvalid,
    PlacementConflict,
    Other(String),
}

impl ApiErrorCode {
    pub fn from_code(code: &str) -> Self {
        match code {
            "ASSORTMENT_NOT_FOUND" => Self::AssortmentNotFound,
            "OUTBOUND_FIFO_VIOLATION" => Self::OutboundFifoViolation,
            "USER_NOT_FOUND" => Self::UserNotFound,
            "ITEM_NOT_FOUND" => Self::ItemNotFound,
            "INVALID_INPUT" => Self::InvalidInput,
            "PLACEMENT_INVALID" => Self::PlacementInvalid,
            "PLACEMENT_CONFLICT" => Self::PlacementConflict,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::AssortmentNotFound => "ASSORTMENT_NOT_FOUND",
            Self::OutboundFifoViolation => "OUTBOUND_FIFO_VIOLATION",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::ItemNotFound => "ITEM_NOT_FOUND",
            Self::InvalidInput => "INVALID_INPUT",
            Self::PlacementInvalid => "PLACEMENT_INVALID",
            Self::PlacementConflict => "PLACEMENT_CONFLICT",
            Self::Other(code) => code,
        }
    }

    /// Message shown to the operator for this code
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AssortmentNotFound => "No stock unit with this code was found.",
            Self::OutboundFifoViolation => "Older stock of this item has to be issued first.",
            Self::UserNotFound => "Your user account could not be found. Sign in again.",
            Self::ItemNotFound => "No item with this code exists in the catalog.",
            Self::InvalidInput => "The request was rejected. Check the entered values.",
            Self::PlacementInvalid => "One of the placements does not fit the chosen rack.",
            Self::PlacementConflict => "One of the chosen positions is already occupied.",
            Self::Other(_) => "The operation failed. Try again.",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::AssortmentNotFound | Self::ItemNotFound => ErrorCategory::Lookup,
            Self::OutboundFifoViolation | Self::PlacementInvalid | Self::PlacementConflict => {
                ErrorCategory::DomainConflict
            }
            Self::InvalidInput => ErrorCategory::Input,
            Self::UserNotFound => ErrorCategory::Context,
            Self::Other(_) => ErrorCategory::Transport,
        }
    }
}

impl std::fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// BACKEND CLIENT ERRORS
// =============================================================================
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection refused, DNS failure, broken body, ...
    #[error("Warehouse API unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-success status
    #[error("Warehouse API rejected the request ({status}): {message}")]
    Rejected {
        status: u16,
        code: Option<ApiErrorCode>,
        message: String,
    },

    /// The backend answered 2xx with a body we could not read
    #[error("Unexpected response from warehouse API: {0}")]
    Decode(String),
}

// =============================================================================
// FLOW ERRORS
// =============================================================================
/// How the UI reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Recovered in place, inline message
    Input,
    /// Current attempt is over, back to method choice or camera
    Lookup,
    /// Warehouse context missing, planning blocked
    Context,
    /// Structured conflict with its own recovery path
    DomainConflict,
    /// Generic failure, retry re-issues the same request
    Transport,
    /// Event not acceptable in the current step
    Protocol,
}

/// Errors reported by the flow controller.
///
/// Stored in the session's single error slot, hence Clone.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    #[error("Code is empty")]
    EmptyCode,

    #[error("No item with code {0}")]
    ItemNotFound(String),

    #[error("Warehouse context is not loaded yet")]
    ContextNotReady,

    #[error("No warehouse selected")]
    NoWarehouseSelected,

    #[error("Code {0} is not on the pick list")]
    UnrelatedCode(String),

    #[error("Code {0} was already scanned")]
    DuplicateScan(String),

    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    #[error("Every placement needs a rack and a non-negative position")]
    IncompletePlacements,

    #[error("No placement with id {0}")]
    UnknownPlacement(u64),

    #[error("Pick slot {0} is not part of the plan")]
    UnknownSlot(i64),

    #[error("Select at least one pick slot")]
    EmptySelection,

    #[error("Not every selected unit has been scanned")]
    VerificationIncomplete,

    #[error("Planner returned an inconsistent plan: {0}")]
    InconsistentPlan(String),

    #[error("{code}: {message}")]
    Api { code: ApiErrorCode, message: String },

    #[error("Warehouse API error: {0}")]
    Transport(String),

    #[error("A request is already in flight")]
    Busy,

    #[error("Nothing to retry")]
    NothingToRetry,

    #[error("Event {event} is not accepted in step {step}")]
    InvalidTransition { step: &'static str, event: &'static str },
}

impl FlowError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::EmptyCode
            | Self::UnrelatedCode(_)
            | Self::DuplicateScan(_)
            | Self::InvalidQuantity
            | Self::IncompletePlacements
            | Self::UnknownPlacement(_)
            | Self::UnknownSlot(_)
            | Self::EmptySelection
            | Self::VerificationIncomplete => ErrorCategory::Input,
            Self::ItemNotFound(_) => ErrorCategory::Lookup,
            Self::ContextNotReady | Self::NoWarehouseSelected => ErrorCategory::Context,
            Self::Api { code, .. } => code.category(),
            Self::InconsistentPlan(_) | Self::Transport(_) => ErrorCategory::Transport,
            Self::Busy | Self::NothingToRetry | Self::InvalidTransition { .. } => {
                ErrorCategory::Protocol
            }
        }
    }

    /// Machine-readable code for the UI
    pub fn code(&self) -> &str {
        match self {
            Self::EmptyCode => "EMPTY_CODE",
            Self::ItemNotFound(_) => "ITEM_NOT_FOUND",
            Self::ContextNotReady => "CONTEXT_NOT_READY",
            Self::NoWarehouseSelected => "NO_WAREHOUSE_SELECTED",
            Self::UnrelatedCode(_) => "UNRELATED_CODE",
            Self::DuplicateScan(_) => "DUPLICATE_SCAN",
            Self::InvalidQuantity => "INVALID_QUANTITY",
            Self::IncompletePlacements => "INCOMPLETE_PLACEMENTS",
            Self::UnknownPlacement(_) => "UNKNOWN_PLACEMENT",
            Self::UnknownSlot(_) => "UNKNOWN_SLOT",
            Self::EmptySelection => "EMPTY_SELECTION",
            Self::VerificationIncomplete => "VERIFICATION_INCOMPLETE",
            Self::InconsistentPlan(_) => "INCONSISTENT_PLAN",
            Self::Api { code, .. } => code.as_str(),
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Busy => "BUSY",
            Self::NothingToRetry => "NOTHING_TO_RETRY",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }

    /// Message shown to the operator
    pub fn user_message(&self) -> String {
        match self {
            Self::ContextNotReady => {
                "The warehouse is still loading. Try again in a moment.".to_string()
            }
            Self::NoWarehouseSelected => "Select a warehouse first.".to_string(),
            Self::Api { code, .. } => code.user_message().to_string(),
            Self::InconsistentPlan(_) | Self::Transport(_) => {
                "The warehouse service could not be reached. Try again.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// True for errors that reject the event itself rather than report a
    /// problem inside the step.
    pub fn is_protocol_violation(&self) -> bool {
        self.category() == ErrorCategory::Protocol
    }
}

impl From<ApiError> for FlowError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Rejected {
                code: Some(code),
                message,
                ..
            } => FlowError::Api { code, message },
            other => FlowError::Transport(other.to_string()),
        }
    }
}

/// Serializable form of the error slot
#[derive(Debug, Clone, Serialize)]
pub struct ErrorView {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
}

impl From<&FlowError> for ErrorView {
    fn from(err: &FlowError) -> Self {
        Self {
            code: err.code().to_string(),
            category: err.category(),
            message: err.user_message(),
        }
    }
}

// =============================================================================
// HTTP ERRORS
// =============================================================================
#[derive(Debug, Error)]
pub enum AppError {
    /// Flow session not found (or already swept)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Event rejected by the flow controller
    #[error("Flow rejected event: {0}")]
    Flow(FlowError),

    /// Warehouse backend call proxied for the UI failed
    #[error("Upstream error: {0}")]
    Upstream(#[from] ApiError),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            // 409 Conflict: the event does not fit the session's current step
            AppError::Flow(_) => StatusCode::CONFLICT,
            AppError::Upstream(ApiError::Rejected { status, .. }) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> String {
        match self {
            AppError::NotFound(_) => "NOT_FOUND".to_string(),
            AppError::BadRequest(_) => "BAD_REQUEST".to_string(),
            AppError::Flow(err) => err.code().to_string(),
            AppError::Upstream(ApiError::Rejected {
                code: Some(code), ..
            }) => code.as_str().to_string(),
            AppError::Upstream(_) => "UPSTREAM_ERROR".to_string(),
            AppError::Internal(_) => "INTERNAL_ERROR".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = match &self {
            AppError::NotFound(msg) | AppError::BadRequest(msg) | AppError::Internal(msg) => {
                msg.clone()
            }
            AppError::Flow(err) => err.to_string(),
            AppError::Upstream(ApiError::Rejected { message, .. }) => message.clone(),
            AppError::Upstream(_) => "The warehouse service could not be reached".to_string(),
        };

        tracing::error!(
            status = status.as_u16(),
            error_code = %error_code,
            message = %message,
            "Request failed"
        );

        let body = match &self {
            // The operator-facing wording travels alongside the raw reason
            AppError::Flow(err) => ErrorResponse::with_details(error_code, message, err.user_message()),
            _ => ErrorResponse::new(error_code, message),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// RESULT TYPE ALIAS
// =============================================================================
pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
