use thiserror::Error;

use crate::ids::{OutingId, StudentId};
use crate::model::OutingStatus;

#[derive(Debug, Error)]
pub enum OutingError {
    #[error("request {id} is already {status}; no further decisions are accepted")]
    InvalidTransition { id: OutingId, status: OutingStatus },
    #[error("request {0} is not fully approved")]
    NotFullyApproved(OutingId),
    #[error("qr encoding failed: {0}")]
    EncodingFailure(#[from] EncodeError),
    #[error("scanned code does not resolve to an issued outing pass")]
    UnresolvedCode,
    #[error("scanned code is not an outing gate code")]
    MalformedCode,
    #[error("out of sequence scan: {0}")]
    OutOfSequenceScan(String),
    #[error("request {id} is {status}, not approved")]
    RequestNotApproved { id: OutingId, status: OutingStatus },
    #[error("outing request not found: {0}")]
    NotFound(OutingId),
    #[error("student profile not found: {0}")]
    StudentNotFound(StudentId),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request {0} kept changing underneath; gave up after retries")]
    Conflict(OutingId),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl OutingError {
    /// Stable snake_case tag for API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            OutingError::InvalidTransition { .. } => "invalid_transition",
            OutingError::NotFullyApproved(_) => "not_fully_approved",
            OutingError::EncodingFailure(_) => "encoding_failure",
            OutingError::UnresolvedCode => "unresolved_code",
            OutingError::MalformedCode => "malformed_code",
            OutingError::OutOfSequenceScan(_) => "out_of_sequence_scan",
            OutingError::RequestNotApproved { .. } => "request_not_approved",
            OutingError::NotFound(_) => "not_found",
            OutingError::StudentNotFound(_) => "student_not_found",
            OutingError::Unauthenticated(_) => "unauthenticated",
            OutingError::Forbidden(_) => "forbidden",
            OutingError::InvalidRequest(_) => "invalid_request",
            OutingError::Conflict(_) => "conflict",
            OutingError::Storage(_) => "storage",
        }
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("payload does not fit in a qr symbol: {0}")]
    Capacity(String),
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type OutingResult<T> = Result<T, OutingError>;
