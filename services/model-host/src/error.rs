//! Error taxonomy. Load errors surface at upload, model faults are contained per instance,
//! source errors pass through verbatim.

use std::time::Duration;
use thiserror::Error;
use modelhost_resilience::ContainmentError;

use crate::instance::ModelStatus;
use crate::model::Capability;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("malformed package: {0}")]
    Malformed(String),
    #[error("model entry lacks capabilities: {}", join(.0))]
    MissingCapability(Vec<Capability>),
    #[error("more than one entry point: {}", .0.join(", "))]
    EntryAmbiguous(Vec<String>),
    #[error("package storage: {0}")]
    Io(#[from] std::io::Error),
}

fn join(caps: &[Capability]) -> String { caps.iter().map(Capability::as_str).collect::<Vec<_>>().join(", ") }

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("data source `{0}` not found")]
    NotFound(String),
    #[error("data source `{name}` unavailable: {reason}")]
    Unavailable { name: String, reason: String },
}

/// Failure inside user model code, or in the channel to it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelFault {
    #[error("model raised: {0}")]
    Raised(String),
    #[error("model panicked: {0}")]
    Panicked(String),
    #[error("model exceeded its {0:?} budget")]
    Timeout(Duration),
    #[error("model process: {0}")]
    Process(String),
    #[error("model protocol: {0}")]
    Protocol(String),
    #[error("bad model output: {0}")]
    BadOutput(String),
}

impl ModelFault {
    pub fn raised(msg: impl Into<String>) -> Self { ModelFault::Raised(msg.into()) }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelFault::Raised(_) => "raised",
            ModelFault::Panicked(_) => "panicked",
            ModelFault::Timeout(_) => "timeout",
            ModelFault::Process(_) => "process",
            ModelFault::Protocol(_) => "protocol",
            ModelFault::BadOutput(_) => "bad_output",
        }
    }

    /// The model's runtime is gone, taking any trained state with it.
    pub fn lost_state(&self) -> bool { matches!(self, ModelFault::Process(_)) }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("model `{0}` not found")]
    ModelNotFound(String),
    #[error("model `{name}` is not trained (status: {status})")]
    NotTrained { name: String, status: ModelStatus },
    #[error("training `{name}` failed: {fault}")]
    Train { name: String, fault: ModelFault },
    #[error("prediction from `{name}` failed: {fault}")]
    Predict { name: String, fault: ModelFault },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("data analysis failed: {0}")]
    Analysis(String),
    #[error("host busy: no execution slot free within {0:?}")]
    Saturated(Duration),
    #[error("host is shutting down")]
    ShuttingDown,
    #[error("host fault: {0}")]
    Host(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Who has to act on an error: the caller, the model author, the data owner, or the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass { Client, UserModel, SourceUnavailable, Host }

impl RuntimeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RuntimeError::Load(LoadError::Io(_)) => ErrorClass::Host,
            RuntimeError::Load(_) => ErrorClass::Client,
            RuntimeError::Source(SourceError::NotFound(_)) => ErrorClass::Client,
            RuntimeError::Source(SourceError::Unavailable { .. }) => ErrorClass::SourceUnavailable,
            RuntimeError::ModelNotFound(_) | RuntimeError::NotTrained { .. } | RuntimeError::InvalidRequest(_) => ErrorClass::Client,
            RuntimeError::Train { .. } | RuntimeError::Predict { .. } => ErrorClass::UserModel,
            RuntimeError::Analysis(_) | RuntimeError::Saturated(_) | RuntimeError::ShuttingDown | RuntimeError::Host(_) => ErrorClass::Host,
        }
    }

    /// HTTP-equivalent status for a transport layer sitting in front of the host.
    pub fn status_code(&self) -> u16 {
        match self {
            RuntimeError::Load(LoadError::Io(_)) => 500,
            RuntimeError::Load(_) | RuntimeError::InvalidRequest(_) => 400,
            RuntimeError::Source(SourceError::NotFound(_)) | RuntimeError::ModelNotFound(_) => 404,
            RuntimeError::NotTrained { .. } => 409,
            RuntimeError::Train { .. } | RuntimeError::Predict { .. } => 422,
            RuntimeError::Source(SourceError::Unavailable { .. }) | RuntimeError::Saturated(_) | RuntimeError::ShuttingDown => 503,
            RuntimeError::Analysis(_) | RuntimeError::Host(_) => 500,
        }
    }

    /// Map a containment outcome for a model call. `Saturated` and `Closed` are host conditions, not model faults.
    pub(crate) fn contained(err: ContainmentError, wrap: impl FnOnce(ModelFault) -> RuntimeError) -> RuntimeError {
        match err {
            ContainmentError::Timeout(d) => wrap(ModelFault::Timeout(d)),
            ContainmentError::Panicked(msg) => wrap(ModelFault::Panicked(msg)),
            ContainmentError::Saturated(d) => RuntimeError::Saturated(d),
            ContainmentError::Closed => RuntimeError::ShuttingDown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_separate_user_model_from_host_faults() {
        let bad_model = RuntimeError::Train { name: "m".into(), fault: ModelFault::raised("boom") };
        assert_eq!(bad_model.status_code(), 422);
        assert_eq!(bad_model.class(), ErrorClass::UserModel);

        let host = RuntimeError::Load(LoadError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")));
        assert_eq!(host.status_code(), 500);
        assert_eq!(host.class(), ErrorClass::Host);

        let not_trained = RuntimeError::NotTrained { name: "m".into(), status: ModelStatus::Uploaded };
        assert_eq!(not_trained.status_code(), 409);
        assert_eq!(not_trained.to_string(), "model `m` is not trained (status: uploaded)");

        assert_eq!(RuntimeError::from(LoadError::MissingCapability(vec![Capability::Fit])).status_code(), 400);
        assert_eq!(RuntimeError::from(SourceError::NotFound("hr".into())).status_code(), 404);
        let down = RuntimeError::from(SourceError::Unavailable { name: "hr".into(), reason: "io".into() });
        assert_eq!(down.status_code(), 503);
        assert_eq!(down.class(), ErrorClass::SourceUnavailable);
    }

    #[test]
    fn busy_host_is_not_a_model_fault() {
        let wrap = |fault| RuntimeError::Train { name: "m".into(), fault };
        let busy = RuntimeError::contained(ContainmentError::Saturated(Duration::from_secs(1)), wrap);
        assert!(matches!(busy, RuntimeError::Saturated(_)));
        assert_eq!(busy.status_code(), 503);
        assert_eq!(busy.class(), ErrorClass::Host);

        let slow = RuntimeError::contained(ContainmentError::Timeout(Duration::from_secs(1)), wrap);
        assert_eq!(slow.status_code(), 422);
        assert_eq!(slow.class(), ErrorClass::UserModel);
    }

    #[test]
    fn missing_capabilities_are_listed() {
        let e = LoadError::MissingCapability(vec![Capability::Setup, Capability::Predict]);
        assert_eq!(e.to_string(), "model entry lacks capabilities: setup, predict");
    }
}
