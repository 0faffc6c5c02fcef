use std::path::PathBuf;

use thiserror::Error;

/// Run-level failures. Any of these prevents a KPI record from being produced.
///
/// Per-operation failures never surface here; they are recorded as failed
/// samples by the operation clients.
#[derive(Debug, Error)]
pub enum BenchError {
    /// Workload or scenario parameters are malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// A benchmark target could not be provisioned.
    #[error("failed to provision bucket `{bucket}`: {reason}")]
    Provisioning {
        /// Bucket that failed to come up.
        bucket: String,
        /// Status or transport error reported by the target.
        reason: String,
    },

    /// The run context of a dependent phase is missing or unusable.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error while writing artifacts.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A report or KPI export failed under strict export policy.
    #[error("report error: {0}")]
    Report(String),

    /// A worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Worker(String),

    /// Points that should have been deleted are still present.
    #[error("verification failed: {0}")]
    Verification(String),
}

impl BenchError {
    /// Creates a `Validation` variant.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a `Provisioning` variant.
    #[must_use]
    pub fn provisioning(bucket: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Provisioning {
            bucket: bucket.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `Report` variant.
    #[must_use]
    pub fn report(message: impl Into<String>) -> Self {
        Self::Report(message.into())
    }
}

/// Failures loading the context written by an earlier phase.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("run context `{}` does not exist", path.display())]
    Missing { path: PathBuf },

    #[error("run context `{}` could not be read: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("run context `{}` is invalid: {reason}", path.display())]
    Invalid { path: PathBuf, reason: String },

    #[error("run context measurement mismatch: expected `{expected}`, found `{found}`")]
    MeasurementMismatch { expected: String, found: String },
}

/// Convenient result alias for benchmark operations.
pub type BenchResult<T> = Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_errors_stay_distinct() {
        let err: BenchError = ContextError::Missing {
            path: PathBuf::from("reports/ctx.json"),
        }
        .into();
        assert!(matches!(err, BenchError::Context(ContextError::Missing { .. })));
        assert!(err.to_string().contains("reports/ctx.json"));
    }

    #[test]
    fn provisioning_message_names_bucket() {
        let err = BenchError::provisioning("bench_2", "status 500");
        assert_eq!(
            err.to_string(),
            "failed to provision bucket `bench_2`: status 500"
        );
    }
}
