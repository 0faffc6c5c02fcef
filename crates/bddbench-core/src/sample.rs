use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kind of operation a sample measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Write,
    Query,
    Delete,
    UserCreate,
    UserList,
    UserDelete,
    UserMe,
    Health,
}

impl OperationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Query => "query",
            Self::Delete => "delete",
            Self::UserCreate => "user_create",
            Self::UserList => "user_list",
            Self::UserDelete => "user_delete",
            Self::UserMe => "user_me",
            Self::Health => "health",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// HTTP status is absent for connectivity failures.
    Failure {
        #[serde(rename = "http_status")]
        status: Option<u16>,
        message: String,
    },
    /// Never executed (dry run). Counted, but kept out of latency statistics.
    Skipped,
}

/// One completed (or deliberately skipped) operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub kind: OperationKind,
    pub outcome: Outcome,
    /// Call start to response received.
    pub duration: Duration,
    pub worker_index: usize,
    /// Worker-local sequence number.
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Points carried by a write call.
    #[serde(default)]
    pub points: u64,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub rows: u64,
    /// Time to first result row (queries only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttf: Option<Duration>,
}

impl Sample {
    #[must_use]
    pub fn new(kind: OperationKind, outcome: Outcome, duration: Duration) -> Self {
        Self {
            kind,
            outcome,
            duration,
            worker_index: 0,
            sequence: 0,
            target: None,
            points: 0,
            bytes: 0,
            rows: 0,
            ttf: None,
        }
    }

    #[must_use]
    pub fn success(kind: OperationKind, duration: Duration) -> Self {
        Self::new(kind, Outcome::Success, duration)
    }

    #[must_use]
    pub fn failure(
        kind: OperationKind,
        duration: Duration,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            kind,
            Outcome::Failure {
                status,
                message: message.into(),
            },
            duration,
        )
    }

    #[must_use]
    pub fn skipped(kind: OperationKind) -> Self {
        Self::new(kind, Outcome::Skipped, Duration::ZERO)
    }

    /// Maps an HTTP status onto success (2xx) or a countable failure.
    #[must_use]
    pub fn from_status(kind: OperationKind, duration: Duration, status: u16, body: &str) -> Self {
        if (200..300).contains(&status) {
            Self::success(kind, duration)
        } else {
            let message: String = body.chars().take(256).collect();
            Self::failure(kind, duration, Some(status), message)
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    #[must_use]
    pub fn with_points(mut self, points: u64) -> Self {
        self.points = points;
        self
    }

    #[must_use]
    pub fn with_volume(mut self, bytes: u64, rows: u64) -> Self {
        self.bytes = bytes;
        self.rows = rows;
        self
    }

    #[must_use]
    pub fn with_ttf(mut self, ttf: Option<Duration>) -> Self {
        self.ttf = ttf;
        self
    }

    /// Stamps the pool position onto a sample produced by a client.
    #[must_use]
    pub fn at(mut self, worker_index: usize, sequence: u64) -> Self {
        self.worker_index = worker_index;
        self.sequence = sequence;
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failure { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, Outcome::Skipped)
    }

    /// HTTP status of a failed call, if the target answered at all.
    pub fn status(&self) -> Option<u16> {
        match self.outcome {
            Outcome::Failure { status, .. } => status,
            _ => None,
        }
    }
}
