//! Upstream push provider seam.
//!
//! The worker pool only sees this trait; the FCM client behind it is the one
//! place that knows the provider's wire protocol, and the sole authority on
//! whether a failure is retryable or terminal.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use pushrelay_core::{Priority, Task};

pub mod fcm;

pub use fcm::FcmClient;

/// Whether a delivery failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Transient: network trouble, upstream 5xx, rate limiting.
    Retryable,
    /// Permanent: malformed token, unregistered device, rejected payload.
    Terminal,
}

/// Delivery failure as classified by the adapter.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Retryable,
            message: message.into(),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Terminal,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ProviderErrorKind::Retryable
    }
}

/// Provider construction failure (bad credentials file, malformed key).
#[derive(Debug, Error)]
pub enum ProviderInitError {
    #[error("failed to read credentials file {path}: {source}")]
    Credentials {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid service account key: {0}")]
    InvalidKey(String),
}

/// One notification to one device, ready for dispatch.
#[derive(Debug, Clone)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: Option<HashMap<String, String>>,
    pub priority: Priority,
}

impl From<&Task> for PushMessage {
    fn from(task: &Task) -> Self {
        Self {
            token: task.token.clone(),
            title: task.title.clone(),
            body: task.body.clone(),
            data: task.data.clone(),
            priority: task.priority,
        }
    }
}

/// Per-message outcomes of a batch send, in input order.
#[derive(Debug)]
pub struct BatchOutcome {
    pub results: Vec<Result<String, ProviderError>>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl BatchOutcome {
    pub fn from_results(results: Vec<Result<String, ProviderError>>) -> Self {
        let success_count = results.iter().filter(|r| r.is_ok()).count();
        let failure_count = results.len() - success_count;
        Self {
            results,
            success_count,
            failure_count,
        }
    }
}

/// Capability surface of the upstream provider.
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Dispatch one notification; returns the provider's message id.
    async fn send(&self, message: &PushMessage) -> Result<String, ProviderError>;

    /// Dispatch a batch; per-message outcomes match input order.
    async fn send_batch(&self, messages: &[PushMessage]) -> Result<BatchOutcome, ProviderError>;
}
