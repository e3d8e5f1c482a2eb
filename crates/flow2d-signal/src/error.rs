#![forbid(unsafe_code)]

use thiserror::Error;

use crate::registry::{SubscriptionId, Tag};

pub type Result<T> = std::result::Result<T, FlowError>;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("unsupported value kind for key `{key}`: {kind}")]
    UnsupportedValueKind { key: String, kind: &'static str },

    #[error("expected a signal, found {found}")]
    NotASignal { found: &'static str },

    #[error("too long update chain: settle did not converge within {limit} ticks")]
    RunawayChain { limit: u32 },

    #[error("unknown key `{key}`")]
    UnknownKey { key: String },

    #[error("key `{key}` is a {expected} slot and cannot hold a {found} value")]
    KindMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("key `{key}` does not hold a method")]
    NotCallable { key: String },

    #[error("signal belongs to a different runtime")]
    ForeignRuntime,

    #[error("invalid scheduler config: {message}")]
    InvalidConfig { message: String },

    #[error("{message}")]
    Method { message: String },

    #[error("{} subscriber callback(s) failed", failures.len())]
    Subscribers { failures: Vec<SubscriberFailure> },
}

impl FlowError {
    /// Error raised from inside a method body.
    #[must_use]
    pub fn method(message: impl Into<String>) -> Self {
        Self::Method {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Subscriber failures carried by this error, if any.
    #[must_use]
    pub fn subscriber_failures(&self) -> &[SubscriberFailure] {
        match self {
            Self::Subscribers { failures } => failures,
            _ => &[],
        }
    }
}

/// One subscriber callback that returned an error or panicked during notify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberFailure {
    pub subscription: SubscriptionId,
    pub tag: Option<Tag>,
    pub message: String,
}

impl std::fmt::Display for SubscriberFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "subscriber {} [{}]: {}", self.subscription, tag, self.message),
            None => write!(f, "subscriber {}: {}", self.subscription, self.message),
        }
    }
}
