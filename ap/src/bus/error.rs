//! Bus errors

use thiserror::Error;

/// Errors that make `publish` itself fail (nothing was dispatched)
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

/// Why delivery to one or more subscribers failed
///
/// These never fail `publish`; they are reported inside the delivery result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Delivery failed to {recipient}: Delivery timeout after {timeout_ms}ms")]
    Timeout { recipient: String, timeout_ms: u64 },

    #[error("Delivery failed to {recipient}: {reason}")]
    Failed { recipient: String, reason: String },

    #[error("Multiple delivery failures: {}", join_failures(.0))]
    Multiple(Vec<DeliveryError>),
}

fn join_failures(errors: &[DeliveryError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl DeliveryError {
    /// Collapse per-subscriber failures: none, one as itself, several combined
    pub fn aggregate(mut errors: Vec<DeliveryError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// Number of subscriber failures this error stands for
    pub fn failure_count(&self) -> usize {
        match self {
            Self::Multiple(errors) => errors.len(),
            _ => 1,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
