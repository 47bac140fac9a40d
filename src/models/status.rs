use std::{
    fmt::{Display, Formatter, Result},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// Queue entry status, surfaced verbatim to the admin surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueStatus {
    Pending,
    Sent,
    Failed,
    Retrying,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 4] = [
        QueueStatus::Pending,
        QueueStatus::Sent,
        QueueStatus::Failed,
        QueueStatus::Retrying,
    ];

    /// Transition table. `Retrying` is the in-flight state of a dispatch
    /// attempt and can only resolve to `Sent` or `Failed`. Nothing leaves
    /// `Sent`; a repeat delivery is a requeue, which creates a new entry.
    pub fn can_transition_to(self, next: QueueStatus) -> bool {
        use QueueStatus::*;

        matches!(
            (self, next),
            (Pending, Sent)
                | (Pending, Failed)
                | (Pending, Retrying)
                | (Retrying, Sent)
                | (Retrying, Failed)
                | (Failed, Pending)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "PENDING",
            QueueStatus::Sent => "SENT",
            QueueStatus::Failed => "FAILED",
            QueueStatus::Retrying => "RETRYING",
        }
    }
}

impl Display for QueueStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(QueueStatus::Pending),
            "SENT" => Ok(QueueStatus::Sent),
            "FAILED" => Ok(QueueStatus::Failed),
            "RETRYING" => Ok(QueueStatus::Retrying),
            other => Err(format!("unknown queue status '{}'", other)),
        }
    }
}

/// Why an entry ended up `FAILED`. Only `Transport` failures are picked up
/// by the retry scheduler; everything else waits for an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    TemplateInactive,
    TemplateNotFound,
    UnsupportedChannel,
    Transport,
    Expired,
    Operator,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Transport)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::TemplateInactive => "template_inactive",
            FailureKind::TemplateNotFound => "template_not_found",
            FailureKind::UnsupportedChannel => "unsupported_channel",
            FailureKind::Transport => "transport",
            FailureKind::Expired => "expired",
            FailureKind::Operator => "operator",
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "validation" => Ok(FailureKind::Validation),
            "template_inactive" => Ok(FailureKind::TemplateInactive),
            "template_not_found" => Ok(FailureKind::TemplateNotFound),
            "unsupported_channel" => Ok(FailureKind::UnsupportedChannel),
            "transport" => Ok(FailureKind::Transport),
            "expired" => Ok(FailureKind::Expired),
            "operator" => Ok(FailureKind::Operator),
            other => Err(format!("unknown failure kind '{}'", other)),
        }
    }
}

/// Producer idempotency key state.
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyStatus {
    NotFound,
    Processing,
    Sent,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::NotFound => "not_found",
            IdempotencyStatus::Processing => "processing",
            IdempotencyStatus::Sent => "sent",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_is_closed() {
        use QueueStatus::*;

        let allowed = [
            (Pending, Sent),
            (Pending, Failed),
            (Pending, Retrying),
            (Retrying, Sent),
            (Retrying, Failed),
            (Failed, Pending),
        ];

        for from in QueueStatus::ALL {
            for to in QueueStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn nothing_leaves_sent() {
        for to in QueueStatus::ALL {
            assert!(!QueueStatus::Sent.can_transition_to(to));
        }
    }

    #[test]
    fn only_transport_failures_are_retryable() {
        assert!(FailureKind::Transport.is_retryable());
        assert!(!FailureKind::TemplateInactive.is_retryable());
        assert!(!FailureKind::Expired.is_retryable());
        assert_eq!("expired".parse::<FailureKind>(), Ok(FailureKind::Expired));
    }

    #[test]
    fn status_round_trips_through_text() {
        assert_eq!("retrying".parse::<QueueStatus>(), Ok(QueueStatus::Retrying));
        assert_eq!(serde_json::to_string(&QueueStatus::Sent).unwrap(), r#""SENT""#);
        assert!("DONE".parse::<QueueStatus>().is_err());
    }
}
