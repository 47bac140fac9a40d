use std::{
    fmt::{Display, Formatter, Result},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// Delivery medium. The set is open: anything not listed is kept as `Other`
/// and rejected at dispatch time if no transport is registered for it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Channel {
    Email,
    Sms,
    WhatsApp,
    Telegram,
    Other(String),
}

/// Channels a template may be authored for.
pub const TEMPLATE_CHANNELS: &[Channel] = &[Channel::Email, Channel::Sms];

impl Channel {
    pub fn as_str(&self) -> &str {
        match self {
            Channel::Email => "EMAIL",
            Channel::Sms => "SMS",
            Channel::WhatsApp => "WHATSAPP",
            Channel::Telegram => "TELEGRAM",
            Channel::Other(name) => name,
        }
    }

    /// Email carries a subject and an HTML body; every other channel is
    /// plain text rendered from the SMS body.
    pub fn is_email(&self) -> bool {
        matches!(self, Channel::Email)
    }
}

impl From<String> for Channel {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "EMAIL" => Channel::Email,
            "SMS" => Channel::Sms,
            "WHATSAPP" => Channel::WhatsApp,
            "TELEGRAM" => Channel::Telegram,
            other => Channel::Other(other.to_string()),
        }
    }
}

impl From<&str> for Channel {
    fn from(value: &str) -> Self {
        Channel::from(value.to_string())
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.as_str().to_string()
    }
}

impl FromStr for Channel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Channel::from(s))
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}
