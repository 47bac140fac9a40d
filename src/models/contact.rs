use serde::{Deserialize, Serialize};

use crate::models::channel::Channel;

/// Recipient as known to the contacts collaborator, with its notification
/// preferences. A missing flag means the contact accepts that medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "enabled", alias = "sendEmailNotifications")]
    pub send_email: bool,
    /// Covers every phone-addressed channel, not only SMS.
    #[serde(default = "enabled", alias = "sendSmsNotifications")]
    pub send_sms: bool,
    #[serde(default = "enabled")]
    pub active: bool,
}

fn enabled() -> bool {
    true
}

impl Default for Contact {
    fn default() -> Self {
        Self {
            email: None,
            phone: None,
            name: None,
            send_email: true,
            send_sms: true,
            active: true,
        }
    }
}

impl Contact {
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether this contact wants notifications on `channel` at all.
    pub fn accepts(&self, channel: &Channel) -> bool {
        self.active
            && if channel.is_email() {
                self.send_email
            } else {
                self.send_sms
            }
    }

    /// Address to use for `channel`; email for email, phone for the rest.
    /// `None` for inactive or opted-out contacts.
    pub fn address_for(&self, channel: &Channel) -> Option<&str> {
        if !self.accepts(channel) {
            return None;
        }

        let address = if channel.is_email() {
            self.email.as_deref()
        } else {
            self.phone.as_deref()
        };

        address.map(str::trim).filter(|a| !a.is_empty())
    }
}
