use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::{
    error::{DispatchError, DispatchResult},
    models::{contact::Contact, retry::RetryConfig},
    utils::retry_with_backoff,
};

/// Recipient lookup owned by the contacts collaborator.
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    /// `Ok(None)` when the id is unknown.
    async fn get_contact(&self, id: &str) -> DispatchResult<Option<Contact>>;
}

/// Fixed set of contacts, for tests and storage-less runs.
#[derive(Debug, Clone, Default)]
pub struct StaticContactDirectory {
    contacts: HashMap<String, Contact>,
}

impl StaticContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contact(mut self, id: impl Into<String>, contact: Contact) -> Self {
        self.contacts.insert(id.into(), contact);
        self
    }
}

#[async_trait]
impl ContactDirectory for StaticContactDirectory {
    async fn get_contact(&self, id: &str) -> DispatchResult<Option<Contact>> {
        Ok(self.contacts.get(id).cloned())
    }
}

/// Contacts service reached over HTTP at `{base_url}/contacts/{id}`.
pub struct HttpContactDirectory {
    http_client: Client,
    base_url: String,
    retry_config: RetryConfig,
}

impl HttpContactDirectory {
    pub fn new(
        base_url: impl Into<String>,
        retry_config: RetryConfig,
    ) -> Result<Self, anyhow::Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry_config,
        })
    }
}

#[async_trait]
impl ContactDirectory for HttpContactDirectory {
    async fn get_contact(&self, id: &str) -> DispatchResult<Option<Contact>> {
        let url = format!("{}/contacts/{}", self.base_url, id);

        debug!(contact_id = id, "Fetching contact");

        retry_with_backoff(&self.retry_config, || {
            let url = url.clone();
            let client = self.http_client.clone();

            async move {
                let response = client.get(&url).send().await.map_err(|e| e.to_string())?;

                match response.status() {
                    StatusCode::NOT_FOUND => Ok(None),
                    status if status.is_success() => response
                        .json::<Contact>()
                        .await
                        .map(Some)
                        .map_err(|e| format!("Failed to parse contact JSON: {}", e)),
                    status => Err(format!("Contact service returned status {}", status)),
                }
            }
        })
        .await
        .map_err(|e| DispatchError::storage(format!("contact lookup failed: {}", e)))
    }
}
