use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::{
    clients::store::NotificationStore,
    error::{DispatchError, DispatchResult},
    models::{
        channel::TEMPLATE_CHANNELS,
        template::{NotificationTemplate, TemplateInput},
    },
};

/// Operator-facing template management.
#[derive(Clone)]
pub struct TemplateService {
    store: Arc<dyn NotificationStore>,
}

impl TemplateService {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    fn validate(input: &TemplateInput) -> DispatchResult<()> {
        if input.id.trim().is_empty() {
            return Err(DispatchError::Validation("id must not be empty".to_string()));
        }
        if input.name.trim().is_empty() {
            return Err(DispatchError::Validation(
                "name must not be empty".to_string(),
            ));
        }
        if !TEMPLATE_CHANNELS.contains(&input.channel) {
            return Err(DispatchError::Validation(format!(
                "channel {} is not allowed for templates",
                input.channel
            )));
        }

        let body = if input.channel.is_email() {
            &input.email_body_html
        } else {
            &input.sms_body
        };
        if body.as_deref().is_none_or(|b| b.trim().is_empty()) {
            return Err(DispatchError::Validation(format!(
                "a {} template needs a body",
                input.channel
            )));
        }
        Ok(())
    }

    pub async fn create_template(
        &self,
        input: TemplateInput,
    ) -> DispatchResult<NotificationTemplate> {
        Self::validate(&input)?;

        let now = Utc::now();
        let template = NotificationTemplate {
            id: input.id,
            name: input.name,
            channel: input.channel,
            email_subject: input.email_subject,
            email_body_html: input.email_body_html,
            sms_body: input.sms_body,
            is_active: input.is_active,
            variables: input.variables,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_template(&template).await?;

        info!(template_id = %template.id, channel = %template.channel, "Template created");
        Ok(template)
    }

    /// Replaces every editable field. `createdAt` is kept.
    pub async fn update_template(
        &self,
        input: TemplateInput,
    ) -> DispatchResult<NotificationTemplate> {
        Self::validate(&input)?;

        let existing = self
            .store
            .get_template(&input.id)
            .await?
            .ok_or_else(|| DispatchError::TemplateNotFound(input.id.clone()))?;

        let template = NotificationTemplate {
            id: existing.id,
            name: input.name,
            channel: input.channel,
            email_subject: input.email_subject,
            email_body_html: input.email_body_html,
            sms_body: input.sms_body,
            is_active: input.is_active,
            variables: input.variables,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        };

        if !self.store.update_template(&template).await? {
            return Err(DispatchError::TemplateNotFound(template.id));
        }

        info!(
            template_id = %template.id,
            is_active = template.is_active,
            "Template updated"
        );
        Ok(template)
    }

    pub async fn get_template(&self, id: &str) -> DispatchResult<NotificationTemplate> {
        self.store
            .get_template(id)
            .await?
            .ok_or_else(|| DispatchError::TemplateNotFound(id.to_string()))
    }
}
