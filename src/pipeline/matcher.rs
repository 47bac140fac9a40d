use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clients::store::NotificationStore,
    error::{DispatchError, DispatchResult},
    models::hook::{
        HookSelection, NewHook, NotificationHook, RecipientResolver, SkipReason, SkippedHook,
        normalize_ids,
    },
};

/// Maps a signal type to the hooks registered for it.
#[derive(Clone)]
pub struct HookMatcher {
    store: Arc<dyn NotificationStore>,
}

impl HookMatcher {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    /// Every hook registered for `signal_type`, in registration order, split
    /// into the ones usable for new dispatch and the ones whose template is
    /// inactive or gone. An empty result is not an error.
    pub async fn match_hooks(&self, signal_type: &str) -> DispatchResult<HookSelection> {
        let hooks = self.store.hooks_for_signal_type(signal_type).await?;

        let mut active: HashMap<String, Option<bool>> = HashMap::new();
        let mut selection = HookSelection::default();
        for hook in hooks {
            let state = match active.get(&hook.template_id) {
                Some(state) => *state,
                None => {
                    let state = self
                        .store
                        .get_template(&hook.template_id)
                        .await?
                        .map(|t| t.is_active);
                    active.insert(hook.template_id.clone(), state);
                    state
                }
            };

            match state {
                Some(true) => selection.selected.push(hook),
                Some(false) => selection.skipped.push(SkippedHook {
                    hook,
                    reason: SkipReason::TemplateInactive,
                }),
                None => selection.skipped.push(SkippedHook {
                    hook,
                    reason: SkipReason::TemplateNotFound,
                }),
            }
        }

        for skipped in &selection.skipped {
            warn!(
                hook_id = %skipped.hook.id,
                template_id = %skipped.hook.template_id,
                reason = ?skipped.reason,
                "Hook skipped, template not usable"
            );
        }
        debug!(
            signal_type,
            matched = selection.selected.len(),
            skipped = selection.skipped.len(),
            "Hooks matched"
        );
        Ok(selection)
    }

    /// Registers a hook. The referenced template must exist at registration
    /// time; it may still be deactivated or removed later.
    pub async fn register(&self, new: NewHook) -> DispatchResult<NotificationHook> {
        let signal_type = new.signal_type.trim();
        if signal_type.is_empty() {
            return Err(DispatchError::Validation(
                "signalType must not be empty".to_string(),
            ));
        }
        if let RecipientResolver::PayloadPath(path) = &new.recipient_resolver {
            if path.trim().is_empty() {
                return Err(DispatchError::Validation(
                    "recipient payload path must not be empty".to_string(),
                ));
            }
        }
        if self.store.get_template(&new.template_id).await?.is_none() {
            return Err(DispatchError::TemplateNotFound(new.template_id));
        }

        let hook = NotificationHook {
            id: Uuid::new_v4(),
            signal_type: signal_type.to_string(),
            channel: new.channel,
            template_id: new.template_id,
            recipient_resolver: new.recipient_resolver,
            cc_ids: normalize_ids(new.cc_ids),
            bcc_ids: normalize_ids(new.bcc_ids),
            created_at: Utc::now(),
        };
        self.store.insert_hook(&hook).await?;

        info!(
            hook_id = %hook.id,
            signal_type = %hook.signal_type,
            channel = %hook.channel,
            template_id = %hook.template_id,
            "Hook registered"
        );
        Ok(hook)
    }

    pub async fn list(&self) -> DispatchResult<Vec<NotificationHook>> {
        self.store.list_hooks().await
    }
}
