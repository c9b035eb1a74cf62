//! Contact subscription management.
//!
//! The subscribed flag decides who an `"all"` campaign reaches. Contacts are
//! addressed either by id or by email within the calling project.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mailcast_common::error::AppError;
use mailcast_common::types::Contact;

use crate::store::ContactStore;

/// Identifies one contact of the calling project. `id` wins when both are set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactRef {
    pub id: Option<Uuid>,
    pub email: Option<String>,
}

/// Response body for subscribe and unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionChange {
    pub success: bool,
    pub contact: Uuid,
    pub subscribed: bool,
}

pub struct ContactService<S> {
    store: S,
}

impl<S: ContactStore> ContactService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn subscribe(&self, project_id: Uuid, target: &ContactRef) -> Result<SubscriptionChange, AppError> {
        self.set_subscribed(project_id, target, true).await
    }

    pub async fn unsubscribe(&self, project_id: Uuid, target: &ContactRef) -> Result<SubscriptionChange, AppError> {
        self.set_subscribed(project_id, target, false).await
    }

    async fn find(&self, project_id: Uuid, target: &ContactRef) -> Result<Option<Contact>, AppError> {
        match (target.id, target.email.as_deref().map(str::trim)) {
            (Some(id), _) => self.store.find_by_id(project_id, id).await,
            (None, Some(email)) if !email.is_empty() => {
                self.store.find_by_email(project_id, email).await
            }
            _ => Err(AppError::Validation(
                "Either id or email is required".to_string(),
            )),
        }
    }

    async fn set_subscribed(
        &self,
        project_id: Uuid,
        target: &ContactRef,
        subscribed: bool,
    ) -> Result<SubscriptionChange, AppError> {
        let contact = self
            .find(project_id, target)
            .await?
            .ok_or_else(|| AppError::NotFound("contact".to_string()))?;

        let contact = self
            .store
            .set_subscribed(project_id, contact.id, subscribed)
            .await?
            .ok_or_else(|| AppError::NotFound("contact".to_string()))?;

        tracing::info!(
            project_id = %project_id,
            contact_id = %contact.id,
            subscribed,
            "Contact subscription changed"
        );

        Ok(SubscriptionChange {
            success: true,
            contact: contact.id,
            subscribed: contact.subscribed,
        })
    }
}
