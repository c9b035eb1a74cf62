//! In-process implementation of the store traits.
//!
//! Backs the engine's unit tests and any embedding that does not need
//! persistence. All state sits behind one mutex; the lock is never held
//! across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use mailcast_common::error::AppError;
use mailcast_common::types::{Campaign, CampaignContent, CampaignStatus, Contact, ScheduledTask};
use mailcast_notifier::{Mailer, OutgoingEmail};

use crate::store::{CampaignStore, ChangeNotifier, ContactStore, MemberStore, TaskStore};

#[derive(Debug, Default)]
struct MemoryState {
    contacts: Vec<Contact>,
    campaigns: HashMap<Uuid, Campaign>,
    recipients: HashMap<Uuid, Vec<Uuid>>,
    tasks: Vec<ScheduledTask>,
    events: Vec<(Uuid, Uuid, String)>,
    members: HashMap<Uuid, Vec<String>>,
    changes: Vec<(Uuid, Uuid)>,
    journal: Vec<Operation>,
    fail_task_inserts: bool,
    fail_event_inserts: bool,
}

/// Writes observed by the store, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    ContactCreated(String),
    RecipientsAdded(usize),
}

/// Shared in-memory store. Clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_contact(&self, project_id: Uuid, email: &str, subscribed: bool) -> Contact {
        let now = Utc::now();
        let contact = Contact {
            id: Uuid::new_v4(),
            project_id,
            email: email.to_string(),
            subscribed,
            data: None,
            created_at: now,
            updated_at: now,
        };
        self.state().contacts.push(contact.clone());
        contact
    }

    pub fn insert_campaign(&self, campaign: Campaign) {
        self.state().campaigns.insert(campaign.id, campaign);
    }

    pub fn add_member(&self, project_id: Uuid, email: &str) {
        self.state()
            .members
            .entry(project_id)
            .or_default()
            .push(email.to_string());
    }

    /// Make every subsequent task write fail.
    pub fn fail_task_inserts(&self, fail: bool) {
        self.state().fail_task_inserts = fail;
    }

    /// Make the event half of `record_delivery` fail. Nothing is written.
    pub fn fail_event_inserts(&self, fail: bool) {
        self.state().fail_event_inserts = fail;
    }

    /// Contact creations and recipient appends, in call order.
    pub fn journal(&self) -> Vec<Operation> {
        self.state().journal.clone()
    }

    pub fn contacts(&self, project_id: Uuid) -> Vec<Contact> {
        self.state()
            .contacts
            .iter()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect()
    }

    pub fn campaign(&self, campaign_id: Uuid) -> Option<Campaign> {
        self.state().campaigns.get(&campaign_id).cloned()
    }

    pub fn tasks(&self) -> Vec<ScheduledTask> {
        self.state().tasks.clone()
    }

    /// Recorded `(project_id, campaign_id, name)` events.
    pub fn events(&self) -> Vec<(Uuid, Uuid, String)> {
        self.state().events.clone()
    }

    /// Received `(project_id, campaign_id)` change notifications.
    pub fn changes(&self) -> Vec<(Uuid, Uuid)> {
        self.state().changes.clone()
    }
}

impl ContactStore for MemoryStore {
    async fn find_by_email(&self, project_id: Uuid, email: &str) -> Result<Option<Contact>, AppError> {
        Ok(self
            .state()
            .contacts
            .iter()
            .find(|c| c.project_id == project_id && c.email == email)
            .cloned())
    }

    async fn find_by_id(&self, project_id: Uuid, contact_id: Uuid) -> Result<Option<Contact>, AppError> {
        Ok(self
            .state()
            .contacts
            .iter()
            .find(|c| c.project_id == project_id && c.id == contact_id)
            .cloned())
    }

    async fn create(&self, project_id: Uuid, email: &str, subscribed: bool) -> Result<Contact, AppError> {
        let mut state = self.state();
        if let Some(existing) = state
            .contacts
            .iter()
            .find(|c| c.project_id == project_id && c.email == email)
        {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let contact = Contact {
            id: Uuid::new_v4(),
            project_id,
            email: email.to_string(),
            subscribed,
            data: None,
            created_at: now,
            updated_at: now,
        };
        state.contacts.push(contact.clone());
        state.journal.push(Operation::ContactCreated(email.to_string()));
        Ok(contact)
    }

    async fn list_subscribed(&self, project_id: Uuid) -> Result<Vec<Contact>, AppError> {
        Ok(self
            .state()
            .contacts
            .iter()
            .filter(|c| c.project_id == project_id && c.subscribed)
            .cloned()
            .collect())
    }

    async fn set_subscribed(
        &self,
        project_id: Uuid,
        contact_id: Uuid,
        subscribed: bool,
    ) -> Result<Option<Contact>, AppError> {
        let mut state = self.state();
        let Some(contact) = state
            .contacts
            .iter_mut()
            .find(|c| c.project_id == project_id && c.id == contact_id)
        else {
            return Ok(None);
        };
        contact.subscribed = subscribed;
        contact.updated_at = Utc::now();
        Ok(Some(contact.clone()))
    }
}

impl TaskStore for MemoryStore {
    async fn bulk_insert(&self, tasks: &[ScheduledTask]) -> Result<(), AppError> {
        let mut state = self.state();
        if state.fail_task_inserts {
            return Err(AppError::Internal("task insert failed".to_string()));
        }
        state.tasks.extend_from_slice(tasks);
        Ok(())
    }

    async fn record_delivery(
        &self,
        project_id: Uuid,
        campaign_id: Uuid,
        tasks: &[ScheduledTask],
        events: &[String],
    ) -> Result<(), AppError> {
        let mut state = self.state();
        if state.fail_task_inserts {
            return Err(AppError::Internal("task insert failed".to_string()));
        }
        if state.fail_event_inserts {
            return Err(AppError::Internal("event insert failed".to_string()));
        }
        state.tasks.extend_from_slice(tasks);
        for name in events {
            state.events.push((project_id, campaign_id, name.clone()));
        }
        Ok(())
    }
}

impl CampaignStore for MemoryStore {
    async fn find(&self, campaign_id: Uuid) -> Result<Option<Campaign>, AppError> {
        Ok(self.state().campaigns.get(&campaign_id).cloned())
    }

    async fn insert(&self, project_id: Uuid, content: &CampaignContent) -> Result<Campaign, AppError> {
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::new_v4(),
            project_id,
            subject: content.subject.clone(),
            body: content.body.clone(),
            style: content.style,
            sender_email: content.sender_email.clone(),
            sender_name: content.sender_name.clone(),
            email_json: content.email_json.clone(),
            status: CampaignStatus::Draft,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        };
        self.state().campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn update_content(
        &self,
        campaign_id: Uuid,
        content: &CampaignContent,
    ) -> Result<Campaign, AppError> {
        let mut state = self.state();
        let campaign = state
            .campaigns
            .get_mut(&campaign_id)
            .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", campaign_id)))?;
        campaign.subject = content.subject.clone();
        campaign.body = content.body.clone();
        campaign.style = content.style;
        campaign.sender_email = content.sender_email.clone();
        campaign.sender_name = content.sender_name.clone();
        campaign.email_json = content.email_json.clone();
        campaign.updated_at = Utc::now();
        Ok(campaign.clone())
    }

    async fn list_by_project(&self, project_id: Uuid) -> Result<Vec<Campaign>, AppError> {
        let mut campaigns: Vec<Campaign> = self
            .state()
            .campaigns
            .values()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns)
    }

    async fn delete(&self, campaign_id: Uuid) -> Result<(), AppError> {
        let mut state = self.state();
        state.campaigns.remove(&campaign_id);
        state.recipients.remove(&campaign_id);
        state.tasks.retain(|t| t.campaign_id != campaign_id);
        Ok(())
    }

    async fn update_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
        delivered_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let mut state = self.state();
        let campaign = state
            .campaigns
            .get_mut(&campaign_id)
            .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", campaign_id)))?;
        campaign.status = status;
        campaign.delivered_at = delivered_at;
        campaign.updated_at = Utc::now();
        Ok(())
    }

    async fn set_recipients(&self, campaign_id: Uuid, contact_ids: &[Uuid]) -> Result<(), AppError> {
        self.state().recipients.insert(campaign_id, Vec::new());
        self.add_recipients(campaign_id, contact_ids).await
    }

    async fn add_recipients(&self, campaign_id: Uuid, contact_ids: &[Uuid]) -> Result<(), AppError> {
        let mut state = self.state();
        let associated = state.recipients.entry(campaign_id).or_default();
        for id in contact_ids {
            if !associated.contains(id) {
                associated.push(*id);
            }
        }
        state.journal.push(Operation::RecipientsAdded(contact_ids.len()));
        Ok(())
    }

    async fn recipients(&self, campaign_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        Ok(self
            .state()
            .recipients
            .get(&campaign_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn recipient_page(
        &self,
        campaign_id: Uuid,
        limit: u32,
        offset: u64,
    ) -> Result<(Vec<Contact>, u64), AppError> {
        let state = self.state();
        let ids = state.recipients.get(&campaign_id).cloned().unwrap_or_default();
        let mut contacts: Vec<Contact> = state
            .contacts
            .iter()
            .filter(|c| ids.contains(&c.id))
            .cloned()
            .collect();
        contacts.sort_by(|a, b| a.email.cmp(&b.email));

        let page = contacts
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .collect();
        Ok((page, ids.len() as u64))
    }
}

impl MemberStore for MemoryStore {
    async fn member_emails(&self, project_id: Uuid) -> Result<Vec<String>, AppError> {
        Ok(self
            .state()
            .members
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl ChangeNotifier for MemoryStore {
    async fn campaign_changed(&self, project_id: Uuid, campaign_id: Uuid) -> Result<(), AppError> {
        self.state().changes.push((project_id, campaign_id));
        Ok(())
    }
}

/// Mailer that keeps every message instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailer {
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Mailer for MemoryMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), AppError> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(email.clone());
        Ok(())
    }
}
