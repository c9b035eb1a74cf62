//! Campaign service: CRUD for campaigns and their recipient lists.
//!
//! Creating or updating a campaign resolves its recipient specifiers chunk by
//! chunk; each chunk is written to the recipient association before the next
//! one is resolved.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mailcast_common::error::AppError;
use mailcast_common::types::{
    Campaign, CampaignContent, CampaignStyle, Contact, Pagination, Project, RecipientSpec,
};

use crate::recipients::{RecipientFailure, RecipientResolver, Resolution};
use crate::store::{CampaignStore, ChangeNotifier, ContactStore};

/// Largest page accepted by [`CampaignService::list_recipients`].
pub const MAX_PAGE_SIZE: u32 = 100;

/// Fields accepted when creating or replacing a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignParams {
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub style: CampaignStyle,
    #[serde(default)]
    pub recipients: Vec<RecipientSpec>,
    pub sender_email: Option<String>,
    pub sender_name: Option<String>,
    pub email_json: Option<serde_json::Value>,
}

impl CampaignParams {
    fn validate(&self) -> Result<(), AppError> {
        if self.subject.trim().is_empty() {
            return Err(AppError::Validation("subject must not be empty".to_string()));
        }
        if self.body.trim().is_empty() {
            return Err(AppError::Validation("body must not be empty".to_string()));
        }
        Ok(())
    }

    fn sender_email(&self) -> Option<&str> {
        self.sender_email.as_deref().filter(|s| !s.is_empty())
    }

    fn sender_name(&self) -> Option<&str> {
        self.sender_name.as_deref().filter(|s| !s.is_empty())
    }

    fn content(&self) -> CampaignContent {
        CampaignContent {
            subject: self.subject.clone(),
            body: self.body.clone(),
            style: self.style,
            sender_email: self.sender_email().map(str::to_string),
            sender_name: self.sender_name().map(str::to_string),
            email_json: self.email_json.clone(),
        }
    }
}

/// A created or updated campaign together with the recipient entries that
/// could not be resolved.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignResult {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub recipients: usize,
    pub failed: Vec<RecipientFailure>,
}

/// One page of a campaign's recipients.
#[derive(Debug, Clone, Serialize)]
pub struct RecipientPage {
    pub recipients: Vec<Contact>,
    pub pagination: Pagination,
}

/// Service layer for campaign CRUD.
pub struct CampaignService<S, N> {
    store: S,
    notifier: N,
    resolver: RecipientResolver<S>,
}

impl<S, N> CampaignService<S, N>
where
    S: ContactStore + CampaignStore,
    N: ChangeNotifier,
{
    pub fn new(store: S, notifier: N) -> Self {
        Self {
            resolver: RecipientResolver::new(store.clone()),
            store,
            notifier,
        }
    }

    /// Override the recipient chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.resolver = self.resolver.with_chunk_size(chunk_size);
        self
    }

    /// Create a campaign and assign its recipients.
    pub async fn create(&self, project: &Project, params: &CampaignParams) -> Result<CampaignResult, AppError> {
        params.validate()?;
        validate_sender(project, params.sender_email())?;
        // Reject a malformed sentinel before anything is written.
        self.check_sentinel(&params.recipients)?;

        let campaign = self.store.insert(project.id, &params.content()).await?;
        let resolution = self
            .assign_recipients(project.id, campaign.id, &params.recipients)
            .await?;

        tracing::info!(
            campaign_id = %campaign.id,
            project_id = %project.id,
            recipients = resolution.contact_ids.len(),
            failed = resolution.failed.len(),
            "Campaign created"
        );

        self.notify(project.id, campaign.id).await;
        Ok(CampaignResult {
            campaign,
            recipients: resolution.contact_ids.len(),
            failed: resolution.failed,
        })
    }

    /// Get a campaign owned by the project.
    pub async fn get(&self, project_id: Uuid, campaign_id: Uuid) -> Result<Campaign, AppError> {
        self.store
            .find(campaign_id)
            .await?
            .filter(|c| c.project_id == project_id)
            .ok_or_else(|| AppError::NotFound("campaign".to_string()))
    }

    /// List a project's campaigns, newest first.
    pub async fn list_by_project(&self, project_id: Uuid) -> Result<Vec<Campaign>, AppError> {
        self.store.list_by_project(project_id).await
    }

    /// Replace a campaign's content and recipient list.
    pub async fn update(
        &self,
        project: &Project,
        campaign_id: Uuid,
        params: &CampaignParams,
    ) -> Result<CampaignResult, AppError> {
        params.validate()?;
        validate_sender(project, params.sender_email())?;
        self.check_sentinel(&params.recipients)?;
        self.get(project.id, campaign_id).await?;

        let campaign = self
            .store
            .update_content(campaign_id, &params.content())
            .await?;

        self.store.set_recipients(campaign_id, &[]).await?;
        let resolution = self
            .assign_recipients(project.id, campaign_id, &params.recipients)
            .await?;

        tracing::info!(
            campaign_id = %campaign_id,
            recipients = resolution.contact_ids.len(),
            failed = resolution.failed.len(),
            "Campaign updated"
        );

        self.notify(project.id, campaign_id).await;
        Ok(CampaignResult {
            campaign,
            recipients: resolution.contact_ids.len(),
            failed: resolution.failed,
        })
    }

    /// Copy a campaign's content into a new draft without recipients.
    pub async fn duplicate(&self, project: &Project, campaign_id: Uuid) -> Result<Campaign, AppError> {
        let source = self.get(project.id, campaign_id).await?;
        let copy = self
            .store
            .insert(project.id, &CampaignContent::from(&source))
            .await?;

        tracing::info!(source_id = %campaign_id, campaign_id = %copy.id, "Campaign duplicated");

        self.notify(project.id, copy.id).await;
        Ok(copy)
    }

    /// Delete a campaign. Recipients and tasks go with it.
    pub async fn delete(&self, project_id: Uuid, campaign_id: Uuid) -> Result<Campaign, AppError> {
        let campaign = self.get(project_id, campaign_id).await?;
        self.store.delete(campaign_id).await?;

        tracing::info!(campaign_id = %campaign_id, "Campaign deleted");

        self.notify(project_id, campaign_id).await;
        Ok(campaign)
    }

    /// Page through a campaign's recipients ordered by email.
    pub async fn list_recipients(
        &self,
        project_id: Uuid,
        campaign_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<RecipientPage, AppError> {
        self.get(project_id, campaign_id).await?;

        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = u64::from(page - 1) * u64::from(page_size);

        let (recipients, total) = self
            .store
            .recipient_page(campaign_id, page_size, offset)
            .await?;

        Ok(RecipientPage {
            recipients,
            pagination: Pagination::new(page, page_size, total),
        })
    }

    fn check_sentinel(&self, specs: &[RecipientSpec]) -> Result<(), AppError> {
        if specs.len() > 1 && specs.contains(&RecipientSpec::All) {
            return Err(AppError::Validation(
                "\"all\" must be the only recipient when present".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve and append recipients one chunk at a time.
    async fn assign_recipients(
        &self,
        project_id: Uuid,
        campaign_id: Uuid,
        specs: &[RecipientSpec],
    ) -> Result<Resolution, AppError> {
        let chunk_size = self.resolver.chunk_size();

        if let Some(contact_ids) = self.resolver.expand_all(project_id, specs).await? {
            for chunk in contact_ids.chunks(chunk_size) {
                self.store.add_recipients(campaign_id, chunk).await?;
            }
            return Ok(Resolution {
                contact_ids,
                failed: Vec::new(),
            });
        }

        let mut resolution = Resolution::default();
        for (n, chunk) in specs.chunks(chunk_size).enumerate() {
            let part = self
                .resolver
                .resolve_chunk(project_id, chunk, n * chunk_size)
                .await?;
            self.store.add_recipients(campaign_id, &part.contact_ids).await?;
            resolution.append(part);
        }

        Ok(resolution)
    }

    async fn notify(&self, project_id: Uuid, campaign_id: Uuid) {
        if let Err(e) = self.notifier.campaign_changed(project_id, campaign_id).await {
            tracing::warn!(
                campaign_id = %campaign_id,
                error = %e,
                "Failed to publish campaign change"
            );
        }
    }
}

/// A custom sender address needs a verified project and must share the
/// project email's domain.
pub fn validate_sender(project: &Project, sender_email: Option<&str>) -> Result<(), AppError> {
    let Some(sender) = sender_email else {
        return Ok(());
    };

    if !project.verified {
        return Err(AppError::NotAllowed(
            "You need to attach a domain to your project to customize the sender address"
                .to_string(),
        ));
    }

    let sender_domain = sender.rsplit_once('@').map(|(_, d)| d.to_ascii_lowercase());
    let project_domain = project
        .email
        .as_deref()
        .and_then(|e| e.rsplit_once('@'))
        .map(|(_, d)| d.to_ascii_lowercase());

    if sender_domain.is_none() || sender_domain != project_domain {
        return Err(AppError::NotAllowed(
            "The sender address must be the same domain as the project's email address"
                .to_string(),
        ));
    }

    Ok(())
}
