//! Storage collaborators consumed by the dispatch planner.
//!
//! The resolver, scheduler and dispatcher only talk to storage through these
//! traits. `PgStore` backs them with PostgreSQL; `MemoryStore` backs them
//! in-process for tests.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use mailcast_common::error::AppError;
use mailcast_common::types::{Campaign, CampaignContent, CampaignStatus, Contact, ScheduledTask};

/// Contact lookup and creation.
///
/// Implementations must not create two contacts for the same
/// `(project_id, email)`, including under concurrent `create` calls.
pub trait ContactStore: Clone + Send + Sync + 'static {
    fn find_by_email(
        &self,
        project_id: Uuid,
        email: &str,
    ) -> impl Future<Output = Result<Option<Contact>, AppError>> + Send;

    fn find_by_id(
        &self,
        project_id: Uuid,
        contact_id: Uuid,
    ) -> impl Future<Output = Result<Option<Contact>, AppError>> + Send;

    /// Create a contact, or return the existing one for the same address.
    fn create(
        &self,
        project_id: Uuid,
        email: &str,
        subscribed: bool,
    ) -> impl Future<Output = Result<Contact, AppError>> + Send;

    fn list_subscribed(
        &self,
        project_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Contact>, AppError>> + Send;

    /// Set the subscribed flag of a project's contact. `None` when the contact
    /// does not exist in the project.
    fn set_subscribed(
        &self,
        project_id: Uuid,
        contact_id: Uuid,
        subscribed: bool,
    ) -> impl Future<Output = Result<Option<Contact>, AppError>> + Send;
}

/// Bulk persistence of scheduled send tasks.
pub trait TaskStore: Clone + Send + Sync + 'static {
    /// Insert every task or none of them.
    fn bulk_insert(
        &self,
        tasks: &[ScheduledTask],
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Insert a live send's tasks and its delivery events together: either
    /// all rows are written or none are.
    fn record_delivery(
        &self,
        project_id: Uuid,
        campaign_id: Uuid,
        tasks: &[ScheduledTask],
        events: &[String],
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Campaign state and recipient association.
pub trait CampaignStore: Clone + Send + Sync + 'static {
    fn find(
        &self,
        campaign_id: Uuid,
    ) -> impl Future<Output = Result<Option<Campaign>, AppError>> + Send;

    /// Insert a new draft campaign.
    fn insert(
        &self,
        project_id: Uuid,
        content: &CampaignContent,
    ) -> impl Future<Output = Result<Campaign, AppError>> + Send;

    /// Overwrite a campaign's editable fields.
    fn update_content(
        &self,
        campaign_id: Uuid,
        content: &CampaignContent,
    ) -> impl Future<Output = Result<Campaign, AppError>> + Send;

    /// A project's campaigns, newest first.
    fn list_by_project(
        &self,
        project_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Campaign>, AppError>> + Send;

    /// Delete a campaign with its recipient association and tasks.
    fn delete(&self, campaign_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Single atomic update of status and delivery timestamp.
    fn update_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
        delivered_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Replace the recipient association.
    fn set_recipients(
        &self,
        campaign_id: Uuid,
        contact_ids: &[Uuid],
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Append contacts to the association. Already-associated contacts are kept
    /// at their original position.
    fn add_recipients(
        &self,
        campaign_id: Uuid,
        contact_ids: &[Uuid],
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Associated contact ids in insertion order.
    fn recipients(
        &self,
        campaign_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Uuid>, AppError>> + Send;

    /// One page of associated contacts ordered by email, plus the total count.
    fn recipient_page(
        &self,
        campaign_id: Uuid,
        limit: u32,
        offset: u64,
    ) -> impl Future<Output = Result<(Vec<Contact>, u64), AppError>> + Send;
}

/// Project membership, used to address test sends.
pub trait MemberStore: Clone + Send + Sync + 'static {
    fn member_emails(
        &self,
        project_id: Uuid,
    ) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;
}

/// Receives "campaign changed" notifications after successful mutations.
pub trait ChangeNotifier: Clone + Send + Sync + 'static {
    fn campaign_changed(
        &self,
        project_id: Uuid,
        campaign_id: Uuid,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}
