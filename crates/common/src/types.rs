use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Delivered,
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Draft => write!(f, "draft"),
            CampaignStatus::Delivered => write!(f, "delivered"),
        }
    }
}

/// How a campaign body is authored and rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CampaignStyle {
    /// Authored in the dashboard's markdown editor. Mail bodies treat it as
    /// plain text: escaped, with blank lines splitting paragraphs.
    #[default]
    Markdown,
    Html,
}

impl std::fmt::Display for CampaignStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStyle::Markdown => write!(f, "markdown"),
            CampaignStyle::Html => write!(f, "html"),
        }
    }
}

/// A tenant owning contacts and campaigns.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub public_key: String,
    /// Sending address, only usable once the project domain is verified
    pub email: Option<String>,
    pub verified: bool,
    pub sender_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A user with access to a project. Test sends go to every member.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectMember {
    pub project_id: Uuid,
    pub email: String,
    pub role: String,
}

/// An email-addressable recipient owned by a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contact {
    pub id: Uuid,
    pub project_id: Uuid,
    pub email: String,
    pub subscribed: bool,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single email broadcast definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub project_id: Uuid,
    pub subject: String,
    pub body: String,
    pub style: CampaignStyle,
    pub sender_email: Option<String>,
    pub sender_name: Option<String>,
    /// Editor document the body was generated from, stored opaquely
    pub email_json: Option<serde_json::Value>,
    pub status: CampaignStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Editable fields of a campaign, shared by create, update and duplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignContent {
    pub subject: String,
    pub body: String,
    pub style: CampaignStyle,
    pub sender_email: Option<String>,
    pub sender_name: Option<String>,
    pub email_json: Option<serde_json::Value>,
}

impl From<&Campaign> for CampaignContent {
    fn from(campaign: &Campaign) -> Self {
        Self {
            subject: campaign.subject.clone(),
            body: campaign.body.clone(),
            style: campaign.style,
            sender_email: campaign.sender_email.clone(),
            sender_name: campaign.sender_name.clone(),
            email_json: campaign.email_json.clone(),
        }
    }
}

/// One entry of a campaign's recipient list.
///
/// Wire format: `{"email": "a@x.com"}`, `{"contact_id": "<uuid>"}` or `"all"`.
/// `All` is only meaningful as the sole entry of a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientSpec {
    /// Raw address; a subscribed contact is created when none exists.
    Email(String),
    /// Existing contact of the project.
    ContactId(Uuid),
    /// Every currently subscribed contact of the project.
    All,
}

impl std::fmt::Display for RecipientSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientSpec::Email(email) => write!(f, "{}", email),
            RecipientSpec::ContactId(id) => write!(f, "{}", id),
            RecipientSpec::All => write!(f, "all"),
        }
    }
}

/// A per-recipient send instruction handed to the delivery worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub campaign_id: Uuid,
    pub contact_id: Uuid,
    pub run_by: DateTime<Utc>,
}

/// A persisted scheduled task row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CampaignTask {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub contact_id: Uuid,
    pub run_by: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Pagination envelope returned alongside paged listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u64,
}

impl Pagination {
    pub fn new(current_page: u32, page_size: u32, total_count: u64) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            total_count.div_ceil(page_size as u64)
        };
        Self {
            current_page,
            page_size,
            total_count,
            total_pages,
        }
    }
}
