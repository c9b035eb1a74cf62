//! Campaign dispatcher: the "send campaign" entry point.
//!
//! A live send schedules the campaign's stored recipients, marks the campaign
//! delivered and writes one task per recipient together with the campaign's
//! delivery events. A test send mails the rendered campaign to the project's
//! members and leaves the campaign untouched.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mailcast_common::error::AppError;
use mailcast_common::types::{Campaign, CampaignStatus, Project};
use mailcast_notifier::render::render_campaign;
use mailcast_notifier::{Mailer, OutgoingEmail, Sender};

use crate::scheduler::DeliveryScheduler;
use crate::store::{CampaignStore, ChangeNotifier, MemberStore, TaskStore};

/// Subject prefix for test sends.
pub const TEST_SUBJECT_PREFIX: &str = "[Campaign Test]";

/// Characters dropped from a subject when building event names.
static SLUG_STRIPPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.,/#!$%^&*;:{}=\-_`~()]").expect("valid slug pattern"));

/// Body of a send request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub id: Uuid,
    pub live: bool,
    /// Extra minutes before the first batch goes out
    #[serde(default)]
    pub delay: Option<u32>,
}

/// What a send did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SendOutcome {
    Live {
        scheduled: usize,
        first_run_by: Option<DateTime<Utc>>,
        last_run_by: Option<DateTime<Utc>>,
    },
    Test {
        recipients: usize,
    },
}

/// Orchestrates campaign sends over the storage, cache and mail collaborators.
pub struct CampaignDispatcher<S, N, M> {
    store: S,
    notifier: N,
    mailer: M,
    scheduler: DeliveryScheduler,
    default_sender: String,
}

impl<S, N, M> CampaignDispatcher<S, N, M>
where
    S: CampaignStore + TaskStore + MemberStore,
    N: ChangeNotifier,
    M: Mailer,
{
    /// `default_sender` is used for test sends from unverified projects.
    pub fn new(store: S, notifier: N, mailer: M, default_sender: impl Into<String>) -> Self {
        Self {
            store,
            notifier,
            mailer,
            scheduler: DeliveryScheduler::new(),
            default_sender: default_sender.into(),
        }
    }

    pub async fn send(&self, project: &Project, request: &SendRequest) -> Result<SendOutcome, AppError> {
        self.send_at(project, request, Utc::now()).await
    }

    /// Same as [`Self::send`] with an explicit acceptance time.
    pub async fn send_at(
        &self,
        project: &Project,
        request: &SendRequest,
        now: DateTime<Utc>,
    ) -> Result<SendOutcome, AppError> {
        let campaign = self
            .store
            .find(request.id)
            .await?
            .filter(|c| c.project_id == project.id)
            .ok_or_else(|| AppError::NotFound("campaign".to_string()))?;

        let outcome = if request.live {
            self.send_live(project, &campaign, request.delay.unwrap_or(0), now)
                .await?
        } else {
            self.send_test(project, &campaign).await?
        };

        self.notify(project.id, campaign.id).await;
        Ok(outcome)
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

    async fn send_live(
        &self,
        project: &Project,
        campaign: &Campaign,
        delay: u32,
        now: DateTime<Utc>,
    ) -> Result<SendOutcome, AppError> {
        let recipients = self.store.recipients(campaign.id).await?;
        if recipients.is_empty() {
            return Err(AppError::Validation("No recipients found".to_string()));
        }

        self.store
            .update_status(campaign.id, CampaignStatus::Delivered, Some(now))
            .await?;

        let tasks = self.scheduler.schedule(campaign.id, &recipients, delay, now);
        let events = delivery_event_names(&campaign.subject);

        if let Err(e) = self
            .store
            .record_delivery(project.id, campaign.id, &tasks, &events)
            .await
        {
            tracing::error!(
                campaign_id = %campaign.id,
                error = %e,
                "Delivery write failed, restoring campaign status"
            );
            if let Err(restore) = self
                .store
                .update_status(campaign.id, campaign.status, campaign.delivered_at)
                .await
            {
                tracing::error!(
                    campaign_id = %campaign.id,
                    error = %restore,
                    "Failed to restore campaign status"
                );
            }
            // Readers may have cached the delivered state in between.
            self.notify(project.id, campaign.id).await;
            return Err(e);
        }

        tracing::info!(
            campaign_id = %campaign.id,
            project_id = %project.id,
            scheduled = tasks.len(),
            delay,
            "Campaign delivered"
        );

        Ok(SendOutcome::Live {
            scheduled: tasks.len(),
            first_run_by: tasks.first().map(|t| t.run_by),
            last_run_by: tasks.last().map(|t| t.run_by),
        })
    }

    async fn send_test(&self, project: &Project, campaign: &Campaign) -> Result<SendOutcome, AppError> {
        let members = self.store.member_emails(project.id).await?;
        if members.is_empty() {
            return Err(AppError::Validation(
                "Project has no members to send a test to".to_string(),
            ));
        }

        let email = compose_test_email(project, campaign, members, &self.default_sender);
        self.mailer.send(&email).await?;

        tracing::info!(
            campaign_id = %campaign.id,
            recipients = email.to.len(),
            "Campaign test email sent"
        );

        Ok(SendOutcome::Test {
            recipients: email.to.len(),
        })
    }
}

/// Build the test email for a campaign.
///
/// The sender is the project's verified address when it has one, otherwise
/// `default_sender`.
pub fn compose_test_email(
    project: &Project,
    campaign: &Campaign,
    to: Vec<String>,
    default_sender: &str,
) -> OutgoingEmail {
    let email = match (&project.email, project.verified) {
        (Some(email), true) => email.clone(),
        _ => default_sender.to_string(),
    };

    OutgoingEmail {
        from: Sender {
            name: project.sender_name.clone().unwrap_or_else(|| project.name.clone()),
            email,
        },
        to,
        subject: format!("{} {}", TEST_SUBJECT_PREFIX, campaign.subject),
        html: render_campaign(&campaign.body, campaign.style, &project.name),
    }
}

/// Lowercased subject with punctuation removed and spaces turned into dashes.
pub fn event_slug(subject: &str) -> String {
    SLUG_STRIPPED
        .replace_all(&subject.to_lowercase(), "")
        .replace(' ', "-")
}

/// Names of the events recorded when a campaign is delivered.
pub fn delivery_event_names(subject: &str) -> Vec<String> {
    let slug = event_slug(subject);
    vec![
        format!("{}-campaign-delivered", slug),
        format!("{}-campaign-opened", slug),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mailcast_common::types::CampaignStyle;

    use crate::memory::{MemoryMailer, MemoryStore};

    fn project() -> Project {
        Project {
            id: Uuid::new_v4(),
            name: "Acme".to_string(),
            secret_key: "sk_test".to_string(),
            public_key: "pk_test".to_string(),
            email: Some("news@acme.io".to_string()),
            verified: false,
            sender_name: None,
            created_at: Utc::now(),
        }
    }

    fn draft(project_id: Uuid, subject: &str) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            project_id,
            subject: subject.to_string(),
            body: "Hello".to_string(),
            style: CampaignStyle::Markdown,
            sender_email: None,
            sender_name: None,
            email_json: None,
            status: CampaignStatus::Draft,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn dispatcher(store: &MemoryStore, mailer: &MemoryMailer) -> CampaignDispatcher<MemoryStore, MemoryStore, MemoryMailer> {
        CampaignDispatcher::new(store.clone(), store.clone(), mailer.clone(), "no-reply@mailcast.dev")
    }

    async fn campaign_with_recipients(store: &MemoryStore, project: &Project, n: usize) -> Campaign {
        let campaign = draft(project.id, "Spring Sale");
        store.insert_campaign(campaign.clone());
        let ids: Vec<Uuid> = (0..n)
            .map(|i| store.insert_contact(project.id, &format!("user{}@x.com", i), true).id)
            .collect();
        store.set_recipients(campaign.id, &ids).await.unwrap();
        campaign
    }

    fn live(id: Uuid, delay: Option<u32>) -> SendRequest {
        SendRequest { id, live: true, delay }
    }

    #[test]
    fn test_event_slug() {
        assert_eq!(event_slug("Hello, World! Big-Sale_2024"), "hello-world-bigsale2024");
        assert_eq!(event_slug("Spring Sale"), "spring-sale");
        assert_eq!(event_slug("50% off (today) {only}"), "50-off-today-only");
        assert_eq!(event_slug("Q&A: Ask~Us`"), "qa-askus");
        assert_eq!(
            delivery_event_names("Spring Sale"),
            vec!["spring-sale-campaign-delivered", "spring-sale-campaign-opened"]
        );
    }

    #[test]
    fn test_send_request_delay_is_optional_and_non_negative() {
        let req: SendRequest =
            serde_json::from_value(serde_json::json!({"id": Uuid::new_v4(), "live": true})).unwrap();
        assert_eq!(req.delay, None);

        let negative: Result<SendRequest, _> = serde_json::from_value(
            serde_json::json!({"id": Uuid::new_v4(), "live": true, "delay": -5}),
        );
        assert!(negative.is_err());
    }

    #[tokio::test]
    async fn test_live_send_schedules_81_recipients() {
        let store = MemoryStore::new();
        let mailer = MemoryMailer::new();
        let project = project();
        let campaign = campaign_with_recipients(&store, &project, 81).await;
        let now = Utc::now();

        let outcome = dispatcher(&store, &mailer)
            .send_at(&project, &live(campaign.id, None), now)
            .await
            .unwrap();

        let tasks = store.tasks();
        assert_eq!(tasks.len(), 81);
        assert!(tasks[..80].iter().all(|t| t.run_by == now + Duration::minutes(1)));
        assert_eq!(tasks[80].run_by, now + Duration::minutes(2));

        assert_eq!(
            outcome,
            SendOutcome::Live {
                scheduled: 81,
                first_run_by: Some(now + Duration::minutes(1)),
                last_run_by: Some(now + Duration::minutes(2)),
            }
        );

        let stored = store.campaign(campaign.id).unwrap();
        assert_eq!(stored.status, CampaignStatus::Delivered);
        assert_eq!(stored.delivered_at, Some(now));

        let events: Vec<String> = store.events().into_iter().map(|(_, _, name)| name).collect();
        assert_eq!(
            events,
            vec!["spring-sale-campaign-delivered", "spring-sale-campaign-opened"]
        );
        assert_eq!(store.changes(), vec![(project.id, campaign.id)]);
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_live_send_applies_base_delay() {
        let store = MemoryStore::new();
        let project = project();
        let campaign = campaign_with_recipients(&store, &project, 3).await;
        let now = Utc::now();

        dispatcher(&store, &MemoryMailer::new())
            .send_at(&project, &live(campaign.id, Some(10)), now)
            .await
            .unwrap();

        assert!(store.tasks().iter().all(|t| t.run_by == now + Duration::minutes(11)));
    }

    #[tokio::test]
    async fn test_live_send_without_recipients_is_rejected_without_mutation() {
        let store = MemoryStore::new();
        let project = project();
        let campaign = draft(project.id, "Empty");
        store.insert_campaign(campaign.clone());

        let result = dispatcher(&store, &MemoryMailer::new())
            .send(&project, &live(campaign.id, None))
            .await;

        match result {
            Err(AppError::Validation(msg)) => assert_eq!(msg, "No recipients found"),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(store.campaign(campaign.id).unwrap().status, CampaignStatus::Draft);
        assert!(store.tasks().is_empty());
        assert!(store.events().is_empty());
        assert!(store.changes().is_empty());
    }

    #[tokio::test]
    async fn test_live_send_follows_stored_recipient_order() {
        let store = MemoryStore::new();
        let project = project();
        let campaign = draft(project.id, "Ordered");
        store.insert_campaign(campaign.clone());
        let ids: Vec<Uuid> = (0..5)
            .map(|i| store.insert_contact(project.id, &format!("o{}@x.com", i), true).id)
            .collect();
        let reversed: Vec<Uuid> = ids.iter().rev().copied().collect();
        store.set_recipients(campaign.id, &reversed).await.unwrap();

        dispatcher(&store, &MemoryMailer::new())
            .send(&project, &live(campaign.id, None))
            .await
            .unwrap();

        let scheduled: Vec<Uuid> = store.tasks().iter().map(|t| t.contact_id).collect();
        assert_eq!(scheduled, reversed);
    }

    #[tokio::test]
    async fn test_campaign_of_other_project_is_not_found() {
        let store = MemoryStore::new();
        let owner = project();
        let campaign = campaign_with_recipients(&store, &owner, 1).await;

        let result = dispatcher(&store, &MemoryMailer::new())
            .send(&project(), &live(campaign.id, None))
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(store.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_failed_task_insert_restores_status() {
        let store = MemoryStore::new();
        let project = project();
        let campaign = campaign_with_recipients(&store, &project, 5).await;
        store.fail_task_inserts(true);

        let result = dispatcher(&store, &MemoryMailer::new())
            .send(&project, &live(campaign.id, None))
            .await;

        assert!(result.is_err());
        let stored = store.campaign(campaign.id).unwrap();
        assert_eq!(stored.status, CampaignStatus::Draft);
        assert_eq!(stored.delivered_at, None);
        assert!(store.tasks().is_empty());
        assert!(store.events().is_empty());
        // Cached reads are invalidated even though the send failed.
        assert_eq!(store.changes(), vec![(project.id, campaign.id)]);
    }

    #[tokio::test]
    async fn test_failed_event_write_leaves_nothing_behind_and_retry_schedules_once() {
        let store = MemoryStore::new();
        let project = project();
        let campaign = campaign_with_recipients(&store, &project, 3).await;
        store.fail_event_inserts(true);

        let dispatcher = dispatcher(&store, &MemoryMailer::new());
        let result = dispatcher.send(&project, &live(campaign.id, None)).await;

        assert!(result.is_err());
        assert_eq!(store.campaign(campaign.id).unwrap().status, CampaignStatus::Draft);
        assert!(store.tasks().is_empty());
        assert!(store.events().is_empty());
        assert_eq!(store.changes().len(), 1);

        store.fail_event_inserts(false);
        dispatcher
            .send(&project, &live(campaign.id, None))
            .await
            .unwrap();

        assert_eq!(store.tasks().len(), 3);
        assert_eq!(store.events().len(), 2);
        assert_eq!(store.campaign(campaign.id).unwrap().status, CampaignStatus::Delivered);
    }

    #[tokio::test]
    async fn test_test_send_mails_members_only() {
        let store = MemoryStore::new();
        let mailer = MemoryMailer::new();
        let project = project();
        let campaign = campaign_with_recipients(&store, &project, 10).await;
        store.add_member(project.id, "owner@acme.io");
        store.add_member(project.id, "dev@acme.io");

        let outcome = dispatcher(&store, &mailer)
            .send(&project, &SendRequest { id: campaign.id, live: false, delay: None })
            .await
            .unwrap();

        assert_eq!(outcome, SendOutcome::Test { recipients: 2 });
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["owner@acme.io", "dev@acme.io"]);
        assert_eq!(sent[0].subject, "[Campaign Test] Spring Sale");
        // Unverified project falls back to the default sender.
        assert_eq!(sent[0].from.email, "no-reply@mailcast.dev");
        assert_eq!(sent[0].from.name, "Acme");

        assert!(store.tasks().is_empty());
        assert_eq!(store.campaign(campaign.id).unwrap().status, CampaignStatus::Draft);
    }

    #[tokio::test]
    async fn test_test_send_without_members_is_rejected() {
        let store = MemoryStore::new();
        let project = project();
        let campaign = campaign_with_recipients(&store, &project, 1).await;

        let result = dispatcher(&store, &MemoryMailer::new())
            .send(&project, &SendRequest { id: campaign.id, live: false, delay: None })
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_verified_project_sends_from_own_address() {
        let mut project = project();
        project.verified = true;
        project.sender_name = Some("Acme News".to_string());
        let campaign = draft(project.id, "Hi");

        let email = compose_test_email(&project, &campaign, vec!["a@x.com".into()], "no-reply@mailcast.dev");
        assert_eq!(email.from.email, "news@acme.io");
        assert_eq!(email.from.name, "Acme News");
    }
}
