//! PostgreSQL implementation of the store traits.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use mailcast_common::error::AppError;
use mailcast_common::types::{
    Campaign, CampaignContent, CampaignStatus, Contact, Project, ScheduledTask,
};

use crate::recipients::RECIPIENT_CHUNK_SIZE;
use crate::store::{CampaignStore, ContactStore, MemberStore, TaskStore};

/// Rows written per `INSERT` when persisting scheduled tasks.
const TASK_INSERT_CHUNK: usize = 1000;

/// Store backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Look up the project owning a secret API key.
    pub async fn project_by_secret(&self, secret_key: &str) -> Result<Option<Project>, AppError> {
        let project: Option<Project> = sqlx::query_as("SELECT * FROM projects WHERE secret_key = $1")
            .bind(secret_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(project)
    }

    /// Append contacts after the current last position, skipping ones that are
    /// already associated.
    async fn append_recipients(
        tx: &mut Transaction<'_, Postgres>,
        campaign_id: Uuid,
        contact_ids: &[Uuid],
    ) -> Result<(), AppError> {
        let mut next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM campaign_recipients WHERE campaign_id = $1",
        )
        .bind(campaign_id)
        .fetch_one(&mut **tx)
        .await?;

        for chunk in contact_ids.chunks(RECIPIENT_CHUNK_SIZE) {
            sqlx::query(
                r#"
                INSERT INTO campaign_recipients (campaign_id, contact_id, position)
                SELECT $1, r.contact_id, $3 + r.ord - 1
                FROM UNNEST($2::uuid[]) WITH ORDINALITY AS r(contact_id, ord)
                ON CONFLICT (campaign_id, contact_id) DO NOTHING
                "#,
            )
            .bind(campaign_id)
            .bind(chunk.to_vec())
            .bind(next)
            .execute(&mut **tx)
            .await?;

            next += chunk.len() as i64;
        }

        Ok(())
    }

    async fn insert_tasks(
        tx: &mut Transaction<'_, Postgres>,
        tasks: &[ScheduledTask],
    ) -> Result<(), AppError> {
        for chunk in tasks.chunks(TASK_INSERT_CHUNK) {
            let ids: Vec<Uuid> = chunk.iter().map(|_| Uuid::new_v4()).collect();
            let campaign_ids: Vec<Uuid> = chunk.iter().map(|t| t.campaign_id).collect();
            let contact_ids: Vec<Uuid> = chunk.iter().map(|t| t.contact_id).collect();
            let run_by: Vec<DateTime<Utc>> = chunk.iter().map(|t| t.run_by).collect();

            sqlx::query(
                r#"
                INSERT INTO campaign_tasks (id, campaign_id, contact_id, run_by)
                SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::uuid[], $4::timestamptz[])
                "#,
            )
            .bind(ids)
            .bind(campaign_ids)
            .bind(contact_ids)
            .bind(run_by)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }
}

impl ContactStore for PgStore {
    async fn find_by_email(&self, project_id: Uuid, email: &str) -> Result<Option<Contact>, AppError> {
        let contact: Option<Contact> =
            sqlx::query_as("SELECT * FROM contacts WHERE project_id = $1 AND email = $2")
                .bind(project_id)
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;

        Ok(contact)
    }

    async fn find_by_id(&self, project_id: Uuid, contact_id: Uuid) -> Result<Option<Contact>, AppError> {
        let contact: Option<Contact> =
            sqlx::query_as("SELECT * FROM contacts WHERE project_id = $1 AND id = $2")
                .bind(project_id)
                .bind(contact_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(contact)
    }

    /// Relies on `UNIQUE (project_id, email)`: a concurrent insert for the same
    /// address returns the row that won instead of creating a second one.
    async fn create(&self, project_id: Uuid, email: &str, subscribed: bool) -> Result<Contact, AppError> {
        let contact: Contact = sqlx::query_as(
            r#"
            INSERT INTO contacts (id, project_id, email, subscribed)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (project_id, email) DO UPDATE SET email = EXCLUDED.email
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(email)
        .bind(subscribed)
        .fetch_one(&self.pool)
        .await?;

        Ok(contact)
    }

    async fn list_subscribed(&self, project_id: Uuid) -> Result<Vec<Contact>, AppError> {
        let contacts: Vec<Contact> = sqlx::query_as(
            "SELECT * FROM contacts WHERE project_id = $1 AND subscribed = true ORDER BY created_at, id",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(contacts)
    }

    async fn set_subscribed(
        &self,
        project_id: Uuid,
        contact_id: Uuid,
        subscribed: bool,
    ) -> Result<Option<Contact>, AppError> {
        let contact: Option<Contact> = sqlx::query_as(
            r#"
            UPDATE contacts SET subscribed = $3, updated_at = NOW()
            WHERE project_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(project_id)
        .bind(contact_id)
        .bind(subscribed)
        .fetch_optional(&self.pool)
        .await?;

        Ok(contact)
    }
}

impl TaskStore for PgStore {
    async fn bulk_insert(&self, tasks: &[ScheduledTask]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        Self::insert_tasks(&mut tx, tasks).await?;
        tx.commit().await?;

        tracing::debug!(count = tasks.len(), "Scheduled tasks inserted");
        Ok(())
    }

    async fn record_delivery(
        &self,
        project_id: Uuid,
        campaign_id: Uuid,
        tasks: &[ScheduledTask],
        events: &[String],
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        Self::insert_tasks(&mut tx, tasks).await?;

        let ids: Vec<Uuid> = events.iter().map(|_| Uuid::new_v4()).collect();
        sqlx::query(
            r#"
            INSERT INTO events (id, project_id, campaign_id, name)
            SELECT e.id, $2, $3, e.name
            FROM UNNEST($1::uuid[], $4::text[]) AS e(id, name)
            "#,
        )
        .bind(ids)
        .bind(project_id)
        .bind(campaign_id)
        .bind(events.to_vec())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(
            campaign_id = %campaign_id,
            tasks = tasks.len(),
            events = events.len(),
            "Delivery recorded"
        );
        Ok(())
    }
}

impl CampaignStore for PgStore {
    async fn find(&self, campaign_id: Uuid) -> Result<Option<Campaign>, AppError> {
        let campaign: Option<Campaign> = sqlx::query_as("SELECT * FROM campaigns WHERE id = $1")
            .bind(campaign_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(campaign)
    }

    async fn insert(&self, project_id: Uuid, content: &CampaignContent) -> Result<Campaign, AppError> {
        let campaign: Campaign = sqlx::query_as(
            r#"
            INSERT INTO campaigns (id, project_id, subject, body, style, sender_email, sender_name, email_json, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'draft')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(&content.subject)
        .bind(&content.body)
        .bind(content.style.to_string())
        .bind(&content.sender_email)
        .bind(&content.sender_name)
        .bind(&content.email_json)
        .fetch_one(&self.pool)
        .await?;

        Ok(campaign)
    }

    async fn update_content(
        &self,
        campaign_id: Uuid,
        content: &CampaignContent,
    ) -> Result<Campaign, AppError> {
        let campaign: Option<Campaign> = sqlx::query_as(
            r#"
            UPDATE campaigns
            SET subject = $1, body = $2, style = $3, sender_email = $4, sender_name = $5,
                email_json = $6, updated_at = NOW()
            WHERE id = $7
            RETURNING *
            "#,
        )
        .bind(&content.subject)
        .bind(&content.body)
        .bind(content.style.to_string())
        .bind(&content.sender_email)
        .bind(&content.sender_name)
        .bind(&content.email_json)
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;

        campaign.ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", campaign_id)))
    }

    async fn list_by_project(&self, project_id: Uuid) -> Result<Vec<Campaign>, AppError> {
        let campaigns: Vec<Campaign> = sqlx::query_as(
            "SELECT * FROM campaigns WHERE project_id = $1 ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(campaigns)
    }

    async fn delete(&self, campaign_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM campaigns WHERE id = $1")
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn update_status(
        &self,
        campaign_id: Uuid,
        status: CampaignStatus,
        delivered_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE campaigns SET status = $1, delivered_at = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(status.to_string())
        .bind(delivered_at)
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Campaign {} not found", campaign_id)));
        }
        Ok(())
    }

    async fn set_recipients(&self, campaign_id: Uuid, contact_ids: &[Uuid]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM campaign_recipients WHERE campaign_id = $1")
            .bind(campaign_id)
            .execute(&mut *tx)
            .await?;
        Self::append_recipients(&mut tx, campaign_id, contact_ids).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn add_recipients(&self, campaign_id: Uuid, contact_ids: &[Uuid]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        Self::append_recipients(&mut tx, campaign_id, contact_ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn recipients(&self, campaign_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT contact_id FROM campaign_recipients WHERE campaign_id = $1 ORDER BY position",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn recipient_page(
        &self,
        campaign_id: Uuid,
        limit: u32,
        offset: u64,
    ) -> Result<(Vec<Contact>, u64), AppError> {
        let recipients: Vec<Contact> = sqlx::query_as(
            r#"
            SELECT c.*
            FROM contacts c
            JOIN campaign_recipients cr ON cr.contact_id = c.id
            WHERE cr.campaign_id = $1
            ORDER BY c.email ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(campaign_id)
        .bind(i64::from(limit))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM campaign_recipients WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_one(&self.pool)
                .await?;

        Ok((recipients, total.max(0) as u64))
    }
}

impl MemberStore for PgStore {
    async fn member_emails(&self, project_id: Uuid) -> Result<Vec<String>, AppError> {
        let emails: Vec<String> = sqlx::query_scalar(
            "SELECT email FROM project_members WHERE project_id = $1 ORDER BY email",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(emails)
    }
}
