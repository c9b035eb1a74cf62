//! Recipient resolver: turns recipient specifiers into contact ids.
//!
//! - `[All]` expands to every subscribed contact of the project.
//! - `Email` entries are looked up by `(project, email)` and created as
//!   subscribed contacts when absent.
//! - `ContactId` entries must belong to the project.
//!
//! Input is processed in chunks of 500 to bound each bulk operation against the
//! store. Lookups inside a chunk run concurrently; chunks run one after another.
//! Chunking never changes the output: ids come back in input order.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tokio::task::JoinSet;
use uuid::Uuid;

use mailcast_common::error::AppError;
use mailcast_common::types::RecipientSpec;

use crate::store::ContactStore;

/// Upper bound on specifiers handled per bulk round-trip.
pub const RECIPIENT_CHUNK_SIZE: usize = 500;

/// A specifier that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientFailure {
    /// Position of the specifier in the request
    pub index: usize,
    pub recipient: String,
    pub error: String,
}

/// Resolved contact ids plus the entries that were skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub contact_ids: Vec<Uuid>,
    pub failed: Vec<RecipientFailure>,
}

impl Resolution {
    pub(crate) fn append(&mut self, mut other: Resolution) {
        self.contact_ids.append(&mut other.contact_ids);
        self.failed.append(&mut other.failed);
    }

    pub fn is_empty(&self) -> bool {
        self.contact_ids.is_empty()
    }
}

/// Outcome for a single specifier. Store errors are not entry outcomes; they
/// abort the whole resolution.
enum Entry {
    Resolved(Uuid),
    Rejected(String),
}

/// Resolves recipient specifiers against a contact store.
#[derive(Debug, Clone)]
pub struct RecipientResolver<C> {
    contacts: C,
    chunk_size: usize,
}

impl<C: ContactStore> RecipientResolver<C> {
    pub fn new(contacts: C) -> Self {
        Self {
            contacts,
            chunk_size: RECIPIENT_CHUNK_SIZE,
        }
    }

    /// Override the chunk size (must be at least 1).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Expand the `[All]` sentinel.
    ///
    /// Returns `Ok(None)` when the list is not the sentinel form, and a
    /// validation error when `All` is mixed with other entries.
    pub async fn expand_all(
        &self,
        project_id: Uuid,
        specs: &[RecipientSpec],
    ) -> Result<Option<Vec<Uuid>>, AppError> {
        if !specs.contains(&RecipientSpec::All) {
            return Ok(None);
        }
        if specs.len() != 1 {
            return Err(AppError::Validation(
                "\"all\" must be the only recipient when present".to_string(),
            ));
        }

        let contacts = self.contacts.list_subscribed(project_id).await?;
        tracing::debug!(
            project_id = %project_id,
            count = contacts.len(),
            "Expanded subscribed contacts"
        );
        Ok(Some(contacts.into_iter().map(|c| c.id).collect()))
    }

    /// Resolve a full specifier list, one chunk at a time.
    pub async fn resolve(
        &self,
        project_id: Uuid,
        specs: &[RecipientSpec],
    ) -> Result<Resolution, AppError> {
        if let Some(contact_ids) = self.expand_all(project_id, specs).await? {
            return Ok(Resolution {
                contact_ids,
                failed: Vec::new(),
            });
        }

        let mut resolution = Resolution::default();
        for (n, chunk) in specs.chunks(self.chunk_size).enumerate() {
            let part = self
                .resolve_chunk(project_id, chunk, n * self.chunk_size)
                .await?;
            resolution.append(part);
        }

        Ok(resolution)
    }

    /// Resolve one chunk concurrently. `offset` is the index of the chunk's
    /// first entry in the original request, used for failure reporting.
    ///
    /// The chunk must not contain `All`; use [`Self::expand_all`] first.
    pub async fn resolve_chunk(
        &self,
        project_id: Uuid,
        chunk: &[RecipientSpec],
        offset: usize,
    ) -> Result<Resolution, AppError> {
        let mut lookups = JoinSet::new();

        for (i, spec) in chunk.iter().cloned().enumerate() {
            let contacts = self.contacts.clone();
            lookups.spawn(async move {
                let entry = resolve_entry(&contacts, project_id, &spec).await;
                (offset + i, spec, entry)
            });
        }

        let mut outcomes = Vec::with_capacity(chunk.len());
        while let Some(joined) = lookups.join_next().await {
            let (index, spec, entry) = joined
                .map_err(|e| AppError::Internal(format!("Recipient lookup task failed: {}", e)))?;
            outcomes.push((index, spec, entry?));
        }
        outcomes.sort_by_key(|(index, _, _)| *index);

        let mut resolution = Resolution::default();
        for (index, spec, entry) in outcomes {
            match entry {
                Entry::Resolved(id) => resolution.contact_ids.push(id),
                Entry::Rejected(error) => resolution.failed.push(RecipientFailure {
                    index,
                    recipient: spec.to_string(),
                    error,
                }),
            }
        }

        tracing::debug!(
            project_id = %project_id,
            offset,
            resolved = resolution.contact_ids.len(),
            failed = resolution.failed.len(),
            "Resolved recipient chunk"
        );

        Ok(resolution)
    }
}

async fn resolve_entry<C: ContactStore>(
    contacts: &C,
    project_id: Uuid,
    spec: &RecipientSpec,
) -> Result<Entry, AppError> {
    match spec {
        RecipientSpec::Email(raw) => {
            let email = raw.trim();
            if !is_valid_email(email) {
                return Ok(Entry::Rejected("Invalid email format".to_string()));
            }

            if let Some(contact) = contacts.find_by_email(project_id, email).await? {
                return Ok(Entry::Resolved(contact.id));
            }

            let contact = contacts.create(project_id, email, true).await?;
            tracing::info!(
                project_id = %project_id,
                contact_id = %contact.id,
                "Contact created from campaign recipient"
            );
            Ok(Entry::Resolved(contact.id))
        }
        RecipientSpec::ContactId(id) => match contacts.find_by_id(project_id, *id).await? {
            Some(contact) => Ok(Entry::Resolved(contact.id)),
            None => Ok(Entry::Rejected("Contact not found".to_string())),
        },
        RecipientSpec::All => Ok(Entry::Rejected(
            "\"all\" must be the only recipient when present".to_string(),
        )),
    }
}

/// Dot-atom local part, dot-separated hostname labels and an alphabetic
/// top-level label of at least two characters.
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[A-Za-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?\.)+[A-Za-z]{2,}$",
    )
    .expect("valid email pattern")
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn email(s: &str) -> RecipientSpec {
        RecipientSpec::Email(s.to_string())
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last+tag@mail.example.org"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("a@x.c"));
        assert!(!is_valid_email("a@@x.com"));
        assert!(!is_valid_email("a b@x.com"));
        assert!(!is_valid_email("a@-x.com"));
        assert!(is_valid_email("o'brien@x.com"));
        assert!(is_valid_email("a_b@sub-domain.x.io"));
        assert!(!is_valid_email("a..b@x.com"));
        assert!(!is_valid_email(".a@x.com"));
        assert!(!is_valid_email("a.@x.com"));
        assert!(!is_valid_email("a@x..com"));
        assert!(!is_valid_email("a@x.c0m"));
    }

    #[tokio::test]
    async fn test_new_emails_create_one_subscribed_contact_each() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let resolver = RecipientResolver::new(store.clone());

        let resolution = resolver
            .resolve(project, &[email("a@x.com"), email("b@x.com")])
            .await
            .unwrap();

        assert_eq!(resolution.contact_ids.len(), 2);
        assert!(resolution.failed.is_empty());

        let contacts = store.contacts(project);
        assert_eq!(contacts.len(), 2);
        assert!(contacts.iter().all(|c| c.subscribed && c.project_id == project));
    }

    #[tokio::test]
    async fn test_existing_email_reuses_contact() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let existing = store.insert_contact(project, "a@x.com", false);

        let resolution = RecipientResolver::new(store.clone())
            .resolve(project, &[email("a@x.com")])
            .await
            .unwrap();

        assert_eq!(resolution.contact_ids, vec![existing.id]);
        assert_eq!(store.contacts(project).len(), 1);
        // Existing subscription state is left alone.
        assert!(!store.contacts(project)[0].subscribed);
    }

    #[tokio::test]
    async fn test_same_email_in_other_project_is_separate_contact() {
        let store = MemoryStore::new();
        let other = Uuid::new_v4();
        let project = Uuid::new_v4();
        let foreign = store.insert_contact(other, "a@x.com", true);

        let resolution = RecipientResolver::new(store.clone())
            .resolve(project, &[email("a@x.com")])
            .await
            .unwrap();

        assert_ne!(resolution.contact_ids[0], foreign.id);
        assert_eq!(store.contacts(project).len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_email_resolves_to_same_contact_twice() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();

        let resolution = RecipientResolver::new(store.clone())
            .resolve(project, &[email("a@x.com"), email("a@x.com")])
            .await
            .unwrap();

        // No dedup: the same contact appears once per specifier.
        assert_eq!(resolution.contact_ids.len(), 2);
        assert_eq!(resolution.contact_ids[0], resolution.contact_ids[1]);
        assert_eq!(store.contacts(project).len(), 1);
    }

    #[tokio::test]
    async fn test_all_expands_to_subscribed_contacts_only() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let a = store.insert_contact(project, "a@x.com", true);
        let b = store.insert_contact(project, "b@x.com", true);
        store.insert_contact(project, "c@x.com", false);
        store.insert_contact(Uuid::new_v4(), "d@x.com", true);

        let resolver = RecipientResolver::new(store.clone());
        let first = resolver.resolve(project, &[RecipientSpec::All]).await.unwrap();
        let second = resolver.resolve(project, &[RecipientSpec::All]).await.unwrap();

        let mut ids = first.contact_ids.clone();
        ids.sort();
        let mut expected = vec![a.id, b.id];
        expected.sort();
        assert_eq!(ids, expected);

        let mut again = second.contact_ids;
        again.sort();
        assert_eq!(again, expected);
    }

    #[tokio::test]
    async fn test_all_with_no_subscribed_contacts_is_empty() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        store.insert_contact(project, "gone@x.com", false);

        let resolution = RecipientResolver::new(store)
            .resolve(project, &[RecipientSpec::All])
            .await
            .unwrap();

        assert!(resolution.is_empty());
    }

    #[tokio::test]
    async fn test_all_mixed_with_other_entries_is_rejected() {
        let store = MemoryStore::new();
        let result = RecipientResolver::new(store)
            .resolve(Uuid::new_v4(), &[RecipientSpec::All, email("a@x.com")])
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_invalid_entries_are_collected_not_fatal() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let known = store.insert_contact(project, "known@x.com", true);
        let foreign = store.insert_contact(Uuid::new_v4(), "f@x.com", true);
        let missing = Uuid::new_v4();

        let resolution = RecipientResolver::new(store.clone())
            .resolve(
                project,
                &[
                    email("not-an-email"),
                    RecipientSpec::ContactId(known.id),
                    RecipientSpec::ContactId(missing),
                    RecipientSpec::ContactId(foreign.id),
                    email("ok@x.com"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(resolution.contact_ids.len(), 2);
        assert_eq!(resolution.contact_ids[0], known.id);

        let failed_indexes: Vec<usize> = resolution.failed.iter().map(|f| f.index).collect();
        assert_eq!(failed_indexes, vec![0, 2, 3]);
        assert_eq!(resolution.failed[0].error, "Invalid email format");
        assert_eq!(resolution.failed[1].recipient, missing.to_string());
        assert_eq!(resolution.failed[1].error, "Contact not found");
    }

    #[tokio::test]
    async fn test_chunk_size_does_not_change_output() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let specs: Vec<RecipientSpec> = (0..23)
            .map(|i| {
                if i == 7 {
                    email("broken")
                } else {
                    email(&format!("user{}@x.com", i))
                }
            })
            .collect();

        let whole = RecipientResolver::new(store.clone())
            .resolve(project, &specs)
            .await
            .unwrap();
        let chunked = RecipientResolver::new(store.clone())
            .with_chunk_size(4)
            .resolve(project, &specs)
            .await
            .unwrap();

        assert_eq!(whole, chunked);
        assert_eq!(whole.contact_ids.len(), 22);
        assert_eq!(whole.failed[0].index, 7);
        assert_eq!(store.contacts(project).len(), 22);
    }

    #[tokio::test]
    async fn test_output_follows_input_order() {
        let store = MemoryStore::new();
        let project = Uuid::new_v4();
        let contacts: Vec<_> = (0..50)
            .map(|i| store.insert_contact(project, &format!("c{}@x.com", i), true))
            .collect();

        let specs: Vec<RecipientSpec> = contacts
            .iter()
            .rev()
            .map(|c| RecipientSpec::ContactId(c.id))
            .collect();

        let resolution = RecipientResolver::new(store)
            .with_chunk_size(8)
            .resolve(project, &specs)
            .await
            .unwrap();

        let expected: Vec<Uuid> = contacts.iter().rev().map(|c| c.id).collect();
        assert_eq!(resolution.contact_ids, expected);
    }
}
