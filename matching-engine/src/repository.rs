use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::knowledge_entry::KnowledgeEntry},
};
use tokio::sync::RwLock;
use tracing::{info, warn};

const SEED_ENTRIES: &str = include_str!("../seed/knowledge_entries.json");

/// The two things the matcher needs from wherever entries live.
#[async_trait]
pub trait EntryRepository: Send + Sync {
    async fn load_all(&self) -> Result<Vec<KnowledgeEntry>, AppError>;
    async fn increment_usage(&self, entry_id: &str) -> Result<(), AppError>;
}

/// Entries stored in the `knowledge_entry` table.
pub struct SurrealEntryRepository {
    db: Arc<SurrealDbClient>,
}

impl SurrealEntryRepository {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EntryRepository for SurrealEntryRepository {
    async fn load_all(&self) -> Result<Vec<KnowledgeEntry>, AppError> {
        Ok(self.db.get_all_stored_items::<KnowledgeEntry>().await?)
    }

    async fn increment_usage(&self, entry_id: &str) -> Result<(), AppError> {
        KnowledgeEntry::increment_usage(entry_id, &self.db).await?;
        Ok(())
    }
}

/// Entries held in memory. Backs the bundled seed set and embedders without a database.
#[derive(Default)]
pub struct StaticEntryRepository {
    entries: RwLock<Vec<KnowledgeEntry>>,
}

impl StaticEntryRepository {
    pub fn new(entries: Vec<KnowledgeEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Repository preloaded with the bundled seed set.
    pub fn seeded() -> Result<Self, AppError> {
        Ok(Self::new(seed_entries()?))
    }

    /// Adds or replaces an entry. Loaded matchers only see it after a reload.
    pub async fn upsert(&self, entry: KnowledgeEntry) {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|existing| existing.id == entry.id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    pub async fn usage_count(&self, entry_id: &str) -> Option<u64> {
        self.entries
            .read()
            .await
            .iter()
            .find(|entry| entry.id == entry_id)
            .map(|entry| entry.usage_count)
    }
}

#[async_trait]
impl EntryRepository for StaticEntryRepository {
    async fn load_all(&self) -> Result<Vec<KnowledgeEntry>, AppError> {
        Ok(self.entries.read().await.clone())
    }

    async fn increment_usage(&self, entry_id: &str) -> Result<(), AppError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|entry| entry.id == entry_id)
            .ok_or_else(|| AppError::NotFound(format!("knowledge entry '{entry_id}'")))?;
        entry.usage_count = entry.usage_count.saturating_add(1);
        Ok(())
    }
}

/// The entry set compiled into the binary.
pub fn seed_entries() -> Result<Vec<KnowledgeEntry>, AppError> {
    Ok(serde_json::from_str(SEED_ENTRIES)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
    Repository,
    Fallback,
}

#[derive(Debug)]
pub struct LoadedEntries {
    pub entries: Vec<KnowledgeEntry>,
    pub source: EntrySource,
    pub skipped: usize,
}

/// Fetches entries from a repository, falling back to a fixed set when the repository
/// fails or is empty, and drops entries the matcher cannot index.
pub struct EntryLoader {
    repository: Arc<dyn EntryRepository>,
    fallback: Option<Vec<KnowledgeEntry>>,
}

impl EntryLoader {
    pub fn new(repository: Arc<dyn EntryRepository>, fallback: Option<Vec<KnowledgeEntry>>) -> Self {
        Self {
            repository,
            fallback,
        }
    }

    pub fn repository(&self) -> &Arc<dyn EntryRepository> {
        &self.repository
    }

    pub async fn load(&self) -> Result<LoadedEntries, AppError> {
        let (raw, source) = match self.repository.load_all().await {
            Ok(entries) if !entries.is_empty() => (entries, EntrySource::Repository),
            Ok(_) => {
                warn!("Knowledge repository returned no entries; serving fallback set");
                (self.fallback_entries()?, EntrySource::Fallback)
            }
            Err(err) => {
                warn!(error = %err, "Knowledge repository unavailable; serving fallback set");
                (self.fallback_entries()?, EntrySource::Fallback)
            }
        };

        let (entries, skipped) = validate_entries(raw);
        if entries.is_empty() {
            return Err(AppError::Unavailable(
                "no valid knowledge entries after validation".into(),
            ));
        }

        info!(
            count = entries.len(),
            skipped,
            source = ?source,
            "Loaded knowledge entries"
        );

        Ok(LoadedEntries {
            entries,
            source,
            skipped,
        })
    }

    fn fallback_entries(&self) -> Result<Vec<KnowledgeEntry>, AppError> {
        match &self.fallback {
            Some(entries) if !entries.is_empty() => Ok(entries.clone()),
            _ => Err(AppError::Unavailable(
                "knowledge repository unreachable and no fallback entries configured".into(),
            )),
        }
    }
}

/// Drops invalid entries and collapses repeated ids, the later record winning in the
/// position of the first.
fn validate_entries(raw: Vec<KnowledgeEntry>) -> (Vec<KnowledgeEntry>, usize) {
    let mut skipped = 0_usize;
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(raw.len());
    let mut entries: Vec<KnowledgeEntry> = Vec::with_capacity(raw.len());

    for entry in raw {
        if let Err(err) = entry.validate() {
            warn!(entry_id = %entry.id, error = %err, "Skipping malformed knowledge entry");
            skipped = skipped.saturating_add(1);
            continue;
        }
        match positions.get(&entry.id) {
            Some(&position) => {
                warn!(entry_id = %entry.id, "Duplicate knowledge entry id; keeping the later record");
                if let Some(slot) = entries.get_mut(position) {
                    *slot = entry;
                }
            }
            None => {
                positions.insert(entry.id.clone(), entries.len());
                entries.push(entry);
            }
        }
    }

    (entries, skipped)
}
