use std::{collections::HashMap, sync::Arc};

use common::storage::types::knowledge_entry::KnowledgeEntry;
use tracing::debug;

use crate::normalize::normalize;

/// Maps every normalized phrasing and keyword to its owning entry.
///
/// Keys shared by two entries resolve to whichever entry was registered last.
#[derive(Debug, Default)]
pub struct ExactIndex {
    keys: HashMap<String, Arc<KnowledgeEntry>>,
    overwritten: usize,
}

impl ExactIndex {
    pub fn build(entries: &[Arc<KnowledgeEntry>]) -> Self {
        let mut index = Self::default();
        for entry in entries {
            for text in entry.phrasings.iter().chain(entry.keywords.iter()) {
                index.register(text, entry);
            }
        }
        index
    }

    fn register(&mut self, text: &str, entry: &Arc<KnowledgeEntry>) {
        let key = normalize(text);
        if key.is_empty() {
            return;
        }
        if let Some(previous) = self.keys.insert(key, Arc::clone(entry)) {
            if previous.id != entry.id {
                debug!(
                    key = text,
                    previous = %previous.id,
                    current = %entry.id,
                    "exact-match key registered by two entries; keeping the later one"
                );
                self.overwritten = self.overwritten.saturating_add(1);
            }
        }
    }

    pub fn lookup(&self, normalized_query: &str) -> Option<&Arc<KnowledgeEntry>> {
        self.keys.get(normalized_query)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of keys that were claimed by a different entry during the build.
    pub fn overwritten(&self) -> usize {
        self.overwritten
    }
}
