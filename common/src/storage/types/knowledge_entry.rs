use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(KnowledgeEntry, "knowledge_entry", {
    category: String,
    #[serde(default)]
    phrasings: Vec<String>,
    answer: String,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    priority: i32,
    #[serde(default)]
    usage_count: u64
});

impl KnowledgeEntry {
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        phrasings: Vec<String>,
        answer: impl Into<String>,
        keywords: Vec<String>,
        priority: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            category: category.into(),
            phrasings,
            answer: answer.into(),
            keywords,
            priority,
            usage_count: 0,
        }
    }

    /// Timestamp of the last edit. Informational only.
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Checks the shape the matcher relies on: a non-empty id, at least one non-blank
    /// phrasing and a non-blank answer.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::Validation(
                "knowledge entry has an empty id".into(),
            ));
        }
        if !self.phrasings.iter().any(|p| !p.trim().is_empty()) {
            return Err(AppError::Validation(format!(
                "knowledge entry '{}' has no phrasings",
                self.id
            )));
        }
        if self.answer.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "knowledge entry '{}' has an empty answer",
                self.id
            )));
        }
        Ok(())
    }

    /// Returns a copy with `answer` replaced, leaving `self` untouched.
    pub fn with_answer(&self, answer: String) -> Self {
        Self {
            answer,
            ..self.clone()
        }
    }

    /// Atomically bumps `usage_count` for the entry with the given id.
    pub async fn increment_usage(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        let updated: Vec<Self> = db
            .client
            .query(
                "UPDATE type::table($table) SET usage_count += 1 \
                 WHERE id = type::thing($table, $id) RETURN AFTER",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .await?
            .take(0)?;

        updated
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("knowledge entry '{id}'")))
    }
}
