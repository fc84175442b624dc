use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// How duplicate nominations of the same entry are collapsed when strategies are merged.
#[derive(Clone, Copy, Deserialize, Serialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Keep whichever candidate was merged first (keyword list before fuzzy list).
    #[default]
    FirstEncountered,
    /// Keep the candidate with the largest confidence, at the position of the first one.
    HighestConfidence,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_match_max_results")]
    pub match_max_results: usize,
    #[serde(default = "default_match_min_confidence")]
    pub match_min_confidence: f32,
    #[serde(default)]
    pub support_contact: Option<String>,
    #[serde(default = "default_seed_fallback_enabled")]
    pub seed_fallback_enabled: bool,
    #[serde(default)]
    pub match_dedup_policy: DedupPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "kb".to_string(),
            surrealdb_database: "kb".to_string(),
            match_max_results: default_match_max_results(),
            match_min_confidence: default_match_min_confidence(),
            support_contact: None,
            seed_fallback_enabled: default_seed_fallback_enabled(),
            match_dedup_policy: DedupPolicy::default(),
        }
    }
}

const fn default_match_max_results() -> usize {
    5
}

const fn default_match_min_confidence() -> f32 {
    0.3
}

const fn default_seed_fallback_enabled() -> bool {
    true
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
