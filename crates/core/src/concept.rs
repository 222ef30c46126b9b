//! Concept Content Store
//!
//! The tutor teaches from a fixed collection of programming concepts loaded
//! once at startup from a JSON file. The collection is immutable for the
//! lifetime of the process and is shared read-only between every session.

use fuzzy_matcher::{FuzzyMatcher, skim::SkimMatcherV2};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// A single topic entry in the content collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConceptRecord {
    /// Stable short identifier, unique across the collection (e.g. "loops").
    pub id: String,
    /// Display name.
    pub title: String,
    /// Explanatory text, used verbatim when teaching and as the teach-back reference.
    pub summary: String,
    /// Question used to drive quiz mode.
    pub sample_question: String,
}

/// Failures while loading the content file.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Failed to read content file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse content file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Concept at position {0} has an empty id")]
    EmptyId(usize),
    #[error("Duplicate concept id: '{0}'")]
    DuplicateId(String),
    #[error("Content file contains no concepts")]
    Empty,
}

/// Returned when a lookup names an id that is not in the collection.
///
/// Carries enough context for the calling persona to recover gracefully by
/// offering the user the list of known concepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConceptNotFound {
    pub requested: String,
    pub known: Vec<String>,
    pub suggestion: Option<String>,
}

impl fmt::Display for ConceptNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Concept '{}' not found. Known concepts: {}.",
            self.requested,
            self.known.join(", ")
        )?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " Did you mean '{}'?", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConceptNotFound {}

/// Immutable, id-indexed collection of concepts.
#[derive(Debug, Clone)]
pub struct ConceptStore {
    records: Vec<ConceptRecord>,
    index: HashMap<String, usize>,
}

impl ConceptStore {
    /// Builds a store from records, keeping file order for listings.
    pub fn from_records(records: Vec<ConceptRecord>) -> Result<Self, ContentError> {
        if records.is_empty() {
            return Err(ContentError::Empty);
        }
        let mut index = HashMap::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            if record.id.trim().is_empty() {
                return Err(ContentError::EmptyId(position));
            }
            if index.insert(record.id.clone(), position).is_some() {
                return Err(ContentError::DuplicateId(record.id.clone()));
            }
        }
        Ok(Self { records, index })
    }

    /// Parses a JSON array of concept records.
    pub fn from_json(json: &str) -> Result<Self, ContentError> {
        let records: Vec<ConceptRecord> = serde_json::from_str(json)?;
        Self::from_records(records)
    }

    /// Loads the content file at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ContentError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ContentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_json(&json)?;
        info!(path = %path.display(), concepts = store.len(), "Concept content loaded");
        Ok(store)
    }

    /// Exact-match lookup by id.
    pub fn lookup(&self, id: &str) -> Result<&ConceptRecord, ConceptNotFound> {
        self.index
            .get(id)
            .map(|&position| &self.records[position])
            .ok_or_else(|| ConceptNotFound {
                requested: id.to_string(),
                known: self.ids().map(str::to_string).collect(),
                suggestion: self.closest_id(id),
            })
    }

    /// Ids in file order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.id.as_str())
    }

    pub fn records(&self) -> &[ConceptRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Best fuzzy match of `query` against ids and titles.
    fn closest_id(&self, query: &str) -> Option<String> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        let matcher = SkimMatcherV2::default().ignore_case();
        self.records
            .iter()
            .filter_map(|record| {
                let by_id = matcher.fuzzy_match(&record.id, query);
                let by_title = matcher.fuzzy_match(&record.title, query);
                by_id.max(by_title).map(|score| (score, record))
            })
            .max_by_key(|(score, _)| *score)
            .map(|(_, record)| record.id.clone())
    }
}
