use serde::{Deserialize, Serialize};
use tracing::debug;

use seekcore_index::{file_name_from_path, RecordStore};

mod fuzz;
mod normalize;

pub use fuzz::{partial_ratio, MAX_SCORE};
pub use normalize::normalize;
pub use seekcore_index::{IndexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit: usize,
    /// Hits scoring at or below this are dropped.
    pub score_threshold: u32,
    /// Rows requested from the substring prefilter, independent of `limit`.
    pub candidate_cap: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            score_threshold: 50,
            candidate_cap: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub generation: u64,
    pub query: String,
    pub options: SearchOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedHit {
    pub path: String,
    pub score: u32,
}

pub trait QueryEngine {
    fn search(&self, request: &SearchRequest) -> Result<Vec<RankedHit>>;
}

/// Prefilter-then-score engine over an owned store handle.
pub struct FuzzyEngine<S> {
    store: S,
}

impl<S: RecordStore> FuzzyEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: RecordStore> QueryEngine for FuzzyEngine<S> {
    fn search(&self, request: &SearchRequest) -> Result<Vec<RankedHit>> {
        search(&request.query, &self.store, &request.options)
    }
}

/// Lowercased whitespace-separated tokens. Diacritics are kept so they line up with the
/// raw names the prefilter compares against.
pub fn tokenize(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Mean partial ratio of every token against the normalized file name, truncated.
pub fn score_name(tokens: &[String], name: &str) -> u32 {
    if tokens.is_empty() {
        return 0;
    }
    let name = normalize(name);
    let total: u32 = tokens.iter().map(|t| partial_ratio(t, &name)).sum();
    total / tokens.len() as u32
}

/// Ranks files whose names contain every query token. Blank queries return nothing
/// without touching the store.
pub fn search<S>(query: &str, store: &S, options: &SearchOptions) -> Result<Vec<RankedHit>>
where
    S: RecordStore + ?Sized,
{
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let tokens = tokenize(query);
    let candidates = store.find_by_substrings(&tokens, options.candidate_cap)?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    let candidate_count = candidates.len();

    let mut hits: Vec<RankedHit> = candidates
        .into_iter()
        .map(|path| {
            let score = score_name(&tokens, file_name_from_path(&path));
            RankedHit { path, score }
        })
        .collect();

    hits.sort_by(|a, b| b.score.cmp(&a.score));
    hits.retain(|hit| hit.score > options.score_threshold);
    hits.truncate(options.limit);

    debug!(
        query,
        candidates = candidate_count,
        hits = hits.len(),
        "search finished"
    );
    Ok(hits)
}

pub fn paths(hits: &[RankedHit]) -> Vec<&str> {
    hits.iter().map(|hit| hit.path.as_str()).collect()
}
