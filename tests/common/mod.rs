//! Helpers for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use hscode_crawlers::crawlers::{CrawlerError, CrawlerResult, HsCodeSource};
use hscode_crawlers::domain::hs_code::{Candidate, QueryResult};
use hscode_crawlers::processing::embedding::Embedder;
use hscode_crawlers::processing::keywords::{KeywordGenerator, WhitespaceTokenizer};
use hscode_crawlers::processing::orchestrator::{OrchestratorOptions, QueryOrchestrator};
use hscode_crawlers::processing::similarity::{FuzzyScorer, SimilarityScorer};

#[derive(Default)]
struct SourceState {
    searches: HashMap<String, Vec<Candidate>>,
    failing_searches: HashSet<String>,
    details: HashMap<String, QueryResult>,
    codes: HashMap<String, QueryResult>,
    events: Vec<String>,
}

/// In-memory catalog recording every call it receives.
pub struct FakeSource {
    name: String,
    state: Mutex<SourceState>,
}

impl FakeSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(SourceState::default()),
        }
    }

    /// Search results for `keyword`; each entry is `(name, reference)`.
    pub fn with_search(self, keyword: &str, entries: &[(&str, &str)]) -> Self {
        let candidates = entries
            .iter()
            .map(|(name, reference)| Candidate {
                name: name.to_string(),
                reference: reference.to_string(),
                hs_code: String::new(),
            })
            .collect();
        self.state
            .lock()
            .expect("state mutex poisoned")
            .searches
            .insert(keyword.to_string(), candidates);
        self
    }

    pub fn with_failing_search(self, keyword: &str) -> Self {
        self.state
            .lock()
            .expect("state mutex poisoned")
            .failing_searches
            .insert(keyword.to_string());
        self
    }

    /// Detail returned for `reference`. References without a detail fail.
    pub fn with_detail(self, reference: &str, detail: QueryResult) -> Self {
        self.state
            .lock()
            .expect("state mutex poisoned")
            .details
            .insert(reference.to_string(), detail);
        self
    }

    pub fn with_code(self, code: &str, detail: QueryResult) -> Self {
        self.state
            .lock()
            .expect("state mutex poisoned")
            .codes
            .insert(code.to_string(), detail);
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().expect("state mutex poisoned").events.clone()
    }

    fn mark(&self, event: String) {
        self.state
            .lock()
            .expect("state mutex poisoned")
            .events
            .push(event);
    }
}

#[async_trait]
impl HsCodeSource for FakeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, keyword: &str) -> CrawlerResult<Vec<Candidate>> {
        self.mark(format!("search:{keyword}"));
        let state = self.state.lock().expect("state mutex poisoned");
        if state.failing_searches.contains(keyword) {
            return Err(CrawlerError::Parse(format!("search {keyword} failed")));
        }
        Ok(state.searches.get(keyword).cloned().unwrap_or_default())
    }

    async fn fetch_detail(&self, reference: &str) -> CrawlerResult<QueryResult> {
        self.mark(format!("detail:{reference}"));
        let state = self.state.lock().expect("state mutex poisoned");
        state
            .details
            .get(reference)
            .cloned()
            .ok_or_else(|| CrawlerError::Parse(format!("no detail for {reference}")))
    }

    async fn fetch_by_code(&self, code: &str) -> CrawlerResult<QueryResult> {
        self.mark(format!("code:{code}"));
        let state = self.state.lock().expect("state mutex poisoned");
        state
            .codes
            .get(code)
            .cloned()
            .ok_or_else(|| CrawlerError::Parse(format!("no record for {code}")))
    }
}

/// Successful detail record.
pub fn record(code: &str, name: &str) -> QueryResult {
    QueryResult {
        hs_code: code.to_string(),
        product_name: name.to_string(),
        description: name.to_string(),
        first_unit: "千克".to_string(),
        second_unit: "无".to_string(),
        search_success: true,
        ..Default::default()
    }
}

/// Detail record of a code that is no longer in force.
pub fn withdrawn(code: &str, name: &str) -> QueryResult {
    QueryResult {
        search_success: false,
        error_message: "该编码已作废".to_string(),
        ..record(code, name)
    }
}

pub fn options() -> OrchestratorOptions {
    OrchestratorOptions {
        max_search_attempts: 5,
        min_similarity_score: 0.5,
        batch_delay: Duration::ZERO,
    }
}

/// Orchestrator splitting queries on whitespace.
pub fn orchestrator_with(
    source: Arc<FakeSource>,
    scorer: Arc<dyn SimilarityScorer>,
) -> QueryOrchestrator {
    QueryOrchestrator::new(
        source,
        scorer,
        KeywordGenerator::new(Box::new(WhitespaceTokenizer)),
        options(),
    )
}

pub fn orchestrator(source: Arc<FakeSource>) -> QueryOrchestrator {
    orchestrator_with(source, Arc::new(FuzzyScorer))
}

/// Embedder answering from a fixed table; unknown texts map to an axis of
/// their own.
pub struct TableEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    pub fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            vectors: entries
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.clone()))
                .collect(),
        }
    }
}

impl Embedder for TableEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
        Ok(texts
            .iter()
            .map(|text| {
                self.vectors
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0, 0.0, 0.0, 1.0])
            })
            .collect())
    }
}
