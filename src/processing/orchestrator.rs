//! Per-query state machine turning a product name into one HS code record.
//!
//! Keywords are tried in order. For each keyword the search results are
//! ranked against the original query and only those at or above the
//! similarity threshold are kept. Details are fetched best first; a failed
//! fetch, an empty record or a withdrawn code moves on to the next
//! candidate, and a keyword without usable candidates moves on to the next
//! keyword. Nothing here returns an error to the caller: every failure
//! becomes a [`QueryResult`] with `search_success == false`.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::crawlers::{CrawlerResult, HsCodeSource, normalize_hs_code};
use crate::domain::hs_code::{Candidate, QueryResult};
use crate::models::config::AppConfig;
use crate::processing::keywords::KeywordGenerator;
use crate::processing::similarity::{SimilarityScorer, rank_all};

/// Longest accepted product name, in characters.
pub const MAX_QUERY_CHARS: usize = 100;
/// Largest accepted batch.
pub const MAX_BATCH_SIZE: usize = 50;
/// Longest accepted HS code, in characters, before separators are removed.
pub const MAX_CODE_CHARS: usize = 20;
/// Text found on detail pages of codes that are no longer in force.
pub const WITHDRAWN_MARKERS: [&str; 2] = ["已作废", "过期"];

/// Reasons a query ends without a usable record.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("输入无效: {0}")]
    InvalidInput(String),
    #[error("未找到匹配结果，已尝试关键词: {}", keywords.join(", "))]
    NotFound { keywords: Vec<String> },
    #[error("primary({primary}): {primary_error}; fallback({fallback}): {fallback_error}")]
    SourceUnavailable {
        primary: String,
        primary_error: String,
        fallback: String,
        fallback_error: String,
    },
}

/// Validates a product name and returns it trimmed.
pub fn validate_query(query: &str) -> Result<&str, QueryError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(QueryError::InvalidInput("商品名称不能为空".into()));
    }
    if trimmed.chars().count() > MAX_QUERY_CHARS {
        return Err(QueryError::InvalidInput(format!(
            "商品名称不能超过{MAX_QUERY_CHARS}个字符"
        )));
    }
    Ok(trimmed)
}

/// Validates an HS code and strips the separators users tend to type.
pub fn validate_code(code: &str) -> Result<String, QueryError> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(QueryError::InvalidInput("HS编码不能为空".into()));
    }
    if trimmed.chars().count() > MAX_CODE_CHARS {
        return Err(QueryError::InvalidInput(format!(
            "HS编码不能超过{MAX_CODE_CHARS}个字符"
        )));
    }
    Ok(normalize_hs_code(trimmed))
}

/// Validates the size of a batch. An empty batch is valid and yields nothing.
pub fn validate_batch<S: AsRef<str>>(names: &[S]) -> Result<(), QueryError> {
    if names.len() > MAX_BATCH_SIZE {
        return Err(QueryError::InvalidInput(format!(
            "批量查询最多{MAX_BATCH_SIZE}个商品，收到{}个",
            names.len()
        )));
    }
    Ok(())
}

/// Failure result for a named query.
pub(crate) fn failed_name_query(query: &str, error: &QueryError) -> QueryResult {
    QueryResult {
        query_product_name: Some(query.to_string()),
        ..QueryResult::failure(error.to_string())
    }
}

/// Tunables of one orchestrator.
#[derive(Clone, Debug)]
pub struct OrchestratorOptions {
    pub max_search_attempts: usize,
    pub min_similarity_score: f32,
    /// Pause between consecutive items of a batch.
    pub batch_delay: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_search_attempts: crate::MAX_SEARCH_ATTEMPTS,
            min_similarity_score: crate::MIN_SIMILARITY_SCORE,
            batch_delay: Duration::from_secs(2),
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_search_attempts: config.max_search_attempts,
            min_similarity_score: config.min_similarity_score,
            batch_delay: config.batch_delay(),
        }
    }
}

enum QueryState {
    GeneratingKeywords,
    TryingKeyword {
        keyword: usize,
    },
    ScoringCandidates {
        keyword: usize,
        candidates: Vec<Candidate>,
    },
    FetchingDetail {
        keyword: usize,
        ranked: Vec<Candidate>,
        position: usize,
    },
    Validating {
        keyword: usize,
        ranked: Vec<Candidate>,
        position: usize,
        detail: CrawlerResult<QueryResult>,
    },
    NextCandidate {
        keyword: usize,
        ranked: Vec<Candidate>,
        position: usize,
    },
    NextKeyword {
        keyword: usize,
    },
    Success(QueryResult),
    Exhausted,
}

/// Runs name and code lookups against one [`HsCodeSource`].
pub struct QueryOrchestrator {
    source: Arc<dyn HsCodeSource>,
    scorer: Arc<dyn SimilarityScorer>,
    keywords: KeywordGenerator,
    options: OrchestratorOptions,
}

impl QueryOrchestrator {
    pub fn new(
        source: Arc<dyn HsCodeSource>,
        scorer: Arc<dyn SimilarityScorer>,
        keywords: KeywordGenerator,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            source,
            scorer,
            keywords,
            options,
        }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Looks up the HS code of a product by its name.
    pub async fn query_by_name(&self, name: &str) -> QueryResult {
        match validate_query(name) {
            Ok(query) => self.run(query).await,
            Err(e) => {
                log::warn!("Rejected query '{name}': {e}");
                failed_name_query(name, &e)
            }
        }
    }

    /// Fetches the record of a known HS code without searching.
    pub async fn query_by_code(&self, code: &str) -> QueryResult {
        let code = match validate_code(code) {
            Ok(code) => code,
            Err(e) => {
                log::warn!("Rejected code '{code}': {e}");
                return QueryResult::failure(e.to_string());
            }
        };

        log::info!("Looking up code {code} on {}", self.source.name());
        let mut result = match self.source.fetch_by_code(&code).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Failed to fetch code {code} from {}: {e}", self.source.name());
                return QueryResult::failure(e.to_string());
            }
        };

        if !result.has_identity() {
            return QueryResult::failure(format!("未找到HS编码 {code} 的详细信息"));
        }
        if result.contains_marker(&WITHDRAWN_MARKERS) {
            result.search_success = false;
            if result.error_message.is_empty() {
                result.error_message = format!("HS编码 {code} 已作废或过期");
            }
            return result;
        }
        result.search_success = true;
        result
    }

    /// Queries every name in order, one result per name.
    pub async fn batch_query<S: AsRef<str>>(&self, names: &[S]) -> Vec<QueryResult> {
        if let Err(e) = validate_batch(names) {
            log::warn!("Rejected batch: {e}");
            return names
                .iter()
                .map(|name| failed_name_query(name.as_ref(), &e))
                .collect();
        }

        let total = names.len();
        let mut results = Vec::with_capacity(total);
        for (i, name) in names.iter().enumerate() {
            log::info!("[{}/{total}] Querying '{}'", i + 1, name.as_ref());
            results.push(self.query_by_name(name.as_ref()).await);
            if i + 1 < total && !self.options.batch_delay.is_zero() {
                tokio::time::sleep(self.options.batch_delay).await;
            }
        }
        results
    }

    /// Candidates at or above the threshold, best first.
    fn rank(&self, query: &str, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let min_score = self.options.min_similarity_score;
        rank_all(self.scorer.as_ref(), query, candidates)
            .into_iter()
            .filter_map(|(candidate, score)| {
                log::debug!("Candidate '{}' scored {score:.2}", candidate.name);
                (score >= min_score).then_some(candidate)
            })
            .collect()
    }

    async fn run(&self, query: &str) -> QueryResult {
        let mut keywords: Vec<String> = Vec::new();
        let mut state = QueryState::GeneratingKeywords;

        loop {
            state = match state {
                QueryState::GeneratingKeywords => {
                    keywords = self
                        .keywords
                        .generate(query, self.options.max_search_attempts);
                    if keywords.is_empty() {
                        QueryState::Exhausted
                    } else {
                        QueryState::TryingKeyword { keyword: 0 }
                    }
                }
                QueryState::TryingKeyword { keyword } => {
                    let term = &keywords[keyword];
                    log::info!(
                        "Searching {} for '{term}' (attempt {}/{})",
                        self.source.name(),
                        keyword + 1,
                        keywords.len()
                    );
                    match self.source.search(term).await {
                        Ok(candidates) if !candidates.is_empty() => {
                            QueryState::ScoringCandidates {
                                keyword,
                                candidates,
                            }
                        }
                        Ok(_) => {
                            log::info!("No results for '{term}'");
                            QueryState::NextKeyword { keyword }
                        }
                        Err(e) => {
                            log::warn!("Search for '{term}' failed: {e}");
                            QueryState::NextKeyword { keyword }
                        }
                    }
                }
                QueryState::ScoringCandidates {
                    keyword,
                    candidates,
                } => {
                    let ranked = self.rank(query, candidates);
                    if ranked.is_empty() {
                        log::info!(
                            "No candidate for '{}' reached {:.2}",
                            keywords[keyword],
                            self.options.min_similarity_score
                        );
                        QueryState::NextKeyword { keyword }
                    } else {
                        QueryState::FetchingDetail {
                            keyword,
                            ranked,
                            position: 0,
                        }
                    }
                }
                QueryState::FetchingDetail {
                    keyword,
                    ranked,
                    position,
                } => {
                    let detail = self.source.fetch_detail(&ranked[position].reference).await;
                    QueryState::Validating {
                        keyword,
                        ranked,
                        position,
                        detail,
                    }
                }
                QueryState::Validating {
                    keyword,
                    ranked,
                    position,
                    detail,
                } => {
                    let candidate = &ranked[position];
                    match detail {
                        Err(e) => {
                            log::warn!("Detail for '{}' failed: {e}", candidate.name);
                            QueryState::NextCandidate {
                                keyword,
                                ranked,
                                position,
                            }
                        }
                        Ok(record) if !record.has_identity() => {
                            log::warn!("Detail for '{}' is empty", candidate.name);
                            QueryState::NextCandidate {
                                keyword,
                                ranked,
                                position,
                            }
                        }
                        Ok(record) if record.contains_marker(&WITHDRAWN_MARKERS) => {
                            log::info!("Code {} is withdrawn, trying next", record.hs_code);
                            QueryState::NextCandidate {
                                keyword,
                                ranked,
                                position,
                            }
                        }
                        Ok(record) => QueryState::Success(record),
                    }
                }
                QueryState::NextCandidate {
                    keyword,
                    ranked,
                    position,
                } => {
                    if position + 1 < ranked.len() {
                        QueryState::FetchingDetail {
                            keyword,
                            ranked,
                            position: position + 1,
                        }
                    } else {
                        QueryState::NextKeyword { keyword }
                    }
                }
                QueryState::NextKeyword { keyword } => {
                    if keyword + 1 < keywords.len() {
                        QueryState::TryingKeyword {
                            keyword: keyword + 1,
                        }
                    } else {
                        QueryState::Exhausted
                    }
                }
                QueryState::Success(mut result) => {
                    log::info!("Matched '{query}' to {}", result.hs_code);
                    result.query_product_name = Some(query.to_string());
                    result.search_success = true;
                    return result;
                }
                QueryState::Exhausted => {
                    let error = QueryError::NotFound { keywords };
                    log::info!("{error}");
                    return failed_name_query(query, &error);
                }
            };
        }
    }
}
