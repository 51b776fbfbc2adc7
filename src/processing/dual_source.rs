//! Primary/fallback wrapper around two orchestrators.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::domain::hs_code::{QueryMethod, QueryResult};
use crate::processing::orchestrator::{
    QueryError, QueryOrchestrator, failed_name_query, validate_batch,
};

/// A lookup that can be replayed against either source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryOperation<'a> {
    ByName(&'a str),
    ByCode(&'a str),
}

impl QueryOperation<'_> {
    pub async fn run(&self, orchestrator: &QueryOrchestrator) -> QueryResult {
        match self {
            QueryOperation::ByName(name) => orchestrator.query_by_name(name).await,
            QueryOperation::ByCode(code) => orchestrator.query_by_code(code).await,
        }
    }

    fn input(&self) -> &str {
        match self {
            QueryOperation::ByName(value) | QueryOperation::ByCode(value) => value,
        }
    }
}

/// Running totals of dual-source outcomes.
#[derive(Debug, Default)]
pub struct QueryStats {
    total_queries: AtomicU64,
    primary_success: AtomicU64,
    fallback_success: AtomicU64,
    total_failures: AtomicU64,
}

/// Point-in-time copy of [`QueryStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_queries: u64,
    pub primary_success: u64,
    pub fallback_success: u64,
    pub total_failures: u64,
    pub success_rate: f64,
}

impl QueryStats {
    /// Counts one finished query.
    pub fn record(&self, method: QueryMethod) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        let counter = match method {
            QueryMethod::Primary => &self.primary_success,
            QueryMethod::Fallback => &self.fallback_success,
            QueryMethod::Failed => &self.total_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total_queries = self.total_queries.load(Ordering::Relaxed);
        let primary_success = self.primary_success.load(Ordering::Relaxed);
        let fallback_success = self.fallback_success.load(Ordering::Relaxed);
        let total_failures = self.total_failures.load(Ordering::Relaxed);
        let success_rate = if total_queries == 0 {
            0.0
        } else {
            (primary_success + fallback_success) as f64 / total_queries as f64
        };
        StatsSnapshot {
            total_queries,
            primary_success,
            fallback_success,
            total_failures,
            success_rate,
        }
    }
}

/// Queries the primary source and replays unsuccessful queries against the
/// fallback source. Keywords are generated afresh for each source.
pub struct DualSourceQuery {
    primary: QueryOrchestrator,
    fallback: QueryOrchestrator,
    stats: QueryStats,
}

impl DualSourceQuery {
    pub fn new(primary: QueryOrchestrator, fallback: QueryOrchestrator) -> Self {
        Self {
            primary,
            fallback,
            stats: QueryStats::default(),
        }
    }

    pub fn stats(&self) -> &QueryStats {
        &self.stats
    }

    pub async fn execute(&self, operation: QueryOperation<'_>) -> QueryResult {
        let primary_name = self.primary.source_name();
        let fallback_name = self.fallback.source_name();

        let mut result = operation.run(&self.primary).await;
        if result.search_success {
            log::info!("'{}' answered by {primary_name}", operation.input());
            return self.tag(result, primary_name, QueryMethod::Primary);
        }
        log::warn!(
            "{primary_name} failed for '{}': {}; trying {fallback_name}",
            operation.input(),
            result.error_message
        );
        let primary_error = std::mem::take(&mut result.error_message);

        let result = operation.run(&self.fallback).await;
        if result.search_success {
            log::info!("'{}' answered by {fallback_name}", operation.input());
            return self.tag(result, fallback_name, QueryMethod::Fallback);
        }

        let error = QueryError::SourceUnavailable {
            primary: primary_name.to_string(),
            primary_error,
            fallback: fallback_name.to_string(),
            fallback_error: result.error_message.clone(),
        };
        log::error!("Both sources failed for '{}': {error}", operation.input());
        let failed = QueryResult {
            error_message: error.to_string(),
            ..result
        };
        let tried = format!("{primary_name},{fallback_name}");
        self.tag(failed, &tried, QueryMethod::Failed)
    }

    pub async fn query_by_name(&self, name: &str) -> QueryResult {
        self.execute(QueryOperation::ByName(name)).await
    }

    pub async fn query_by_code(&self, code: &str) -> QueryResult {
        self.execute(QueryOperation::ByCode(code)).await
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

        let delay = self.primary.options().batch_delay;
        let total = names.len();
        let mut results = Vec::with_capacity(total);
        for (i, name) in names.iter().enumerate() {
            log::info!("[{}/{total}] Querying '{}'", i + 1, name.as_ref());
            results.push(self.query_by_name(name.as_ref()).await);
            if i + 1 < total && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        results
    }

    fn tag(&self, mut result: QueryResult, source: &str, method: QueryMethod) -> QueryResult {
        result.data_source = Some(source.to_string());
        result.query_method = Some(method);
        self.stats.record(method);
        result
    }
}
