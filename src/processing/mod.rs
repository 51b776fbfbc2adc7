use std::sync::Arc;

use crate::models::config::AppConfig;
use crate::processing::embedding::{FastEmbedder, SemanticScorer};
use crate::processing::similarity::{FuzzyScorer, SimilarityScorer};

pub mod dual_source;
pub mod embedding;
pub mod keywords;
pub mod matcher;
pub mod orchestrator;
pub mod similarity;

/// How names are compared once the exact and containment rules pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScorerMode {
    Fuzzy,
    Semantic,
}

impl ScorerMode {
    pub fn from_config(config: &AppConfig) -> Self {
        if config.semantic_matching {
            ScorerMode::Semantic
        } else {
            ScorerMode::Fuzzy
        }
    }
}

/// Builds the scorer for `mode`. Semantic mode loads the embedding model.
pub fn build_scorer(
    mode: ScorerMode,
    cache_size: usize,
) -> Result<Arc<dyn SimilarityScorer>, String> {
    match mode {
        ScorerMode::Fuzzy => Ok(Arc::new(FuzzyScorer)),
        ScorerMode::Semantic => {
            let embedder = FastEmbedder::chinese()?;
            log::info!("Semantic matching enabled, embedding cache size {cache_size}");
            Ok(Arc::new(SemanticScorer::new(Box::new(embedder), cache_size)))
        }
    }
}
