//! Semantic scoring backed by sentence embeddings.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::processing::similarity::{FuzzyScorer, Prescore, SimilarityScorer, exact_or_containment};

/// Turns texts into dense vectors, one per input, in input order.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String>;
}

/// [`Embedder`] running a local fastembed model.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
}

impl FastEmbedder {
    /// Loads `model`, downloading it on first use.
    pub fn new(model: EmbeddingModel) -> Result<Self, String> {
        let model = TextEmbedding::try_new(InitOptions::new(model))
            .map_err(|error| format!("Failed to initialize embedder: {error:?}"))?;
        Ok(Self {
            model: Mutex::new(model),
        })
    }

    /// Compact Chinese model suited to short product names.
    pub fn chinese() -> Result<Self, String> {
        Self::new(EmbeddingModel::BGESmallZHV15)
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| "embedding model mutex poisoned".to_string())?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|error| format!("Failed to generate embedding: {error:?}"))
    }
}

/// Normalize a vector to unit length.
///
/// Returns the original vector when the norm is zero.
pub(crate) fn normalize_embedding(vec: &[f32]) -> Vec<f32> {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        vec.to_vec()
    } else {
        vec.iter().map(|x| x / norm).collect()
    }
}

/// Cosine similarity of two unit vectors, clamped to `[0, 1]`.
fn unit_cosine(a: &[f32], b: &[f32]) -> Result<f32, String> {
    if a.len() != b.len() {
        return Err(format!(
            "embedding dimensions differ: {} vs {}",
            a.len(),
            b.len()
        ));
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    Ok(dot.clamp(0.0, 1.0))
}

/// Snapshot of the cache counters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Bounded embedding memo with first-in first-out eviction.
///
/// Entries are keyed by the SHA-256 of the trimmed text. Reads never change
/// the eviction order. A capacity of zero disables the cache entirely.
pub struct EmbeddingCache {
    capacity: usize,
    entries: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            hits: 0,
            misses: 0,
        }
    }

    fn key(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.trim().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn get(&mut self, text: &str) -> Option<Vec<f32>> {
        if !self.is_enabled() {
            return None;
        }
        match self.entries.get(&Self::key(text)) {
            Some(embedding) => {
                self.hits += 1;
                Some(embedding.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, text: &str, embedding: Vec<f32>) {
        if !self.is_enabled() {
            return;
        }
        let key = Self::key(text);
        if self.entries.contains_key(&key) {
            self.entries.insert(key, embedding);
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, embedding);
    }

    pub fn contains(&self, text: &str) -> bool {
        self.entries.contains_key(&Self::key(text))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Drops every entry and resets the counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.is_enabled(),
            size: self.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            hit_rate: self.hit_rate(),
        }
    }
}

/// Semantic mode: shared exact/containment rules, then embedding cosine.
///
/// When the embedder fails the pair is scored by the fuzzy stage instead.
pub struct SemanticScorer {
    embedder: Box<dyn Embedder>,
    cache: Mutex<EmbeddingCache>,
}

impl SemanticScorer {
    pub fn new(embedder: Box<dyn Embedder>, cache_size: usize) -> Self {
        Self {
            embedder,
            cache: Mutex::new(EmbeddingCache::new(cache_size)),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats()
    }

    pub fn clear_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Unit-length embedding of `text`, served from the cache when present.
    fn embedding(&self, text: &str) -> Result<Vec<f32>, String> {
        let text = text.trim();
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(text);
        if let Some(embedding) = cached {
            return Ok(embedding);
        }

        let generated = self
            .embedder
            .embed(&[text.to_string()])?
            .into_iter()
            .next()
            .map(|value| normalize_embedding(&value))
            .ok_or_else(|| format!("embedder returned nothing for '{text}'"))?;

        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(text, generated.clone());
        Ok(generated)
    }

    fn semantic_stage(&self, a: &str, b: &str) -> Result<f32, String> {
        let a_embedding = self.embedding(a)?;
        let b_embedding = self.embedding(b)?;
        unit_cosine(&a_embedding, &b_embedding)
    }
}

impl SimilarityScorer for SemanticScorer {
    fn score(&self, a: &str, b: &str) -> f32 {
        match exact_or_containment(a, b) {
            Prescore::Settled(score) => score,
            Prescore::Undecided => match self.semantic_stage(a, b) {
                Ok(score) => {
                    log::debug!("Semantic similarity '{a}' vs '{b}': {score:.3}");
                    score
                }
                Err(e) => {
                    log::warn!("Semantic scoring failed, using fuzzy score: {e}");
                    FuzzyScorer::fuzzy_stage(a, b)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct TableEmbedder {
        vectors: HashMap<&'static str, Vec<f32>>,
        calls: AtomicUsize,
    }

    impl TableEmbedder {
        fn new(entries: &[(&'static str, Vec<f32>)]) -> Self {
            Self {
                vectors: entries.iter().cloned().collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Embedder for TableEmbedder {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|text| {
                    self.vectors
                        .get(text.as_str())
                        .cloned()
                        .unwrap_or_else(|| vec![0.0, 0.0, 1.0])
                })
                .collect())
        }
    }

    impl Embedder for std::sync::Arc<TableEmbedder> {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
            self.as_ref().embed(texts)
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
            Err("model unavailable".into())
        }
    }

    #[test]
    fn normalize_embedding_keeps_zero_vector() {
        assert_eq!(normalize_embedding(&[0.0, 0.0]), vec![0.0, 0.0]);
        let unit = normalize_embedding(&[3.0, 4.0]);
        assert!((unit[0] - 0.6).abs() < 1e-6 && (unit[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn cache_evicts_earliest_insert_first() {
        let mut cache = EmbeddingCache::new(2);
        cache.insert("a", vec![1.0]);
        cache.insert("b", vec![2.0]);
        cache.insert("c", vec![3.0]);

        assert!(!cache.contains("a"));
        assert!(cache.contains("b") && cache.contains("c"));
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("c"), Some(vec![3.0]));
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
        assert!((cache.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn cache_hit_does_not_refresh_position() {
        let mut cache = EmbeddingCache::new(2);
        cache.insert("a", vec![1.0]);
        cache.insert("b", vec![2.0]);
        assert!(cache.get("a").is_some());
        cache.insert("c", vec![3.0]);

        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn disabled_cache_never_stores_or_counts() {
        let mut cache = EmbeddingCache::new(0);
        cache.insert("a", vec![1.0]);

        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
        let stats = cache.stats();
        assert!(!stats.enabled);
        assert_eq!((stats.hits, stats.misses), (0, 0));
    }

    #[test]
    fn clear_resets_entries_and_counters() {
        let mut cache = EmbeddingCache::new(4);
        cache.insert("a", vec![1.0]);
        let _ = cache.get("a");
        let _ = cache.get("b");
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.hit_rate(), 0.0);
        assert_eq!((cache.hits(), cache.misses()), (0, 0));
    }

    #[test]
    fn semantic_mode_matches_related_description() {
        let description = "便携式自动数据处理设备，重量不超过10千克";
        let embedder = TableEmbedder::new(&[
            ("笔记本电脑", vec![1.0, 0.0, 0.0]),
            (description, vec![0.9, 0.1, 0.0]),
            ("鲜香蕉", vec![0.0, 1.0, 0.0]),
        ]);
        let semantic = SemanticScorer::new(Box::new(embedder), 16);

        assert!(FuzzyScorer.score("笔记本电脑", description) < 0.5);
        assert!(semantic.score("笔记本电脑", description) >= 0.5);
        assert!(semantic.score("笔记本电脑", "鲜香蕉") < 0.5);
    }

    #[test]
    fn repeated_scores_hit_the_cache() {
        let embedder = std::sync::Arc::new(TableEmbedder::new(&[
            ("笔记本电脑", vec![1.0, 0.0, 0.0]),
            ("平板电视", vec![0.6, 0.8, 0.0]),
        ]));
        let scorer = SemanticScorer::new(Box::new(embedder.clone()), 16);

        let first = scorer.score("笔记本电脑", "平板电视");
        let second = scorer.score("笔记本电脑", "平板电视");

        assert_eq!(first, second);
        assert!((first - 0.6).abs() < 1e-6);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        let stats = scorer.cache_stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (2, 2, 2));
    }

    #[test]
    fn opposite_vectors_clamp_to_zero() {
        let embedder = TableEmbedder::new(&[("上", vec![1.0, 0.0]), ("下", vec![-1.0, 0.0])]);
        let scorer = SemanticScorer::new(Box::new(embedder), 4);

        assert_eq!(scorer.score("上", "下"), 0.0);
    }

    #[test]
    fn exact_and_containment_skip_the_embedder() {
        let embedder = std::sync::Arc::new(TableEmbedder::new(&[]));
        let scorer = SemanticScorer::new(Box::new(embedder.clone()), 4);

        assert_eq!(scorer.score("苹果", " 苹果 "), 1.0);
        assert!(scorer.score("苹果", "鲜苹果") >= 0.85);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn embedder_failure_falls_back_to_fuzzy_stage() {
        let scorer = SemanticScorer::new(Box::new(FailingEmbedder), 4);

        assert_eq!(
            scorer.score("apple", "ample"),
            FuzzyScorer::fuzzy_stage("apple", "ample")
        );
    }
}
