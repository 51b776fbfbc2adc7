pub mod crawlers;
pub mod domain;
pub mod models;
pub mod processing;
pub mod repository;

/// Minimum similarity a candidate name needs before its detail is fetched.
pub const MIN_SIMILARITY_SCORE: f32 = 0.5;

/// Upper bound on keywords tried per query.
pub const MAX_SEARCH_ATTEMPTS: usize = 5;
