use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgGroup, Parser};

use hscode_crawlers::crawlers::hsciq::HsciqCrawler;
use hscode_crawlers::crawlers::i5a6::I5a6Crawler;
use hscode_crawlers::crawlers::{CrawlerError, CrawlerResult, HsCodeSource};
use hscode_crawlers::domain::hs_code::QueryResult;
use hscode_crawlers::models::config::AppConfig;
use hscode_crawlers::processing::dual_source::{DualSourceQuery, StatsSnapshot};
use hscode_crawlers::processing::keywords::KeywordGenerator;
use hscode_crawlers::processing::orchestrator::{OrchestratorOptions, QueryOrchestrator};
use hscode_crawlers::processing::similarity::SimilarityScorer;
use hscode_crawlers::processing::{ScorerMode, build_scorer};
use hscode_crawlers::repository::ResultWriter;
use hscode_crawlers::repository::json::{JsonFileRepository, format_for_display};

/// Look up customs HS codes by product name or by code.
#[derive(Parser)]
#[command(name = "hscode-crawlers", version)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["single", "batch", "file", "code"])
))]
struct Cli {
    /// Query one product name.
    #[arg(long)]
    single: Option<String>,

    /// Query several product names in order.
    #[arg(long, num_args = 1..)]
    batch: Vec<String>,

    /// Query the product names listed one per line in a file.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Fetch the record of a known HS code.
    #[arg(long)]
    code: Option<String>,

    /// Print results without writing JSON files.
    #[arg(long)]
    no_save: bool,

    /// Compare names with sentence embeddings instead of edit distance.
    #[arg(long)]
    semantic: bool,

    /// YAML settings file.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Runs queries against either one source or a primary/fallback pair.
enum Querier {
    Single(QueryOrchestrator),
    Dual(DualSourceQuery),
}

impl Querier {
    async fn query_by_name(&self, name: &str) -> QueryResult {
        match self {
            Querier::Single(orchestrator) => orchestrator.query_by_name(name).await,
            Querier::Dual(dual) => dual.query_by_name(name).await,
        }
    }

    async fn query_by_code(&self, code: &str) -> QueryResult {
        match self {
            Querier::Single(orchestrator) => orchestrator.query_by_code(code).await,
            Querier::Dual(dual) => dual.query_by_code(code).await,
        }
    }

    async fn batch_query(&self, names: &[String]) -> Vec<QueryResult> {
        match self {
            Querier::Single(orchestrator) => orchestrator.batch_query(names).await,
            Querier::Dual(dual) => dual.batch_query(names).await,
        }
    }

    fn stats(&self) -> Option<StatsSnapshot> {
        match self {
            Querier::Single(_) => None,
            Querier::Dual(dual) => Some(dual.stats().snapshot()),
        }
    }
}

/// Everything a CLI run needs, built once from the configuration.
struct AppContext {
    querier: Querier,
    repository: JsonFileRepository,
}

fn build_source(name: &str, config: &AppConfig) -> CrawlerResult<Arc<dyn HsCodeSource>> {
    match name {
        I5a6Crawler::NAME => Ok(Arc::new(I5a6Crawler::from_config(config)?)),
        HsciqCrawler::NAME => Ok(Arc::new(HsciqCrawler::from_config(config)?)),
        other => Err(CrawlerError::Build(format!("unknown source: {other}"))),
    }
}

fn build_orchestrator(
    name: &str,
    config: &AppConfig,
    scorer: Arc<dyn SimilarityScorer>,
) -> Result<QueryOrchestrator, String> {
    let source = build_source(name, config).map_err(|e| e.to_string())?;
    Ok(QueryOrchestrator::new(
        source,
        scorer,
        KeywordGenerator::default(),
        OrchestratorOptions::from_config(config),
    ))
}

impl AppContext {
    fn new(config: &AppConfig) -> Result<Self, String> {
        let scorer = build_scorer(ScorerMode::from_config(config), config.embedding_cache_size)?;
        let primary = build_orchestrator(&config.primary_source, config, scorer.clone())?;
        let querier = if config.fallback_enabled() {
            let fallback = build_orchestrator(&config.fallback_source, config, scorer)?;
            log::info!(
                "Dual source mode: primary {}, fallback {}",
                config.primary_source,
                config.fallback_source
            );
            Querier::Dual(DualSourceQuery::new(primary, fallback))
        } else {
            Querier::Single(primary)
        };
        let repository =
            JsonFileRepository::new(&config.output_dir).map_err(|e| e.to_string())?;
        Ok(Self {
            querier,
            repository,
        })
    }
}

fn read_names(path: &Path) -> std::io::Result<Vec<String>> {
    Ok(std::fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn print_batch_summary(results: &[QueryResult]) {
    let success = results.iter().filter(|r| r.search_success).count();
    println!(
        "共 {} 条，成功 {success} 条，失败 {} 条",
        results.len(),
        results.len() - success
    );
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let cli = Cli::parse();

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    if cli.semantic {
        config.semantic_matching = true;
    }

    let context = match AppContext::new(&config) {
        Ok(context) => context,
        Err(e) => {
            log::error!("Failed to initialize: {e}");
            std::process::exit(1);
        }
    };

    let names = if let Some(path) = &cli.file {
        match read_names(path) {
            Ok(names) => Some(names),
            Err(e) => {
                log::error!("Failed to read {}: {e}", path.display());
                std::process::exit(1);
            }
        }
    } else if !cli.batch.is_empty() {
        Some(cli.batch.clone())
    } else {
        None
    };

    if let Some(names) = names {
        let results = context.querier.batch_query(&names).await;
        for result in &results {
            println!("{}", format_for_display(result));
        }
        print_batch_summary(&results);
        if !cli.no_save
            && let Err(e) = context.repository.save_batch(&results)
        {
            log::error!("Failed to save batch results: {e}");
        }
    } else {
        let result = if let Some(code) = &cli.code {
            context.querier.query_by_code(code).await
        } else {
            let name = cli.single.as_deref().unwrap_or_default();
            context.querier.query_by_name(name).await
        };
        println!("{}", format_for_display(&result));
        if !cli.no_save
            && let Err(e) = context.repository.save_single(&result)
        {
            log::error!("Failed to save result: {e}");
        }
    }

    if let Some(stats) = context.querier.stats() {
        println!(
            "查询统计: 总数 {}, 主数据源成功 {}, 备用数据源成功 {}, 失败 {}, 成功率 {:.1}%",
            stats.total_queries,
            stats.primary_success,
            stats.fallback_success,
            stats.total_failures,
            stats.success_rate * 100.0
        );
    }
}
